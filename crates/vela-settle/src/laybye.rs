//! # Lay-bye Scheduler
//!
//! Installment tracking for deferred sales: a lay-bye sale settles
//! partially up front, then accumulates installments until the balance is
//! paid and the goods are released.
//!
//! ## State Machine Per Schedule
//! ```text
//! active ──┬──► completed   amount_paid == total_due (sale → settled)
//!          ├──► cancelled   cancel_schedule (sale → voided, stock returned)
//!          └──► overdue     mark_overdue sweep past the due date
//!
//! overdue ─┬──► active      an installment lands
//!          └──► cancelled   cancel_schedule
//! ```
//!
//! Schedules are opened by the settlement orchestrator, inside the same
//! transaction as the partially-settled sale, and only when at least one
//! tender was applied. Overdue detection is an externally-triggered sweep:
//! it depends on wall-clock time, so the surrounding application decides
//! the cadence.

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::ledger::LedgerStore;
use crate::pool::Database;
use crate::repository::outbox::{
    EventOutbox, EVENT_LAYBYE_CANCELLED, EVENT_LAYBYE_COMPLETED, EVENT_LAYBYE_INSTALLMENT,
};
use crate::validator::{AcceptedTender, SaleContext, TenderValidator};
use vela_core::{
    LaybyeOutcome, LaybyeSchedule, LaybyeStatus, Money, PaymentLine, SaleStatus, TenderDraft,
};

// =============================================================================
// Lay-bye Scheduler
// =============================================================================

/// Drives the lay-bye schedule state machine.
#[derive(Debug, Clone)]
pub struct LaybyeScheduler {
    db: Database,
    ledger: LedgerStore,
    validator: TenderValidator,
}

impl LaybyeScheduler {
    /// Creates a scheduler sharing the engine's database and ledger.
    pub fn new(db: Database, ledger: LedgerStore, validator: TenderValidator) -> Self {
        LaybyeScheduler {
            db,
            ledger,
            validator,
        }
    }

    /// Gets a schedule by its owning sale id.
    pub async fn get_schedule(&self, sale_id: &str) -> EngineResult<LaybyeSchedule> {
        self.db
            .laybye_schedules()
            .get(sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("LaybyeSchedule", sale_id))
    }

    /// Records one installment against an open schedule.
    ///
    /// The tender line is re-validated exactly like a settlement tender
    /// (overdue schedules accept payment and reactivate), then committed
    /// scoped to this single payment line: the line, any credit
    /// transaction, the schedule progress, and the final sale transition
    /// ride one database transaction.
    ///
    /// The schedule completes only when the running total reaches
    /// `total_due` exactly; the completing call also moves the sale to
    /// `Settled`.
    pub async fn record_installment(
        &self,
        sale_id: &str,
        tender: TenderDraft,
    ) -> EngineResult<LaybyeOutcome> {
        let schedule = self.get_schedule(sale_id).await?;

        let ctx = SaleContext {
            sale_id: sale_id.to_string(),
            total: Money::from_cents(schedule.total_due_cents),
            tendered: Money::from_cents(schedule.amount_paid_cents),
            schedule: Some(schedule.clone()),
        };
        let outcome = self.validator.validate(0, &tender, &ctx).await?;

        let now = Utc::now();
        let new_paid = schedule.amount_paid_cents + outcome.applied.cents();
        let new_status = if new_paid == schedule.total_due_cents {
            LaybyeStatus::Completed
        } else {
            LaybyeStatus::Active
        };

        let updated = LaybyeSchedule {
            amount_paid_cents: new_paid,
            status: new_status,
            updated_at: now,
            ..schedule.clone()
        };

        let payment_line = match self
            .commit_installment(&schedule, &updated, &tender, &outcome, now)
            .await
        {
            Ok(line) => line,
            Err(err) => {
                if let Some(token) = outcome.reservation {
                    self.ledger.release(token);
                }
                return Err(err);
            }
        };

        if let Some(token) = outcome.reservation {
            self.ledger.finalize(&[token]);
        }

        let sale_status = if new_status == LaybyeStatus::Completed {
            SaleStatus::Settled
        } else {
            SaleStatus::PartiallySettled
        };

        info!(
            sale_id,
            applied = outcome.applied.cents(),
            paid = new_paid,
            total_due = schedule.total_due_cents,
            status = ?new_status,
            "lay-bye installment recorded"
        );

        Ok(LaybyeOutcome {
            schedule: updated,
            sale_status,
            payment_line,
            change_due_cents: outcome.change_due.cents(),
        })
    }

    /// Flips active schedules past their due date to overdue. Returns the
    /// affected sale ids. Invoked by the surrounding application's sweep.
    pub async fn mark_overdue(&self, now: DateTime<Utc>) -> EngineResult<Vec<String>> {
        let flipped = self.db.laybye_schedules().mark_overdue(now).await?;
        if !flipped.is_empty() {
            info!(count = flipped.len(), "lay-bye schedules marked overdue");
        }
        Ok(flipped)
    }

    /// Cancels a payable schedule: the schedule moves to cancelled, the
    /// owning sale is voided, held goods go back to stock, and any open
    /// credit reservations tagged to the sale are released.
    ///
    /// Money already collected stays on the ledger; refund policy belongs
    /// to the surrounding application (an account payment or cash refund).
    pub async fn cancel_schedule(&self, sale_id: &str) -> EngineResult<LaybyeSchedule> {
        let schedule = self.get_schedule(sale_id).await?;
        if !schedule.is_payable() {
            return Err(EngineError::invalid_state(
                "LaybyeSchedule",
                sale_id,
                format!("{:?}", schedule.status),
            ));
        }

        let lines = self.db.sales().get_lines(sale_id).await?;

        let sales = self.db.sales();
        let catalog = self.db.catalog();
        let now = Utc::now();

        let mut tx = self.db.pool().begin().await?;

        self.db
            .laybye_schedules()
            .mark_cancelled_in_tx(&mut tx, sale_id, now)
            .await?;
        sales.mark_voided_in_tx(&mut tx, sale_id, now).await?;
        for line in &lines {
            catalog
                .restock_in_tx(&mut tx, &line.product_id, line.quantity)
                .await?;
        }

        let cancelled = LaybyeSchedule {
            status: LaybyeStatus::Cancelled,
            updated_at: now,
            ..schedule
        };
        EventOutbox::enqueue_in_tx(&mut tx, EVENT_LAYBYE_CANCELLED, sale_id, &cancelled).await?;

        tx.commit().await?;

        self.ledger.release_for_sale(sale_id);

        info!(sale_id, "lay-bye schedule cancelled, sale voided");
        Ok(cancelled)
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// The commit step for one installment, scoped to a single payment
    /// line.
    async fn commit_installment(
        &self,
        previous: &LaybyeSchedule,
        updated: &LaybyeSchedule,
        tender: &TenderDraft,
        outcome: &AcceptedTender,
        now: DateTime<Utc>,
    ) -> EngineResult<PaymentLine> {
        let sales = self.db.sales();
        let sale_id = previous.sale_id.as_str();

        let mut tx = self.db.pool().begin().await?;

        let line_id = Uuid::new_v4().to_string();
        let mut reference = tender.reference.clone();
        if let Some(token) = outcome.reservation {
            let txn = self.ledger.commit_in_tx(&mut tx, token, sale_id, &line_id).await?;
            reference = Some(txn.id);
        }

        let line = PaymentLine {
            id: line_id,
            sale_id: sale_id.to_string(),
            method: tender.method,
            amount_cents: outcome.applied.cents(),
            reference,
            created_at: now,
        };
        sales.insert_payment_line_in_tx(&mut tx, &line).await?;

        self.db
            .laybye_schedules()
            .update_progress_in_tx(
                &mut tx,
                sale_id,
                previous.amount_paid_cents,
                updated.amount_paid_cents,
                updated.status,
                now,
            )
            .await?;

        EventOutbox::enqueue_in_tx(&mut tx, EVENT_LAYBYE_INSTALLMENT, sale_id, &line).await?;

        if updated.status == LaybyeStatus::Completed {
            sales.mark_settled_in_tx(&mut tx, sale_id, now).await?;
            EventOutbox::enqueue_in_tx(&mut tx, EVENT_LAYBYE_COMPLETED, sale_id, updated).await?;
        }

        tx.commit().await?;
        Ok(line)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::pool::DbConfig;
    use crate::settlement::SettlementEngine;
    use vela_core::{Product, SaleDraft, SaleLineDraft, LaybyeTerms, TenderRejection};

    async fn engine() -> SettlementEngine {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        SettlementEngine::new(db, EngineConfig::default())
    }

    async fn seed_product(engine: &SettlementEngine, price_cents: i64, stock: Option<i64>) -> Product {
        let now = Utc::now();
        let product = Product {
            id: Uuid::new_v4().to_string(),
            sku: format!("SKU-{}", &Uuid::new_v4().to_string()[..8]),
            name: "Lay-bye item".to_string(),
            price_cents,
            tax_rate_bps: 0,
            track_inventory: stock.is_some(),
            allow_negative_stock: false,
            current_stock: stock,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        engine.database().catalog().insert(&product).await.unwrap();
        product
    }

    /// Opens a lay-bye sale for `price_cents` with a first cash payment of
    /// `deposit_cents`, due in `due_days` days.
    async fn open_laybye(
        engine: &SettlementEngine,
        product: &Product,
        deposit_cents: i64,
        due_days: i64,
    ) -> String {
        let draft = SaleDraft {
            branch_id: "branch-1".to_string(),
            customer_id: Some("cust-lb".to_string()),
            lines: vec![SaleLineDraft {
                product_id: product.id.clone(),
                quantity: 1,
                unit_price_cents: product.price_cents,
                line_discount_cents: 0,
            }],
            tenders: vec![TenderDraft::cash(deposit_cents)],
            laybye: Some(LaybyeTerms {
                due_date: Utc::now() + chrono::Duration::days(due_days),
            }),
        };
        engine.settle_sale(draft).await.unwrap().sale_id
    }

    #[tokio::test]
    async fn installments_complete_the_schedule() {
        let engine = engine().await;
        let product = seed_product(&engine, 60_000, None).await;

        // 600.00 total, three payments of 200.00
        let sale_id = open_laybye(&engine, &product, 20_000, 90).await;

        let first = engine
            .record_laybye_installment(&sale_id, TenderDraft::cash(20_000))
            .await
            .unwrap();
        assert_eq!(first.schedule.status, LaybyeStatus::Active);
        assert_eq!(first.schedule.amount_paid_cents, 40_000);
        assert_eq!(first.sale_status, SaleStatus::PartiallySettled);

        let last = engine
            .record_laybye_installment(&sale_id, TenderDraft::cash(20_000))
            .await
            .unwrap();
        assert_eq!(last.schedule.status, LaybyeStatus::Completed);
        assert_eq!(last.schedule.amount_paid_cents, 60_000);
        assert_eq!(last.sale_status, SaleStatus::Settled);

        let sale = engine
            .database()
            .sales()
            .get_by_id(&sale_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sale.status, SaleStatus::Settled);
        assert!(sale.settled_at.is_some());

        // Payment lines sum exactly to the total
        assert_eq!(
            engine.database().sales().total_paid_cents(&sale_id).await.unwrap(),
            60_000
        );

        // A completed schedule refuses further payment
        let err = engine
            .record_laybye_installment(&sale_id, TenderDraft::cash(1_000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::TenderRejected {
                reason: TenderRejection::ScheduleNotPayable { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn partial_sums_never_complete() {
        let engine = engine().await;
        let product = seed_product(&engine, 50_000, None).await;
        let sale_id = open_laybye(&engine, &product, 10_000, 30).await;

        let outcome = engine
            .record_laybye_installment(&sale_id, TenderDraft::cash(39_999))
            .await
            .unwrap();

        assert_eq!(outcome.schedule.amount_paid_cents, 49_999);
        assert_eq!(outcome.schedule.status, LaybyeStatus::Active);
        assert_eq!(outcome.sale_status, SaleStatus::PartiallySettled);
    }

    #[tokio::test]
    async fn final_cash_installment_returns_change() {
        let engine = engine().await;
        let product = seed_product(&engine, 30_000, None).await;
        let sale_id = open_laybye(&engine, &product, 25_000, 30).await;

        // 100.00 cash against the 50.00 outstanding
        let outcome = engine
            .record_laybye_installment(&sale_id, TenderDraft::cash(10_000))
            .await
            .unwrap();

        assert_eq!(outcome.payment_line.amount_cents, 5_000);
        assert_eq!(outcome.change_due_cents, 5_000);
        assert_eq!(outcome.schedule.status, LaybyeStatus::Completed);
    }

    #[tokio::test]
    async fn account_credit_installment_moves_the_ledger() {
        let engine = engine().await;
        let product = seed_product(&engine, 40_000, None).await;
        let sale_id = open_laybye(&engine, &product, 10_000, 60).await;

        let account = engine
            .ledger()
            .create_account("cust-lb", Money::from_cents(50_000))
            .await
            .unwrap();

        let outcome = engine
            .record_laybye_installment(
                &sale_id,
                TenderDraft::account_credit(30_000, account.id.clone()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.schedule.status, LaybyeStatus::Completed);
        assert_eq!(engine.ledger().balance(&account.id).await.unwrap().cents(), 30_000);
        assert!(engine.ledger().reconcile(&account.id).await.unwrap());
        assert_eq!(engine.ledger().pending_cents(&account.id), 0);

        let txn = engine
            .ledger()
            .get_transaction(outcome.payment_line.reference.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(txn.cause_sale_id.as_deref(), Some(sale_id.as_str()));
    }

    #[tokio::test]
    async fn overdue_sweep_and_reactivation_on_payment() {
        let engine = engine().await;
        let product = seed_product(&engine, 20_000, None).await;
        let sale_id = open_laybye(&engine, &product, 5_000, 1).await;

        // Nothing due yet
        assert!(engine.laybye().mark_overdue(Utc::now()).await.unwrap().is_empty());

        let later = Utc::now() + chrono::Duration::days(2);
        let flipped = engine.laybye().mark_overdue(later).await.unwrap();
        assert_eq!(flipped, vec![sale_id.clone()]);
        assert_eq!(
            engine.laybye().get_schedule(&sale_id).await.unwrap().status,
            LaybyeStatus::Overdue
        );

        // The sweep is idempotent
        assert!(engine.laybye().mark_overdue(later).await.unwrap().is_empty());

        // A payment moves the schedule back to active
        let outcome = engine
            .record_laybye_installment(&sale_id, TenderDraft::cash(5_000))
            .await
            .unwrap();
        assert_eq!(outcome.schedule.status, LaybyeStatus::Active);
    }

    #[tokio::test]
    async fn cancellation_voids_and_restocks() {
        let engine = engine().await;
        let product = seed_product(&engine, 20_000, Some(1)).await;
        let sale_id = open_laybye(&engine, &product, 5_000, 30).await;

        // The goods were held at open
        let held = engine
            .database()
            .catalog()
            .get_by_id(&product.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(held.current_stock, Some(0));

        let cancelled = engine.laybye().cancel_schedule(&sale_id).await.unwrap();
        assert_eq!(cancelled.status, LaybyeStatus::Cancelled);

        let sale = engine
            .database()
            .sales()
            .get_by_id(&sale_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(sale.status, SaleStatus::Voided);

        let restocked = engine
            .database()
            .catalog()
            .get_by_id(&product.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restocked.current_stock, Some(1));

        // Cancelled twice is refused
        assert!(matches!(
            engine.laybye().cancel_schedule(&sale_id).await.unwrap_err(),
            EngineError::InvalidState { .. }
        ));
    }
}
