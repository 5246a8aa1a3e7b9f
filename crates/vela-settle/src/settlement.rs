//! # Settlement Orchestrator
//!
//! Turns a [`SaleDraft`] into a finalized sale: totals, tender validation in
//! submission order, and an atomic multi-table commit.
//!
//! ## State Machine Per Sale
//! ```text
//! draft ──► (validating) ──┬──► settled            tenders cover the total
//!                          ├──► partially_settled  under-tendered + lay-bye
//!                          └──► rejected           first bad tender aborts,
//!                                                  all reservations released
//! ```
//!
//! ## Atomic Commit
//! Every persisted artifact of a settlement rides one SQLite transaction:
//!
//! ```text
//! BEGIN
//!   INSERT sales                  (settled | partially_settled)
//!   INSERT sale_lines             snapshots
//!   UPDATE products               guarded stock decrement per tracked line
//!   INSERT credit_transactions    one per committed reservation
//!   UPDATE credit_accounts        guarded balance move
//!   INSERT payment_lines          amounts sum to the total
//!   INSERT laybye_schedules       lay-bye handoff only
//!   INSERT event_outbox           the settlement record, credit events
//! COMMIT
//! ```
//!
//! A crash mid-commit rolls everything back: no settled sale without its
//! payment lines, no credit transaction without its causing sale.

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::laybye::LaybyeScheduler;
use crate::ledger::{LedgerStore, ReservationToken};
use crate::pool::Database;
use crate::repository::outbox::{
    EventOutbox, EVENT_LAYBYE_OPENED, EVENT_SALE_SETTLED, EVENT_SALE_VOIDED,
};
use crate::validator::{AcceptedTender, SaleContext, TenderValidator};
use vela_core::totals::{compute_totals, PricedLine, SaleTotals};
use vela_core::validation::{validate_line_discount_cents, validate_quantity};
use vela_core::{
    CoreError, LaybyeOutcome, LaybyeSchedule, LaybyeStatus, Money, PaymentLine, Product, Sale,
    SaleDraft, SaleLine, SaleStatus, SettlementRecord, TenderDraft, TenderMethod, MAX_SALE_LINES,
};

/// A cart line joined with its catalog row and the snapshot destined for
/// the sale_lines table.
#[derive(Debug)]
struct ResolvedLine {
    line: SaleLine,
    product: Product,
}

/// How the validated tender set resolves.
#[derive(Debug, Clone, Copy)]
enum SettlementPlan {
    /// Tenders cover the total; the sale settles in one pass.
    Full,
    /// Under-tendered with lay-bye terms; open a schedule.
    Laybye { due_date: DateTime<Utc> },
}

// =============================================================================
// Settlement Engine
// =============================================================================

/// The settlement engine facade: owns the ledger, validator, and lay-bye
/// scheduler over one shared database.
#[derive(Debug, Clone)]
pub struct SettlementEngine {
    db: Database,
    ledger: LedgerStore,
    validator: TenderValidator,
    laybye: LaybyeScheduler,
    config: EngineConfig,
}

impl SettlementEngine {
    /// Assembles an engine over an opened database.
    pub fn new(db: Database, config: EngineConfig) -> Self {
        let ledger = LedgerStore::new(db.pool().clone(), &config);
        let validator = TenderValidator::new(ledger.clone());
        let laybye = LaybyeScheduler::new(db.clone(), ledger.clone(), validator.clone());

        SettlementEngine {
            db,
            ledger,
            validator,
            laybye,
            config,
        }
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }

    /// The ledger store (account lifecycle, statements, sweeps).
    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// The lay-bye scheduler.
    pub fn laybye(&self) -> &LaybyeScheduler {
        &self.laybye
    }

    /// Records an installment against an open lay-bye schedule.
    pub async fn record_laybye_installment(
        &self,
        sale_id: &str,
        tender: TenderDraft,
    ) -> EngineResult<LaybyeOutcome> {
        self.laybye.record_installment(sale_id, tender).await
    }

    /// Reclaims expired credit reservations. Invoked by the surrounding
    /// application's periodic sweep.
    pub fn sweep_expired_reservations(&self, now: DateTime<Utc>) -> usize {
        self.ledger.sweep_expired(now)
    }

    // -------------------------------------------------------------------------
    // Settlement
    // -------------------------------------------------------------------------

    /// Settles a submitted cart.
    ///
    /// ## Algorithm
    /// 1. Compute totals from the line items; reject an empty cart or a
    ///    non-positive total.
    /// 2. Validate each tender line in submission order. The first
    ///    rejection aborts the whole settlement and releases every credit
    ///    hold taken so far.
    /// 3. If the applied sum covers the total (within the configured
    ///    tolerance), commit everything in one transaction.
    /// 4. If under-tendered and the draft carries lay-bye terms with at
    ///    least one applied tender, commit as partially settled with an
    ///    active schedule.
    /// 5. Otherwise fail with `AmountMismatch`, holds released.
    pub async fn settle_sale(&self, draft: SaleDraft) -> EngineResult<SettlementRecord> {
        if draft.lines.is_empty() {
            return Err(EngineError::InvalidCart(CoreError::EmptyCart));
        }
        if draft.lines.len() > MAX_SALE_LINES {
            return Err(EngineError::InvalidCart(CoreError::CartTooLarge {
                max: MAX_SALE_LINES,
            }));
        }

        let sale_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let (resolved, totals) = self.resolve_lines(&draft, &sale_id, now).await?;
        if totals.total_cents <= 0 {
            return Err(EngineError::InvalidCart(CoreError::NonPositiveTotal {
                total_cents: totals.total_cents,
            }));
        }
        let total = totals.total();

        // Tender pass: submission order, first rejection aborts.
        let mut tendered = Money::zero();
        let mut change_due = Money::zero();
        let mut reservations: Vec<ReservationToken> = Vec::new();
        let mut accepted: Vec<(TenderDraft, AcceptedTender)> = Vec::new();

        for (index, tender) in draft.tenders.iter().enumerate() {
            let ctx = SaleContext {
                sale_id: sale_id.clone(),
                total,
                tendered,
                schedule: None,
            };

            match self.validator.validate(index, tender, &ctx).await {
                Ok(outcome) => {
                    tendered += outcome.applied;
                    change_due += outcome.change_due;
                    if let Some(token) = outcome.reservation {
                        reservations.push(token);
                    }
                    accepted.push((tender.clone(), outcome));
                }
                Err(err) => {
                    self.release_all(&reservations);
                    return Err(err);
                }
            }
        }

        let covered =
            (total.cents() - tendered.cents()).abs() <= self.config.rounding_tolerance_cents;
        let plan = if covered {
            SettlementPlan::Full
        } else if tendered < total && tendered.is_positive() {
            match &draft.laybye {
                Some(terms) => SettlementPlan::Laybye {
                    due_date: terms.due_date,
                },
                None => {
                    self.release_all(&reservations);
                    return Err(EngineError::AmountMismatch {
                        tendered_cents: tendered.cents(),
                        total_cents: total.cents(),
                    });
                }
            }
        } else {
            self.release_all(&reservations);
            return Err(EngineError::AmountMismatch {
                tendered_cents: tendered.cents(),
                total_cents: total.cents(),
            });
        };

        let record = match self
            .commit(&draft, &sale_id, &totals, &resolved, &accepted, tendered, change_due, plan, now)
            .await
        {
            Ok(record) => record,
            Err(err) => {
                // Rollback already happened when the transaction dropped;
                // the holds go back to the pool of available credit.
                self.release_all(&reservations);
                return Err(err);
            }
        };

        self.ledger.finalize(&reservations);

        info!(
            sale_id = %record.sale_id,
            status = ?record.final_status,
            total = totals.total_cents,
            tendered = tendered.cents(),
            change = record.change_due_cents,
            "sale settled"
        );
        Ok(record)
    }

    /// Voids a settled single-pass sale: returns tracked stock and appends
    /// reversing ledger entries for account-credit payment lines.
    ///
    /// Lay-bye sales are voided through
    /// [`LaybyeScheduler::cancel_schedule`] so the schedule and the sale
    /// move together.
    pub async fn void_sale(&self, sale_id: &str) -> EngineResult<()> {
        let sale = self
            .db
            .sales()
            .get_by_id(sale_id)
            .await?
            .ok_or_else(|| EngineError::not_found("Sale", sale_id))?;

        if sale.status != SaleStatus::Settled {
            return Err(EngineError::invalid_state(
                "Sale",
                sale_id,
                format!("{:?}", sale.status),
            ));
        }
        if self.db.laybye_schedules().get(sale_id).await?.is_some() {
            return Err(EngineError::invalid_state(
                "Sale",
                sale_id,
                "lay-bye; cancel the schedule instead",
            ));
        }

        let lines = self.db.sales().get_lines(sale_id).await?;
        let payments = self.db.sales().get_payment_lines(sale_id).await?;

        // Resolve the ledger entries to reverse before the transaction
        // opens; reads must not compete with the commit for connections.
        let mut reversals = Vec::new();
        for payment in payments
            .iter()
            .filter(|p| p.method == TenderMethod::AccountCredit)
        {
            let Some(txn_id) = payment.reference.as_deref() else {
                warn!(sale_id, line_id = %payment.id, "account-credit line without ledger reference");
                continue;
            };
            match self.ledger.get_transaction(txn_id).await? {
                Some(original) => reversals.push(original),
                None => {
                    warn!(sale_id, txn_id, "ledger entry missing for voided payment line");
                }
            }
        }

        let sales = self.db.sales();
        let catalog = self.db.catalog();
        let now = Utc::now();

        let mut tx = self.db.pool().begin().await?;

        sales.mark_voided_in_tx(&mut tx, sale_id, now).await?;
        for line in &lines {
            catalog
                .restock_in_tx(&mut tx, &line.product_id, line.quantity)
                .await?;
        }
        for original in &reversals {
            self.ledger.reverse_in_tx(&mut tx, original, sale_id).await?;
        }

        EventOutbox::enqueue_in_tx(
            &mut tx,
            EVENT_SALE_VOIDED,
            sale_id,
            &serde_json::json!({ "sale_id": sale_id }),
        )
        .await?;

        tx.commit().await?;

        info!(sale_id, "sale voided");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    /// Joins cart lines with the catalog, builds the snapshots, and
    /// computes totals.
    async fn resolve_lines(
        &self,
        draft: &SaleDraft,
        sale_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<(Vec<ResolvedLine>, SaleTotals)> {
        let catalog = self.db.catalog();

        let mut resolved = Vec::with_capacity(draft.lines.len());
        let mut priced = Vec::with_capacity(draft.lines.len());

        for line in &draft.lines {
            validate_quantity(line.quantity)
                .map_err(|e| EngineError::InvalidCart(e.into()))?;
            validate_line_discount_cents(
                line.line_discount_cents,
                line.unit_price_cents * line.quantity,
            )
            .map_err(|e| EngineError::InvalidCart(e.into()))?;

            let product = catalog
                .get_by_id(&line.product_id)
                .await?
                .ok_or_else(|| EngineError::not_found("Product", line.product_id.as_str()))?;

            if !product.is_active {
                return Err(EngineError::invalid_state(
                    "Product",
                    product.id.clone(),
                    "inactive",
                ));
            }
            if !product.can_sell(line.quantity) {
                return Err(EngineError::InsufficientStock {
                    sku: product.sku.clone(),
                    available: product.current_stock.unwrap_or(0),
                    requested: line.quantity,
                });
            }

            let pl = PricedLine {
                unit_price: Money::from_cents(line.unit_price_cents),
                quantity: line.quantity,
                line_discount: Money::from_cents(line.line_discount_cents),
                tax_rate: product.tax_rate(),
            };

            resolved.push(ResolvedLine {
                line: SaleLine {
                    id: Uuid::new_v4().to_string(),
                    sale_id: sale_id.to_string(),
                    product_id: product.id.clone(),
                    sku_snapshot: product.sku.clone(),
                    name_snapshot: product.name.clone(),
                    unit_price_cents: line.unit_price_cents,
                    quantity: line.quantity,
                    line_discount_cents: line.line_discount_cents,
                    line_total_cents: pl.line_total().cents(),
                    tax_cents: pl.tax().cents(),
                    created_at: now,
                },
                product,
            });
            priced.push(pl);
        }

        Ok((resolved, compute_totals(&priced)))
    }

    /// The atomic commit step. Everything in one transaction; any error
    /// rolls the whole settlement back.
    #[allow(clippy::too_many_arguments)]
    async fn commit(
        &self,
        draft: &SaleDraft,
        sale_id: &str,
        totals: &SaleTotals,
        resolved: &[ResolvedLine],
        accepted: &[(TenderDraft, AcceptedTender)],
        tendered: Money,
        change_due: Money,
        plan: SettlementPlan,
        now: DateTime<Utc>,
    ) -> EngineResult<SettlementRecord> {
        let status = match plan {
            SettlementPlan::Full => SaleStatus::Settled,
            SettlementPlan::Laybye { .. } => SaleStatus::PartiallySettled,
        };

        let sale = Sale {
            id: sale_id.to_string(),
            branch_id: draft.branch_id.clone(),
            customer_id: draft.customer_id.clone(),
            subtotal_cents: totals.subtotal_cents,
            tax_cents: totals.tax_cents,
            discount_cents: totals.discount_cents,
            total_cents: totals.total_cents,
            status,
            created_at: now,
            updated_at: now,
            settled_at: matches!(plan, SettlementPlan::Full).then_some(now),
        };

        let sales = self.db.sales();
        let catalog = self.db.catalog();

        let mut tx = self.db.pool().begin().await?;

        sales.insert_sale_in_tx(&mut tx, &sale).await?;

        for r in resolved {
            sales.insert_line_in_tx(&mut tx, &r.line).await?;
            if r.product.track_inventory {
                catalog
                    .decrement_stock_in_tx(&mut tx, &r.product.id, r.line.quantity)
                    .await?;
            }
        }

        let mut payment_lines = Vec::with_capacity(accepted.len());
        for (tender, outcome) in accepted {
            let line_id = Uuid::new_v4().to_string();

            // Account-credit lines reference the ledger entry they caused.
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
            payment_lines.push(line);
        }

        let laybye = match plan {
            SettlementPlan::Full => None,
            SettlementPlan::Laybye { due_date } => {
                let schedule = LaybyeSchedule {
                    sale_id: sale_id.to_string(),
                    total_due_cents: totals.total_cents,
                    amount_paid_cents: tendered.cents(),
                    due_date,
                    status: LaybyeStatus::Active,
                    created_at: now,
                    updated_at: now,
                };
                self.db.laybye_schedules().insert_in_tx(&mut tx, &schedule).await?;
                Some(schedule)
            }
        };

        let record = SettlementRecord {
            sale_id: sale_id.to_string(),
            final_status: status,
            payment_lines,
            change_due_cents: change_due.cents(),
            laybye,
        };

        let kind = match plan {
            SettlementPlan::Full => EVENT_SALE_SETTLED,
            SettlementPlan::Laybye { .. } => EVENT_LAYBYE_OPENED,
        };
        EventOutbox::enqueue_in_tx(&mut tx, kind, sale_id, &record).await?;

        tx.commit().await?;
        Ok(record)
    }

    fn release_all(&self, tokens: &[ReservationToken]) {
        for token in tokens {
            self.ledger.release(*token);
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
