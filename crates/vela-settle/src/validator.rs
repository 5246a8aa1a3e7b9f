//! # Tender Validator
//!
//! Validates one proposed tender line against the sale being settled.
//!
//! Pure checks (amounts, remaining balance, the cash overpayment carve-out)
//! come from [`vela_core::totals::apply_tender`]; the only side effect here
//! is the delegated credit reservation for account-credit lines. A rejected
//! line reports its specific reason so the terminal can surface it against
//! the exact tender.

use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::ledger::{LedgerStore, ReservationToken};
use vela_core::totals::apply_tender;
use vela_core::{LaybyeSchedule, Money, TenderDraft, TenderMethod, TenderRejection};

// =============================================================================
// Sale Context
// =============================================================================

/// What the validator needs to know about the sale a tender targets.
#[derive(Debug, Clone)]
pub struct SaleContext {
    pub sale_id: String,
    /// Full amount the tender set must cover: the sale total, or the
    /// schedule's total due for installments.
    pub total: Money,
    /// Amount already applied (earlier lines in this call, or prior
    /// installments).
    pub tendered: Money,
    /// Present when validating an installment against an open schedule.
    pub schedule: Option<LaybyeSchedule>,
}

impl SaleContext {
    /// Amount the current line may draw against.
    pub fn remaining(&self) -> Money {
        self.total - self.tendered
    }
}

/// A tender line the validator accepted.
#[derive(Debug, Clone)]
pub struct AcceptedTender {
    /// Portion recorded as the payment line.
    pub applied: Money,
    /// Cash overage returned to the customer.
    pub change_due: Money,
    /// The credit hold backing an account-credit line.
    pub reservation: Option<ReservationToken>,
}

// =============================================================================
// Tender Validator
// =============================================================================

/// Validates tender lines, delegating credit holds to the ledger.
#[derive(Debug, Clone)]
pub struct TenderValidator {
    ledger: LedgerStore,
}

impl TenderValidator {
    /// Creates a validator over the given ledger store.
    pub fn new(ledger: LedgerStore) -> Self {
        TenderValidator { ledger }
    }

    /// Validates one tender line in submission order.
    ///
    /// ## Outcomes
    /// - `Ok(AcceptedTender)` with the applied amount, any cash change, and
    ///   the reservation token for account-credit lines
    /// - `Err(TenderRejected { .. })` naming the line index and reason
    /// - `Err(Timeout)` when the ledger could not be consulted in time
    ///   (retryable; nothing was held)
    pub async fn validate(
        &self,
        index: usize,
        tender: &TenderDraft,
        ctx: &SaleContext,
    ) -> EngineResult<AcceptedTender> {
        let reject = |reason: TenderRejection| EngineError::TenderRejected {
            index,
            method: tender.method,
            reason,
        };

        // Installment-specific gates first: the method only means something
        // against an open schedule, and the schedule must accept payment.
        match (&ctx.schedule, tender.method) {
            (None, TenderMethod::LaybyeInstallment) => {
                return Err(reject(TenderRejection::MethodNotAllowed {
                    method: tender.method,
                }));
            }
            (Some(schedule), _) if !schedule.is_payable() => {
                return Err(reject(TenderRejection::ScheduleNotPayable {
                    status: schedule.status,
                }));
            }
            _ => {}
        }

        let amount = Money::from_cents(tender.amount_cents);
        let outcome = apply_tender(ctx.remaining(), tender.method, amount).map_err(|reason| {
            // A non-cash installment past the schedule balance reads better
            // as its own reason than a generic overpayment.
            match (&ctx.schedule, &reason) {
                (Some(schedule), TenderRejection::Overpayment { remaining_cents })
                    if *remaining_cents > 0 =>
                {
                    debug_assert_eq!(*remaining_cents, schedule.outstanding().cents());
                    reject(TenderRejection::InstallmentExceedsBalance {
                        outstanding_cents: *remaining_cents,
                    })
                }
                _ => reject(reason),
            }
        })?;

        let reservation = match tender.method {
            TenderMethod::AccountCredit => {
                let account_id = tender
                    .account_id
                    .as_deref()
                    .ok_or_else(|| reject(TenderRejection::MissingAccount))?;

                let token = self
                    .ledger
                    .reserve(account_id, outcome.applied, Some(&ctx.sale_id))
                    .await
                    .map_err(|err| match err {
                        EngineError::NotFound { .. } => {
                            reject(TenderRejection::AccountNotFound {
                                account_id: account_id.to_string(),
                            })
                        }
                        EngineError::AccountInactive { account_id } => {
                            reject(TenderRejection::AccountInactive { account_id })
                        }
                        EngineError::InsufficientCredit {
                            account_id,
                            requested_cents,
                            available_cents,
                        } => reject(TenderRejection::InsufficientCredit {
                            account_id,
                            requested_cents,
                            available_cents,
                        }),
                        // Timeout and persistence failures are not
                        // rejections; they propagate as-is.
                        other => other,
                    })?;

                Some(token)
            }
            _ => None,
        };

        debug!(
            sale_id = %ctx.sale_id,
            index,
            method = ?tender.method,
            applied = outcome.applied.cents(),
            change = outcome.change.cents(),
            "tender accepted"
        );

        Ok(AcceptedTender {
            applied: outcome.applied,
            change_due: outcome.change,
            reservation,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::pool::{Database, DbConfig};
    use chrono::Utc;
    use vela_core::{LaybyeStatus, TenderRejection};

    async fn validator() -> (Database, LedgerStore, TenderValidator) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let ledger = LedgerStore::new(db.pool().clone(), &EngineConfig::default());
        let validator = TenderValidator::new(ledger.clone());
        (db, ledger, validator)
    }

    fn plain_ctx(total: i64, tendered: i64) -> SaleContext {
        SaleContext {
            sale_id: "sale-1".to_string(),
            total: Money::from_cents(total),
            tendered: Money::from_cents(tendered),
            schedule: None,
        }
    }

    fn schedule_ctx(status: LaybyeStatus, due: i64, paid: i64) -> SaleContext {
        SaleContext {
            sale_id: "sale-lb".to_string(),
            total: Money::from_cents(due),
            tendered: Money::from_cents(paid),
            schedule: Some(LaybyeSchedule {
                sale_id: "sale-lb".to_string(),
                total_due_cents: due,
                amount_paid_cents: paid,
                due_date: Utc::now(),
                status,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }),
        }
    }

    fn rejection(err: EngineError) -> TenderRejection {
        match err {
            EngineError::TenderRejected { reason, .. } => reason,
            other => panic!("expected TenderRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cash_overpayment_becomes_change() {
        let (_db, _ledger, validator) = validator().await;

        let accepted = validator
            .validate(0, &TenderDraft::cash(30_000), &plain_ctx(25_000, 0))
            .await
            .unwrap();

        assert_eq!(accepted.applied.cents(), 25_000);
        assert_eq!(accepted.change_due.cents(), 5_000);
        assert!(accepted.reservation.is_none());
    }

    #[tokio::test]
    async fn card_overpayment_rejected() {
        let (_db, _ledger, validator) = validator().await;

        let err = validator
            .validate(1, &TenderDraft::card(30_000, "AUTH-1"), &plain_ctx(25_000, 0))
            .await
            .unwrap_err();

        assert!(matches!(
            rejection(err),
            TenderRejection::Overpayment { remaining_cents: 25_000 }
        ));
    }

    #[tokio::test]
    async fn account_credit_reserves_through_ledger() {
        let (_db, ledger, validator) = validator().await;
        let account = ledger
            .create_account("cust-1", Money::from_cents(50_000))
            .await
            .unwrap();

        let accepted = validator
            .validate(
                0,
                &TenderDraft::account_credit(15_000, account.id.clone()),
                &plain_ctx(25_000, 0),
            )
            .await
            .unwrap();

        assert!(accepted.reservation.is_some());
        assert_eq!(ledger.pending_cents(&account.id), 15_000);
    }

    #[tokio::test]
    async fn account_credit_requires_account_id() {
        let (_db, _ledger, validator) = validator().await;

        let draft = TenderDraft {
            method: TenderMethod::AccountCredit,
            amount_cents: 1_000,
            account_id: None,
            reference: None,
        };
        let err = validator.validate(0, &draft, &plain_ctx(5_000, 0)).await.unwrap_err();

        assert!(matches!(rejection(err), TenderRejection::MissingAccount));
    }

    #[tokio::test]
    async fn credit_rejections_carry_ledger_reasons() {
        let (_db, ledger, validator) = validator().await;
        let account = ledger
            .create_account("cust-2", Money::from_cents(10_000))
            .await
            .unwrap();

        let err = validator
            .validate(
                0,
                &TenderDraft::account_credit(20_000, account.id.clone()),
                &plain_ctx(50_000, 0),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            rejection(err),
            TenderRejection::InsufficientCredit { available_cents: 10_000, .. }
        ));

        let err = validator
            .validate(
                0,
                &TenderDraft::account_credit(1_000, "missing-account"),
                &plain_ctx(50_000, 0),
            )
            .await
            .unwrap_err();
        assert!(matches!(rejection(err), TenderRejection::AccountNotFound { .. }));
    }

    #[tokio::test]
    async fn installment_method_needs_a_schedule() {
        let (_db, _ledger, validator) = validator().await;

        let draft = TenderDraft {
            method: TenderMethod::LaybyeInstallment,
            amount_cents: 1_000,
            account_id: None,
            reference: None,
        };
        let err = validator.validate(0, &draft, &plain_ctx(5_000, 0)).await.unwrap_err();

        assert!(matches!(rejection(err), TenderRejection::MethodNotAllowed { .. }));
    }

    #[tokio::test]
    async fn installments_respect_schedule_state() {
        let (_db, _ledger, validator) = validator().await;

        // Closed schedule refuses payment
        let err = validator
            .validate(
                0,
                &TenderDraft::cash(1_000),
                &schedule_ctx(LaybyeStatus::Completed, 10_000, 10_000),
            )
            .await
            .unwrap_err();
        assert!(matches!(rejection(err), TenderRejection::ScheduleNotPayable { .. }));

        // Overdue schedule still accepts payment
        let accepted = validator
            .validate(
                0,
                &TenderDraft::cash(1_000),
                &schedule_ctx(LaybyeStatus::Overdue, 10_000, 4_000),
            )
            .await
            .unwrap();
        assert_eq!(accepted.applied.cents(), 1_000);

        // A non-cash installment larger than the outstanding balance
        let err = validator
            .validate(
                0,
                &TenderDraft::card(7_000, "AUTH-2"),
                &schedule_ctx(LaybyeStatus::Active, 10_000, 4_000),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            rejection(err),
            TenderRejection::InstallmentExceedsBalance { outstanding_cents: 6_000 }
        ));
    }
}
