//! # Engine Error Types
//!
//! Error types for the settlement engine.
//!
//! ## Error Flow
//! ```text
//! SQLite error (sqlx::Error)
//!      │
//!      ▼
//! EngineError (this module)  ← adds context and categorization
//!      │
//!      ▼
//! API layer serializes for the terminal; validation errors carry enough
//! detail to correct and resubmit, persistence failures roll back fully.
//! ```
//!
//! Retryability matters to callers: `Timeout` and `ConcurrencyConflict` are
//! safe to retry (reservation commits are idempotent by token); everything
//! else needs corrected input or operator attention.

use thiserror::Error;

use vela_core::{CoreError, TenderMethod, TenderRejection};

/// Settlement engine errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The cart cannot be settled as submitted (empty, non-positive total).
    #[error("invalid cart: {0}")]
    InvalidCart(CoreError),

    /// Domain rule or field validation failed outside the cart path.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// A proposed tender line was refused. The whole settlement aborts;
    /// no partial application of an invalid tender set.
    #[error("tender line {index} ({method:?}) rejected: {reason}")]
    TenderRejected {
        index: usize,
        method: TenderMethod,
        reason: TenderRejection,
    },

    /// Tendered amounts do not cover the total and the sale is not
    /// lay-bye eligible.
    #[error("tendered {tendered_cents} cents does not match total {total_cents}")]
    AmountMismatch {
        tendered_cents: i64,
        total_cents: i64,
    },

    /// Reserving credit would push the account past its limit.
    #[error(
        "insufficient credit on {account_id}: requested {requested_cents}, available {available_cents}"
    )]
    InsufficientCredit {
        account_id: String,
        requested_cents: i64,
        available_cents: i64,
    },

    /// The credit account is deactivated.
    #[error("credit account is inactive: {account_id}")]
    AccountInactive { account_id: String },

    /// An account cannot be deactivated while money is owed either way.
    #[error("account {account_id} has outstanding balance {balance_cents}")]
    BalanceOutstanding {
        account_id: String,
        balance_cents: i64,
    },

    /// Entity not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The entity is not in a state that allows the operation.
    #[error("{entity} {id} is {state}, cannot perform operation")]
    InvalidState {
        entity: &'static str,
        id: String,
        state: String,
    },

    /// Not enough stock to commit the sale.
    #[error("insufficient stock for {sku}: available {available}, requested {requested}")]
    InsufficientStock {
        sku: String,
        available: i64,
        requested: i64,
    },

    /// The reservation token is unknown or already expired.
    #[error("reservation not found or expired: {token}")]
    ReservationNotFound { token: String },

    /// A ledger operation could not complete within its deadline.
    /// Retryable; reservation commits are idempotent under retry.
    #[error("ledger operation timed out: {operation}")]
    Timeout { operation: &'static str },

    /// A concurrent writer invalidated this operation. Retryable after
    /// re-reading the current state.
    #[error("concurrency conflict: {detail}")]
    ConcurrencyConflict { detail: String },

    /// Database write failed; the enclosing transaction rolled back and no
    /// partial state is visible.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// Migration failed.
    #[error("migration failed: {0}")]
    Migration(String),
}

impl EngineError {
    /// Whether the caller may safely retry the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Timeout { .. } | EngineError::ConcurrencyConflict { .. }
        )
    }

    /// Creates a NotFound error.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an InvalidState error.
    pub fn invalid_state(
        entity: &'static str,
        id: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        EngineError::InvalidState {
            entity,
            id: id.into(),
            state: state.into(),
        }
    }
}

/// Convert sqlx errors into engine errors.
///
/// ## Error Mapping
/// ```text
/// sqlx::Error::PoolTimedOut  → Timeout (retryable)
/// sqlx::Error::Database      → unique/FK violations are conflicts
/// Other                      → Persistence
/// ```
impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => EngineError::Timeout {
                operation: "db.acquire",
            },

            sqlx::Error::Database(db_err) => {
                let msg = db_err.message().to_string();

                // SQLite reports constraint failures in the message text:
                // "UNIQUE constraint failed: <table>.<column>"
                // "FOREIGN KEY constraint failed"
                if msg.contains("UNIQUE constraint failed")
                    || msg.contains("FOREIGN KEY constraint failed")
                {
                    EngineError::ConcurrencyConflict { detail: msg }
                } else {
                    EngineError::Persistence(msg)
                }
            }

            other => EngineError::Persistence(other.to_string()),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for EngineError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        EngineError::Migration(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Persistence(format!("payload serialization: {err}"))
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(EngineError::Timeout { operation: "ledger.reserve" }.is_retryable());
        assert!(EngineError::ConcurrencyConflict { detail: "stock".into() }.is_retryable());

        assert!(!EngineError::AmountMismatch {
            tendered_cents: 100,
            total_cents: 250
        }
        .is_retryable());
        assert!(!EngineError::not_found("Sale", "s-1").is_retryable());
    }

    #[test]
    fn message_includes_context() {
        let err = EngineError::TenderRejected {
            index: 1,
            method: TenderMethod::Card,
            reason: TenderRejection::Overpayment { remaining_cents: 50 },
        };
        let msg = err.to_string();
        assert!(msg.contains("tender line 1"));
        assert!(msg.contains("Card"));
    }
}
