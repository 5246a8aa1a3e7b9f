//! # Error Types
//!
//! Domain errors for vela-core.
//!
//! ## Error Hierarchy
//! ```text
//! vela-core errors (this file)
//! ├── CoreError        - Business rule violations
//! ├── ValidationError  - Field-level input failures
//! └── TenderRejection  - Why a single tender line was refused
//!
//! vela-settle errors (engine crate)
//! └── EngineError      - Ledger, settlement and persistence failures;
//!                        wraps CoreError and carries TenderRejection
//!                        per rejected line
//! ```
//!
//! Every rejected tender line reports its specific reason; callers get
//! enough detail to correct the input and resubmit.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{LaybyeStatus, TenderMethod};

// =============================================================================
// Core Error
// =============================================================================

/// Business rule violations raised by the pure logic layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A cart was submitted with no line items.
    #[error("cart is empty")]
    EmptyCart,

    /// Line math produced a total that cannot be settled.
    #[error("sale total must be positive, computed {total_cents} cents")]
    NonPositiveTotal { total_cents: i64 },

    /// Cart exceeds the maximum number of line items.
    #[error("cart cannot have more than {max} lines")]
    CartTooLarge { max: usize },

    /// Field-level validation failure.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors, raised before business logic runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: &'static str },

    /// Value must be strictly positive.
    #[error("{field} must be positive")]
    MustBePositive { field: &'static str },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    MustNotBeNegative { field: &'static str },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: &'static str, min: i64, max: i64 },

    /// Invalid format (bad UUID, bad date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: &'static str, reason: String },
}

// =============================================================================
// Tender Rejection
// =============================================================================

/// Why a single proposed tender line was refused.
///
/// Serialized across the API boundary so the terminal can show the cashier
/// the exact line and reason. Non-retryable without correcting the input.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TenderRejection {
    /// Tender amounts must be strictly positive.
    #[error("tender amount must be positive")]
    NonPositiveAmount,

    /// The line would push the cumulative tendered amount past the total.
    /// Only cash may overpay, and only while a balance remains.
    #[error("tender exceeds the {remaining_cents} cents remaining")]
    Overpayment { remaining_cents: i64 },

    /// Account-credit tender without an account id.
    #[error("account-credit tender requires an account id")]
    MissingAccount,

    /// No such credit account.
    #[error("credit account not found: {account_id}")]
    AccountNotFound { account_id: String },

    /// The credit account is deactivated.
    #[error("credit account is inactive: {account_id}")]
    AccountInactive { account_id: String },

    /// The hold would push the account past its credit limit.
    #[error(
        "insufficient credit on {account_id}: requested {requested_cents}, available {available_cents}"
    )]
    InsufficientCredit {
        account_id: String,
        requested_cents: i64,
        available_cents: i64,
    },

    /// Lay-bye installments are only valid against an open schedule.
    #[error("method {method:?} is not allowed for this sale")]
    MethodNotAllowed { method: TenderMethod },

    /// The owning schedule is not accepting payments.
    #[error("lay-bye schedule is {status:?}, not payable")]
    ScheduleNotPayable { status: LaybyeStatus },

    /// A non-cash installment larger than the schedule balance.
    #[error("installment exceeds the {outstanding_cents} cents outstanding")]
    InstallmentExceedsBalance { outstanding_cents: i64 },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        let err = TenderRejection::InsufficientCredit {
            account_id: "acct-9".to_string(),
            requested_cents: 30_000,
            available_cents: 20_000,
        };
        assert_eq!(
            err.to_string(),
            "insufficient credit on acct-9: requested 30000, available 20000"
        );

        assert_eq!(CoreError::EmptyCart.to_string(), "cart is empty");
    }

    #[test]
    fn validation_converts_to_core_error() {
        let err: CoreError = ValidationError::MustBePositive { field: "quantity" }.into();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[test]
    fn rejection_serializes_with_kind_tag() {
        let err = TenderRejection::Overpayment { remaining_cents: 500 };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"kind\":\"overpayment\""));
    }
}
