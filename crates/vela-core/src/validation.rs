//! # Validation Module
//!
//! Field-level validation, run before business logic.
//!
//! The engine validates early so a bad field is reported against its name
//! rather than surfacing later as a constraint violation from SQLite.

use crate::error::ValidationError;
use crate::MAX_LINE_QUANTITY;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line item quantity.
///
/// ## Rules
/// - Must be positive
/// - Must not exceed [`MAX_LINE_QUANTITY`]
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive { field: "quantity" });
    }

    if qty > MAX_LINE_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity",
            min: 1,
            max: MAX_LINE_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a tender or payment amount in cents. Must be positive.
pub fn validate_amount_cents(cents: i64) -> ValidationResult<()> {
    if cents <= 0 {
        return Err(ValidationError::MustBePositive { field: "amount" });
    }

    Ok(())
}

/// Validates a credit limit in cents. Zero is allowed (cash-only account).
pub fn validate_credit_limit_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::MustNotBeNegative { field: "credit_limit" });
    }

    Ok(())
}

/// Validates a line discount in cents against the gross line amount.
pub fn validate_line_discount_cents(discount: i64, gross: i64) -> ValidationResult<()> {
    if discount < 0 {
        return Err(ValidationError::MustNotBeNegative { field: "line_discount" });
    }

    if discount > gross {
        return Err(ValidationError::OutOfRange {
            field: "line_discount",
            min: 0,
            max: gross,
        });
    }

    Ok(())
}

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates a UUID string.
pub fn validate_uuid(id: &str) -> ValidationResult<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::Required { field: "id" });
    }

    uuid::Uuid::parse_str(id).map_err(|_| ValidationError::InvalidFormat {
        field: "id",
        reason: "must be a valid UUID".to_string(),
    })?;

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
