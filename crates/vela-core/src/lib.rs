//! # vela-core: Pure Business Logic for the Vela Settlement Engine
//!
//! This crate is the heart of the settlement engine. It contains all business
//! rules as pure functions with zero I/O dependencies.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                      Vela POS Architecture                          │
//! │                                                                     │
//! │  ┌───────────────────────────────────────────────────────────────┐ │
//! │  │        POS Terminal UI / Web Admin (external)                 │ │
//! │  └──────────────────────────────┬────────────────────────────────┘ │
//! │                                 │ settle_sale / record_installment  │
//! │  ┌──────────────────────────────▼────────────────────────────────┐ │
//! │  │                 vela-settle (engine crate)                    │ │
//! │  │   Ledger Store · Tender Validator · Orchestrator · Lay-bye    │ │
//! │  └──────────────────────────────┬────────────────────────────────┘ │
//! │                                 │                                   │
//! │  ┌──────────────────────────────▼────────────────────────────────┐ │
//! │  │               ★ vela-core (THIS CRATE) ★                      │ │
//! │  │                                                               │ │
//! │  │   ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌────────────┐      │ │
//! │  │   │  types  │  │  money  │  │ totals  │  │ validation │      │ │
//! │  │   │  Sale   │  │  Money  │  │ cart    │  │   field    │      │ │
//! │  │   │  Ledger │  │ TaxRate │  │ tenders │  │   checks   │      │ │
//! │  │   └─────────┘  └─────────┘  └─────────┘  └────────────┘      │ │
//! │  │                                                               │ │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS          │ │
//! │  └───────────────────────────────────────────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Sale, PaymentLine, CreditAccount, ...)
//! - [`money`] - Money type with integer arithmetic (no floating point!)
//! - [`totals`] - Cart totals and the tender application rules
//! - [`error`] - Domain error types and tender rejection reasons
//! - [`validation`] - Field-level validation
//!
//! ## Design Principles
//!
//! 1. **Pure Functions**: Every function is deterministic
//! 2. **Integer Money**: All monetary values are cents (i64)
//! 3. **Explicit Errors**: Errors are typed enum variants, never strings

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod money;
pub mod totals;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, TenderRejection, ValidationError};
pub use money::Money;
pub use totals::{apply_tender, compute_totals, AppliedTender, PricedLine, SaleTotals};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum line items allowed in a single sale.
///
/// Prevents runaway carts and keeps a settlement transaction bounded.
pub const MAX_SALE_LINES: usize = 100;

/// Maximum quantity of a single line item.
///
/// Catches fat-finger quantities (1000 typed instead of 10).
pub const MAX_LINE_QUANTITY: i64 = 999;
