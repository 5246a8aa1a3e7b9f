//! # Domain Types
//!
//! Core domain types for the settlement engine.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                          Domain Types                               │
//! │                                                                     │
//! │  ┌───────────────┐   ┌────────────────┐   ┌─────────────────────┐  │
//! │  │     Sale      │   │  PaymentLine   │   │   CreditAccount     │  │
//! │  │ ───────────── │   │ ────────────── │   │ ─────────────────── │  │
//! │  │ id, totals    │──►│ sale_id (FK)   │   │ credit_limit_cents  │  │
//! │  │ status        │   │ method, amount │──►│ current_balance     │  │
//! │  └───────┬───────┘   └────────────────┘   └──────────┬──────────┘  │
//! │          │                                           │             │
//! │  ┌───────▼────────┐                       ┌──────────▼──────────┐  │
//! │  │ LaybyeSchedule │                       │  CreditTransaction  │  │
//! │  │ ────────────── │                       │ ─────────────────── │  │
//! │  │ total_due      │                       │ delta, cause ids    │  │
//! │  │ amount_paid    │                       │ (append-only)       │  │
//! │  └────────────────┘                       └─────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entity structs are row-shaped (flat, cents columns) so the database layer
//! can map them directly; helper methods lift cents fields into [`Money`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;

// =============================================================================
// Tax Rate
// =============================================================================

/// Tax rate in basis points (1 bp = 0.01%, so 1500 = 15%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TaxRate(u32);

impl TaxRate {
    /// Creates a tax rate from basis points.
    #[inline]
    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    /// Returns the rate in basis points.
    #[inline]
    pub const fn bps(&self) -> u32 {
        self.0
    }

    /// Zero tax rate.
    #[inline]
    pub const fn zero() -> Self {
        TaxRate(0)
    }
}

// =============================================================================
// Statuses and Methods
// =============================================================================

/// The status of a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    /// Submitted but not yet committed.
    #[default]
    Draft,
    /// Paid in full and finalized. Immutable afterwards.
    Settled,
    /// Lay-bye sale with an open schedule. Only the lay-bye path
    /// produces this status.
    PartiallySettled,
    /// Cancelled; any stock taken is returned.
    Voided,
}

/// One payment method applied toward a sale's total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TenderMethod {
    /// Physical cash. The only method allowed to overpay (change due).
    Cash,
    /// Card payment on an external terminal.
    Card,
    /// Debit against the customer's credit account.
    AccountCredit,
    /// Payment recorded against an open lay-bye schedule.
    LaybyeInstallment,
}

/// The status of a lay-bye schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum LaybyeStatus {
    /// Accepting installments.
    #[default]
    Active,
    /// Fully paid; the owning sale is settled.
    Completed,
    /// Cancelled; the owning sale is voided.
    Cancelled,
    /// Past the due date with a balance outstanding. A payment moves the
    /// schedule back to active.
    Overdue,
}

// =============================================================================
// Credit Account
// =============================================================================

/// A customer credit account.
///
/// `current_balance_cents` is signed; positive means the customer owes the
/// store. The reconciliation invariant is that it always equals the running
/// sum of the account's [`CreditTransaction`] deltas.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CreditAccount {
    pub id: String,
    pub customer_id: String,
    /// Non-negative ceiling on what the customer may owe.
    pub credit_limit_cents: i64,
    pub current_balance_cents: i64,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl CreditAccount {
    /// Returns the credit limit as Money.
    #[inline]
    pub fn credit_limit(&self) -> Money {
        Money::from_cents(self.credit_limit_cents)
    }

    /// Returns the current balance as Money.
    #[inline]
    pub fn balance(&self) -> Money {
        Money::from_cents(self.current_balance_cents)
    }

    /// Credit still available before the limit, ignoring pending holds.
    #[inline]
    pub fn headroom(&self) -> Money {
        Money::from_cents(self.credit_limit_cents - self.current_balance_cents)
    }
}

// =============================================================================
// Credit Transaction
// =============================================================================

/// One append-only ledger entry recording a mutation of an account balance.
///
/// Rows are never updated or deleted. `reservation_id` carries the
/// reservation token that produced a debit; its uniqueness is what makes
/// committing the same reservation twice yield exactly one entry.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CreditTransaction {
    pub id: String,
    pub account_id: String,
    /// Signed: positive for debits (sale on credit), negative for payments.
    pub delta_cents: i64,
    pub cause_sale_id: Option<String>,
    pub cause_payment_line_id: Option<String>,
    pub reservation_id: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    /// Returns the delta as Money.
    #[inline]
    pub fn delta(&self) -> Money {
        Money::from_cents(self.delta_cents)
    }
}

// =============================================================================
// Product
// =============================================================================

/// A catalog product, as much of it as settlement needs: snapshot fields and
/// the stock flags consulted at commit time.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    pub sku: String,
    pub name: String,
    pub price_cents: i64,
    pub tax_rate_bps: u32,
    pub track_inventory: bool,
    pub allow_negative_stock: bool,
    pub current_stock: Option<i64>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Returns the tax rate.
    #[inline]
    pub fn tax_rate(&self) -> TaxRate {
        TaxRate::from_bps(self.tax_rate_bps)
    }

    /// Whether `quantity` units can be sold right now.
    pub fn can_sell(&self, quantity: i64) -> bool {
        if !self.track_inventory {
            return true;
        }
        if self.current_stock.unwrap_or(0) >= quantity {
            return true;
        }
        self.allow_negative_stock
    }
}

// =============================================================================
// Sale
// =============================================================================

/// A sale transaction. Immutable once `Settled`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub branch_id: String,
    pub customer_id: Option<String>,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
    pub status: SaleStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub settled_at: Option<DateTime<Utc>>,
}

impl Sale {
    /// Returns the total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

// =============================================================================
// Sale Line
// =============================================================================

/// A line item on a sale. Snapshot pattern: sku, name and unit price are
/// frozen at the time of sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleLine {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub sku_snapshot: String,
    pub name_snapshot: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub line_discount_cents: i64,
    /// unit price × quantity − line discount.
    pub line_total_cents: i64,
    pub tax_cents: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// Payment Line
// =============================================================================

/// One tender applied to a sale.
///
/// Owned exclusively by its sale. For a settled sale the payment line
/// amounts sum exactly to `Sale.total_cents`; cash change is returned to the
/// caller and never stored as a line.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PaymentLine {
    pub id: String,
    pub sale_id: String,
    pub method: TenderMethod,
    pub amount_cents: i64,
    /// External reference: the credit transaction id for account-credit
    /// lines, the card authorization code for card lines.
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl PaymentLine {
    /// Returns the amount as Money.
    #[inline]
    pub fn amount(&self) -> Money {
        Money::from_cents(self.amount_cents)
    }
}

// =============================================================================
// Lay-bye Schedule
// =============================================================================

/// Installment tracking for a deferred sale.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct LaybyeSchedule {
    /// Also the owning sale's id (one schedule per sale).
    pub sale_id: String,
    pub total_due_cents: i64,
    /// Running sum of the sale's payment line amounts.
    pub amount_paid_cents: i64,
    #[ts(as = "String")]
    pub due_date: DateTime<Utc>,
    pub status: LaybyeStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl LaybyeSchedule {
    /// Amount still owed on the schedule.
    #[inline]
    pub fn outstanding(&self) -> Money {
        Money::from_cents(self.total_due_cents - self.amount_paid_cents)
    }

    /// Whether the schedule currently accepts installments.
    ///
    /// Overdue schedules still accept payment; a payment moves them back
    /// to active.
    #[inline]
    pub fn is_payable(&self) -> bool {
        matches!(self.status, LaybyeStatus::Active | LaybyeStatus::Overdue)
    }
}

// =============================================================================
// Inbound Drafts
// =============================================================================

/// A cart submitted for settlement by the POS layer.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleDraft {
    pub branch_id: String,
    pub customer_id: Option<String>,
    /// Ordered line items.
    pub lines: Vec<SaleLineDraft>,
    /// Ordered tender lines, validated in submission order.
    pub tenders: Vec<TenderDraft>,
    /// Present when the sale may settle partially as a lay-bye.
    pub laybye: Option<LaybyeTerms>,
}

/// One cart line. The unit price is frozen by the cart when the item is
/// added; the catalog supplies tax rate and snapshots at settlement.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleLineDraft {
    pub product_id: String,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub line_discount_cents: i64,
}

/// One proposed tender line.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct TenderDraft {
    pub method: TenderMethod,
    pub amount_cents: i64,
    /// Required for account-credit tenders.
    pub account_id: Option<String>,
    /// Caller-supplied reference (card auth code). Account-credit lines get
    /// the committed credit transaction id instead.
    pub reference: Option<String>,
}

impl TenderDraft {
    /// Cash tender helper.
    pub fn cash(amount_cents: i64) -> Self {
        TenderDraft {
            method: TenderMethod::Cash,
            amount_cents,
            account_id: None,
            reference: None,
        }
    }

    /// Card tender helper.
    pub fn card(amount_cents: i64, reference: impl Into<String>) -> Self {
        TenderDraft {
            method: TenderMethod::Card,
            amount_cents,
            account_id: None,
            reference: Some(reference.into()),
        }
    }

    /// Account-credit tender helper.
    pub fn account_credit(amount_cents: i64, account_id: impl Into<String>) -> Self {
        TenderDraft {
            method: TenderMethod::AccountCredit,
            amount_cents,
            account_id: Some(account_id.into()),
            reference: None,
        }
    }
}

/// Lay-bye terms attached to a draft that may settle partially.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LaybyeTerms {
    #[ts(as = "String")]
    pub due_date: DateTime<Utc>,
}

// =============================================================================
// Outbound Contracts
// =============================================================================

/// The settlement result consumed by the receipt printer and reporting.
///
/// This is the sole contract those collaborators depend on.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SettlementRecord {
    pub sale_id: String,
    pub final_status: SaleStatus,
    pub payment_lines: Vec<PaymentLine>,
    /// Cash returned to the customer. Zero unless a cash tender overpaid.
    pub change_due_cents: i64,
    /// Present when the sale settled partially as a lay-bye.
    pub laybye: Option<LaybyeSchedule>,
}

/// The result of recording one lay-bye installment.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct LaybyeOutcome {
    pub schedule: LaybyeSchedule,
    /// `Settled` once the final installment lands, `PartiallySettled` before.
    pub sale_status: SaleStatus,
    pub payment_line: PaymentLine,
    pub change_due_cents: i64,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule(status: LaybyeStatus, due: i64, paid: i64) -> LaybyeSchedule {
        LaybyeSchedule {
            sale_id: "s-1".to_string(),
            total_due_cents: due,
            amount_paid_cents: paid,
            due_date: Utc::now(),
            status,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn sale_status_default_is_draft() {
        assert_eq!(SaleStatus::default(), SaleStatus::Draft);
    }

    #[test]
    fn account_headroom() {
        let account = CreditAccount {
            id: "a-1".to_string(),
            customer_id: "c-1".to_string(),
            credit_limit_cents: 100_000,
            current_balance_cents: 80_000,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(account.headroom().cents(), 20_000);
    }

    #[test]
    fn schedule_outstanding_and_payable() {
        let s = schedule(LaybyeStatus::Active, 60_000, 20_000);
        assert_eq!(s.outstanding().cents(), 40_000);
        assert!(s.is_payable());

        assert!(schedule(LaybyeStatus::Overdue, 100, 0).is_payable());
        assert!(!schedule(LaybyeStatus::Completed, 100, 100).is_payable());
        assert!(!schedule(LaybyeStatus::Cancelled, 100, 0).is_payable());
    }

    #[test]
    fn product_can_sell_respects_stock_flags() {
        let mut p = Product {
            id: "p-1".to_string(),
            sku: "SKU-1".to_string(),
            name: "Widget".to_string(),
            price_cents: 500,
            tax_rate_bps: 0,
            track_inventory: true,
            allow_negative_stock: false,
            current_stock: Some(3),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        assert!(p.can_sell(3));
        assert!(!p.can_sell(4));

        p.allow_negative_stock = true;
        assert!(p.can_sell(4));

        p.track_inventory = false;
        p.allow_negative_stock = false;
        assert!(p.can_sell(1000));
    }
}
