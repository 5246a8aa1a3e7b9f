//! # Totals Module
//!
//! Pure sale math: cart totals and the tender application rule.
//!
//! ## Where This Runs
//! ```text
//! SaleDraft lines ──► PricedLine (joined with catalog tax rates)
//!        │
//!        ▼
//! compute_totals()  subtotal + tax − discounts ──► Sale.total
//!        │
//!        ▼
//! apply_tender()    per tender line, in submission order:
//!                   how much applies, how much comes back as change,
//!                   or why the line is rejected
//! ```
//!
//! The engine crate wraps [`apply_tender`] with the side-effecting parts
//! (credit reservations, schedule lookups); everything here is deterministic.

use crate::error::TenderRejection;
use crate::money::Money;
use crate::types::{TaxRate, TenderMethod};

// =============================================================================
// Priced Lines and Totals
// =============================================================================

/// A cart line joined with the catalog data needed for totals.
#[derive(Debug, Clone, Copy)]
pub struct PricedLine {
    pub unit_price: Money,
    pub quantity: i64,
    pub line_discount: Money,
    pub tax_rate: TaxRate,
}

impl PricedLine {
    /// unit price × quantity, before discount.
    #[inline]
    pub fn gross(&self) -> Money {
        self.unit_price.times(self.quantity)
    }

    /// Line total after discount. This is the taxable amount.
    #[inline]
    pub fn line_total(&self) -> Money {
        self.gross() - self.line_discount
    }

    /// Tax on the discounted line total.
    #[inline]
    pub fn tax(&self) -> Money {
        self.line_total().tax_at(self.tax_rate)
    }
}

/// Computed totals for a sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaleTotals {
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub discount_cents: i64,
    pub total_cents: i64,
}

impl SaleTotals {
    /// Returns the grand total as Money.
    #[inline]
    pub fn total(&self) -> Money {
        Money::from_cents(self.total_cents)
    }
}

/// Computes sale totals from priced lines.
///
/// Subtotal is the sum of discounted line totals, tax is computed per line
/// at each line's rate, and the grand total is subtotal + tax. Discounts are
/// reported separately for the sale record.
pub fn compute_totals(lines: &[PricedLine]) -> SaleTotals {
    let subtotal: Money = lines.iter().map(PricedLine::line_total).sum();
    let tax: Money = lines.iter().map(PricedLine::tax).sum();
    let discount: Money = lines.iter().map(|l| l.line_discount).sum();

    SaleTotals {
        subtotal_cents: subtotal.cents(),
        tax_cents: tax.cents(),
        discount_cents: discount.cents(),
        total_cents: (subtotal + tax).cents(),
    }
}

// =============================================================================
// Tender Application
// =============================================================================

/// The pure outcome of applying one tender line against a remaining balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedTender {
    /// The portion recorded as a payment line.
    pub applied: Money,
    /// The portion handed back to the customer. Non-zero only for cash.
    pub change: Money,
}

/// Applies one tender line against the amount still owed.
///
/// ## Rules
/// - Amounts must be strictly positive.
/// - Nothing may be tendered once the balance is fully covered.
/// - Cash may exceed the remaining balance; the overage is change due and
///   only the applied portion is recorded.
/// - Every other method must fit within the remaining balance exactly.
///
/// The caller distinguishes plain-sale overpayment from installment
/// overpayment when surfacing the rejection.
pub fn apply_tender(
    remaining: Money,
    method: TenderMethod,
    amount: Money,
) -> Result<AppliedTender, TenderRejection> {
    if !amount.is_positive() {
        return Err(TenderRejection::NonPositiveAmount);
    }

    if !remaining.is_positive() {
        return Err(TenderRejection::Overpayment { remaining_cents: 0 });
    }

    match method {
        TenderMethod::Cash => {
            let applied = amount.min(remaining);
            Ok(AppliedTender {
                applied,
                change: amount - applied,
            })
        }
        _ => {
            if amount > remaining {
                return Err(TenderRejection::Overpayment {
                    remaining_cents: remaining.cents(),
                });
            }
            Ok(AppliedTender {
                applied: amount,
                change: Money::zero(),
            })
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn line(price: i64, qty: i64, discount: i64, bps: u32) -> PricedLine {
        PricedLine {
            unit_price: Money::from_cents(price),
            quantity: qty,
            line_discount: Money::from_cents(discount),
            tax_rate: TaxRate::from_bps(bps),
        }
    }

    #[test]
    fn totals_sum_lines_and_tax() {
        // 2 × 10.00 + 1 × 5.00, no tax, no discount
        let totals = compute_totals(&[line(1000, 2, 0, 0), line(500, 1, 0, 0)]);
        assert_eq!(totals.subtotal_cents, 2500);
        assert_eq!(totals.tax_cents, 0);
        assert_eq!(totals.total_cents, 2500);
    }

    #[test]
    fn totals_tax_per_line_rate() {
        // 10.00 at 15% plus 10.00 tax-free
        let totals = compute_totals(&[line(1000, 1, 0, 1500), line(1000, 1, 0, 0)]);
        assert_eq!(totals.tax_cents, 150);
        assert_eq!(totals.total_cents, 2150);
    }

    #[test]
    fn totals_discount_reduces_taxable_amount() {
        // 20.00 with 5.00 off, taxed at 10% on the discounted 15.00
        let totals = compute_totals(&[line(2000, 1, 500, 1000)]);
        assert_eq!(totals.subtotal_cents, 1500);
        assert_eq!(totals.discount_cents, 500);
        assert_eq!(totals.tax_cents, 150);
        assert_eq!(totals.total_cents, 1650);
    }

    #[test]
    fn cash_overpays_into_change() {
        let out = apply_tender(
            Money::from_cents(250),
            TenderMethod::Cash,
            Money::from_cents(1000),
        )
        .unwrap();
        assert_eq!(out.applied.cents(), 250);
        assert_eq!(out.change.cents(), 750);
    }

    #[test]
    fn cash_under_remaining_applies_fully() {
        let out = apply_tender(
            Money::from_cents(25_000),
            TenderMethod::Cash,
            Money::from_cents(10_000),
        )
        .unwrap();
        assert_eq!(out.applied.cents(), 10_000);
        assert!(out.change.is_zero());
    }

    #[test]
    fn card_cannot_overpay() {
        let err = apply_tender(
            Money::from_cents(250),
            TenderMethod::Card,
            Money::from_cents(300),
        )
        .unwrap_err();
        assert_eq!(err, TenderRejection::Overpayment { remaining_cents: 250 });
    }

    #[test]
    fn nothing_tenders_against_covered_sale() {
        for method in [TenderMethod::Cash, TenderMethod::Card, TenderMethod::AccountCredit] {
            let err = apply_tender(Money::zero(), method, Money::from_cents(100)).unwrap_err();
            assert_eq!(err, TenderRejection::Overpayment { remaining_cents: 0 });
        }
    }

    #[test]
    fn non_positive_amounts_rejected() {
        for cents in [0, -100] {
            let err = apply_tender(
                Money::from_cents(500),
                TenderMethod::Cash,
                Money::from_cents(cents),
            )
            .unwrap_err();
            assert_eq!(err, TenderRejection::NonPositiveAmount);
        }
    }
}
