//! Mid-cycle proration
//!
//! Computes the charge owed when a subscription moves to a different plan
//! before its next billing date.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use renova_shared::{Plan, Subscription};

use crate::tax::round_money;

/// Fixed divisor for the billing month. Every cycle is priced over 30 days
/// regardless of calendar month length; downstream amounts depend on this
/// exact constant.
pub const PRORATION_MONTH_DAYS: i64 = 30;

/// Charge owed for the remainder of the current cycle when switching from
/// `old_plan` to `new_plan`.
///
/// `(new_price - old_price) * days_remaining / 30`, rounded half-up to
/// 2 decimals. Zero when the billing boundary is today or already past; may
/// be negative on a downgrade, in which case the caller bills nothing.
pub fn calculate_proration(
    subscription: &Subscription,
    old_plan: &Plan,
    new_plan: &Plan,
    today: NaiveDate,
) -> Decimal {
    let days_remaining = (subscription.next_billing_date - today).num_days().max(0);
    if days_remaining == 0 {
        return Decimal::ZERO;
    }

    let price_delta = new_plan.monthly_price - old_plan.monthly_price;
    let proration = round_money(
        price_delta * Decimal::from(days_remaining) / Decimal::from(PRORATION_MONTH_DAYS),
    );

    tracing::debug!(
        subscription_id = %subscription.id,
        days_remaining,
        price_delta = %price_delta,
        proration = %proration,
        "Calculated plan-change proration"
    );

    proration
}
