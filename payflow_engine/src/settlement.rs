//! Revenue settlement.
//!
//! When an order is paid, each purchased solution earns its creator the line price less the platform fee. The split
//! is computed here; the ledger persists it in the same database transaction that completes the payment, and only
//! for the writer that completed it.
use crate::db_types::{NewRevenueShare, OrderLineItem};

/// The platform's cut of every sale, in basis points (10%).
pub const PLATFORM_FEE_BPS: i64 = 1_000;

/// Splits each line item into a platform fee and the creator's revenue. The fee is rounded to the nearest cent, half
/// away from zero, and the creator receives the remainder, so the two always add up to the line price.
pub fn split_revenue(items: &[OrderLineItem]) -> Vec<NewRevenueShare> {
    items
        .iter()
        .map(|item| {
            let platform_fee = item.price.apply_basis_points(PLATFORM_FEE_BPS);
            NewRevenueShare {
                order_id: item.order_id.clone(),
                solution_id: item.solution_id.clone(),
                creator_id: item.creator_id.clone(),
                total_amount: item.price,
                platform_fee,
                creator_revenue: item.price - platform_fee,
            }
        })
        .collect()
}
