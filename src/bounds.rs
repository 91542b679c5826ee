//! Exact integer helpers for the allocation search.
//!
//! This module provides the arithmetic the search relies on: converting an
//! amount into bundle units, bounding the number of blocks worth trying and
//! comparing average bundle values without leaving integer arithmetic.

use std::cmp::Ordering;

use crate::model::{DenominationSet, StockLevels};

/// Converts a monetary amount into bundle units.
///
/// # Returns
/// `Some(amount / bundle_size)` when the amount is positive and divisible by
/// the bundle size, otherwise `None` (an empty search space).
///
/// # Examples
/// ```ignore
/// assert_eq!(target_units(750_000, 100), Some(7_500));
/// assert_eq!(target_units(750_050, 100), None);
/// ```
pub fn target_units(amount: u64, bundle_size: u64) -> Option<u64> {
    if amount == 0 || bundle_size == 0 || amount % bundle_size != 0 {
        return None;
    }
    Some(amount / bundle_size)
}

/// Upper bound for the outer block-count loop of the grouped search.
///
/// The minimum of the count implied by spending the whole amount on the
/// smallest denomination and the total stock expressed in whole blocks.
/// An over-approximation: it only keeps the loop finite.
pub fn max_block_count(
    amount: u64,
    denominations: &DenominationSet,
    stock: &StockLevels,
    bundle_size: u64,
    block_size: u64,
) -> u64 {
    if block_size == 0 {
        return 0;
    }

    // A product that overflows u64 is larger than any u64 amount.
    let theoretical = denominations
        .smallest()
        .checked_mul(bundle_size)
        .and_then(|v| v.checked_mul(block_size))
        .map_or(0, |per_block| amount / per_block);

    match stock.total_bundles() {
        Some(total) => theoretical.min(total / block_size),
        None => theoretical,
    }
}

/// Compares the averages `value_a / count_a` and `value_b / count_b`.
///
/// Cross-multiplies in `u128`, so the comparison is exact. A zero count is
/// treated as an average of zero.
#[inline]
pub fn compare_averages(value_a: u64, count_a: u64, value_b: u64, count_b: u64) -> Ordering {
    match (count_a, count_b) {
        (0, 0) => Ordering::Equal,
        (0, _) => 0u64.cmp(&value_b),
        (_, 0) => value_a.cmp(&0),
        _ => {
            let lhs = u128::from(value_a) * u128::from(count_b);
            let rhs = u128::from(value_b) * u128::from(count_a);
            lhs.cmp(&rhs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StockMap;

    fn usd() -> DenominationSet {
        DenominationSet::new(vec![100, 50, 20, 10]).unwrap()
    }

    #[test]
    fn target_units_requires_divisibility() {
        assert_eq!(target_units(300_000, 100), Some(3_000));
        assert_eq!(target_units(100, 100), Some(1));
        assert_eq!(target_units(150, 100), None);
        assert_eq!(target_units(0, 100), None);
        assert_eq!(target_units(100, 0), None);
    }

    #[test]
    fn block_bound_uses_smallest_denomination_when_unlimited() {
        let levels = StockLevels::normalize(&usd(), None);
        // 300000 / (10 * 100 * 30) = 10
        assert_eq!(max_block_count(300_000, &usd(), &levels, 100, 30), 10);
    }

    #[test]
    fn block_bound_respects_total_stock() {
        let stock = StockMap::from([(100, 18), (50, 40), (20, 0), (10, 5)]);
        let levels = StockLevels::normalize(&usd(), Some(&stock));
        // theoretical 25, stock 63 / 30 = 2
        assert_eq!(max_block_count(750_000, &usd(), &levels, 100, 30), 2);
    }

    #[test]
    fn block_bound_survives_overflowing_products() {
        let huge = DenominationSet::new(vec![u64::MAX / 2]).unwrap();
        let levels = StockLevels::normalize(&huge, None);
        assert_eq!(max_block_count(u64::MAX, &huge, &levels, 100, 30), 0);
        assert_eq!(max_block_count(300_000, &usd(), &levels, 100, 0), 0);
    }

    #[test]
    fn averages_compare_exactly() {
        assert_eq!(compare_averages(200, 2, 100, 1), Ordering::Equal);
        assert_eq!(compare_averages(201, 2, 100, 1), Ordering::Greater);
        assert_eq!(compare_averages(1, 3, 1, 2), Ordering::Less);
        assert_eq!(compare_averages(0, 0, 0, 0), Ordering::Equal);
        assert_eq!(compare_averages(u64::MAX, u64::MAX, u64::MAX - 1, u64::MAX), Ordering::Greater);
    }
}
