//! Fixed-precision decimal arithmetic for monetary and quantity fields.
//!
//! All totals are computed in the service layer and rounded here before
//! persistence; the database only ever stores rounded values.

use rust_decimal::{Decimal, RoundingStrategy};

/// Fractional digits carried by monetary amounts.
pub const MONEY_SCALE: u32 = 2;

/// Fractional digits carried by tax rates.
pub const RATE_SCALE: u32 = 4;

/// Round a monetary amount half-up to 2 fractional digits.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a tax rate half-up to 4 fractional digits.
pub fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RATE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Weighted-average cost after receiving `new_qty` units at `new_cost`
/// into a pool of `on_hand` units carried at `average_cost`.
///
/// Returns the carried cost unchanged when the combined quantity is zero.
pub fn weighted_average_cost(
    average_cost: Decimal,
    on_hand: Decimal,
    new_cost: Decimal,
    new_qty: Decimal,
) -> Decimal {
    let combined = on_hand + new_qty;
    if combined.is_zero() {
        return average_cost;
    }
    let blended = (average_cost * on_hand + new_cost * new_qty) / combined;
    blended.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_round_money_half_up() {
        assert_eq!(round_money(dec!(10.005)), dec!(10.01));
        assert_eq!(round_money(dec!(10.004)), dec!(10.00));
        assert_eq!(round_money(dec!(-10.005)), dec!(-10.01));
    }

    #[test]
    fn test_round_rate_scale() {
        assert_eq!(round_rate(dec!(0.08755)), dec!(0.0876));
        assert_eq!(round_rate(dec!(8.25)), dec!(8.2500));
    }

    #[test]
    fn test_weighted_average_cost() {
        // 10 @ 25.00 into an empty pool
        assert_eq!(
            weighted_average_cost(dec!(0), dec!(0), dec!(25.00), dec!(10)),
            dec!(25)
        );
        // 5 @ 40.00 into 10 @ 25.00 -> 30.00
        assert_eq!(
            weighted_average_cost(dec!(25.00), dec!(10), dec!(40.00), dec!(5)),
            dec!(30.00)
        );
    }

    #[test]
    fn test_weighted_average_cost_zero_pool() {
        // Degenerate receipt of zero quantity keeps the carried cost.
        assert_eq!(
            weighted_average_cost(dec!(12.50), dec!(0), dec!(99.00), dec!(0)),
            dec!(12.50)
        );
    }
}
