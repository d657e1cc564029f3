//! Decimal arithmetic utilities for financial calculations.

use rust_decimal::prelude::RoundingStrategy;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Number of decimal places implied by a tick/lot size (e.g. 0.01 -> 2).
pub fn tick_decimals(tick: Decimal) -> u32 {
    tick.normalize().scale()
}

/// Floor a value to a fixed number of decimal places.
pub fn floor_dp(value: Decimal, decimals: u32) -> Decimal {
    value.round_dp_with_strategy(decimals, RoundingStrategy::ToZero)
}

/// Percentage difference of `a` relative to `b`.
pub fn percentage_diff(a: Decimal, b: Decimal) -> Decimal {
    if b == Decimal::ZERO {
        return Decimal::ZERO;
    }
    ((a - b) / b).abs() * dec!(100)
}

/// Volume-weighted average over (value, weight) pairs.
pub fn weighted_average(values: &[(Decimal, Decimal)]) -> Decimal {
    let (sum, weight_sum) = values.iter().fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(sum, weight_sum), (val, weight)| (sum + val * weight, weight_sum + weight),
    );

    if weight_sum == Decimal::ZERO {
        Decimal::ZERO
    } else {
        sum / weight_sum
    }
}
