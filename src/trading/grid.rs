//! Grid level computation.
//!
//! Pure: given identical inputs (including the pair snapshot and balance,
//! which the caller fetches), the output is identical.

use crate::error::BotError;
use crate::exchange::PairInfo;
use crate::utils::decimal::floor_dp;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, warn};

/// Safety buffer applied to computed sizes (0.2%) against price movement and
/// fees between computation and placement.
const SIZE_BUFFER: Decimal = dec!(0.998);

/// Decimal places sizes are floored to before placement.
const SIZE_DECIMALS: u32 = 4;

/// A planned, not-yet-placed buy order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridLevel {
    pub price: Decimal,
    pub size: Decimal,
}

impl GridLevel {
    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Size an order for the given capital share, honoring the pair minimums.
///
/// Returns `None` when the buffered, floored size falls below the pair's
/// minimum size or notional.
fn level_size(price: Decimal, capital_share: Decimal, pair: &PairInfo) -> Option<Decimal> {
    if price <= Decimal::ZERO {
        return None;
    }
    let size = floor_dp(capital_share / price * SIZE_BUFFER, SIZE_DECIMALS);
    if size < pair.min_size || price * size < pair.min_notional {
        return None;
    }
    Some(size)
}

/// Compute a descending ladder of buy levels below the current price.
///
/// Capital is clamped to the available balance. Levels whose notional would
/// fall below the pair minimum are dropped; if none survive, a single level
/// at the current price with the entire clamped capital is attempted as a
/// fallback. The returned ladder may be empty if even the fallback is too
/// small.
pub fn compute_grid(
    current_price: Decimal,
    capital: Decimal,
    num_orders: u32,
    spread_pct: Decimal,
    first_offset_pct: Decimal,
    pair: &PairInfo,
    available_balance: Decimal,
) -> Result<Vec<GridLevel>, BotError> {
    let capital = capital.min(available_balance);
    if capital <= Decimal::ZERO {
        return Err(BotError::InsufficientCapital);
    }

    let hundred = dec!(100);
    let first_price = current_price * (Decimal::ONE - first_offset_pct / hundred);

    let mut levels = Vec::with_capacity(num_orders as usize);

    if num_orders == 1 {
        if let Some(size) = level_size(first_price, capital, pair) {
            levels.push(GridLevel {
                price: first_price,
                size,
            });
        }
    } else {
        let step = (spread_pct / hundred) / Decimal::from(num_orders - 1);
        let capital_share = capital / Decimal::from(num_orders);

        for i in 0..num_orders {
            let price = first_price * (Decimal::ONE - step * Decimal::from(i));
            match level_size(price, capital_share, pair) {
                Some(size) => levels.push(GridLevel { price, size }),
                None => debug!(%price, "Dropping grid level below pair minimums"),
            }
        }
    }

    // All levels too small: fall back to one order with the whole capital at
    // the current price. May still come up empty.
    if levels.is_empty() {
        warn!(%capital, "No valid grid levels, trying single order with full capital");
        if let Some(size) = level_size(current_price, capital, pair) {
            levels.push(GridLevel {
                price: current_price,
                size,
            });
        }
    }

    Ok(levels)
}
