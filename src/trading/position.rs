//! Running cost-basis tracking across sequential fills.

use crate::error::BotError;
use crate::utils::decimal::weighted_average;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

/// A recorded buy fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fill {
    pub price: Decimal,
    pub size: Decimal,
}

/// Current open position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Volume-weighted average entry price.
    pub entry_price: Decimal,
    /// Cumulative filled size.
    pub size: Decimal,
}

/// Tracks the weighted-average cost basis of the current cycle.
///
/// The average is recomputed from the full fill record on every update
/// rather than incrementally, so repeated fills cannot accumulate drift.
#[derive(Debug, Default)]
pub struct PositionTracker {
    fills: Vec<Fill>,
    position: Option<Position>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a buy fill and recompute the average entry.
    pub fn record_fill(&mut self, price: Decimal, size: Decimal) {
        if price <= Decimal::ZERO || size <= Decimal::ZERO {
            tracing::error!(%price, %size, "Ignoring fill with invalid execution data");
            return;
        }

        self.fills.push(Fill { price, size });

        let total_size: Decimal = self.fills.iter().map(|f| f.size).sum();
        let entry_price = weighted_average(
            &self
                .fills
                .iter()
                .map(|f| (f.price, f.size))
                .collect::<Vec<_>>(),
        );

        self.position = Some(Position {
            entry_price,
            size: total_size,
        });
        info!(%entry_price, %total_size, fills = self.fills.len(), "Updated position");
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    /// Total filled size of the current cycle, zero if flat.
    pub fn size(&self) -> Decimal {
        self.position.map(|p| p.size).unwrap_or(Decimal::ZERO)
    }

    /// Entry price marked up by the target profit percentage.
    pub fn take_profit_price(&self, profit_pct: Decimal) -> Result<Decimal, BotError> {
        let position = self.position.ok_or(BotError::NoPosition)?;
        Ok(position.entry_price * (Decimal::ONE + profit_pct / dec!(100)))
    }

    /// Drop the position and the fill record. Called on cycle completion.
    pub fn clear(&mut self) {
        info!("Clearing position and fill record");
        self.fills.clear();
        self.position = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_average_is_exact() {
        let mut tracker = PositionTracker::new();
        tracker.record_fill(dec!(10), dec!(1));
        tracker.record_fill(dec!(20), dec!(1));

        let position = tracker.position().unwrap();
        assert_eq!(position.entry_price, dec!(15));
        assert_eq!(position.size, dec!(2));
    }

    #[test]
    fn test_uneven_sizes_weighted() {
        let mut tracker = PositionTracker::new();
        tracker.record_fill(dec!(100), dec!(3));
        tracker.record_fill(dec!(200), dec!(1));

        // (100*3 + 200*1) / 4 = 125
        assert_eq!(tracker.position().unwrap().entry_price, dec!(125));
    }

    #[test]
    fn test_take_profit_price() {
        let mut tracker = PositionTracker::new();
        tracker.record_fill(dec!(100), dec!(1));
        assert_eq!(tracker.take_profit_price(dec!(2)).unwrap(), dec!(102));
    }

    #[test]
    fn test_take_profit_without_position_fails() {
        let tracker = PositionTracker::new();
        assert!(matches!(
            tracker.take_profit_price(dec!(1)),
            Err(BotError::NoPosition)
        ));
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut tracker = PositionTracker::new();
        tracker.record_fill(dec!(10), dec!(1));
        tracker.clear();

        assert!(tracker.position().is_none());
        assert_eq!(tracker.size(), Decimal::ZERO);
        assert!(matches!(
            tracker.take_profit_price(dec!(1)),
            Err(BotError::NoPosition)
        ));
    }

    #[test]
    fn test_invalid_fill_ignored() {
        let mut tracker = PositionTracker::new();
        tracker.record_fill(Decimal::ZERO, dec!(1));
        tracker.record_fill(dec!(10), Decimal::ZERO);
        assert!(tracker.position().is_none());
    }
}
