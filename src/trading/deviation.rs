//! High-water-mark price tracking and trailing re-price decisions.

use crate::utils::decimal::percentage_diff;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

/// Re-price buffer: a resting order within 0.5% of the ideal trailing price
/// is left alone to avoid constant adjustments.
const ADJUSTMENT_BUFFER_PCT: Decimal = dec!(0.5);

/// Tracks the highest observed price per sell cycle and decides when a
/// resting order's price has drifted enough to re-price.
#[derive(Debug)]
pub struct PriceDeviationTracker {
    high_water_mark: Option<Decimal>,
    /// Sell-side markup applied on top of the trailing floor. Reuses the
    /// grid's first-order offset parameter; see DESIGN notes, this parameter
    /// name predates the trailing feature.
    first_order_offset_pct: Decimal,
}

impl PriceDeviationTracker {
    pub fn new(first_order_offset_pct: Decimal) -> Self {
        Self {
            high_water_mark: None,
            first_order_offset_pct,
        }
    }

    /// Forget the high-water mark at the start of a new sell cycle.
    pub fn reset(&mut self) {
        self.high_water_mark = None;
    }

    pub fn high_water_mark(&self) -> Option<Decimal> {
        self.high_water_mark
    }

    /// Record an observed price, updating the high-water mark.
    pub fn observe(&mut self, price: Decimal) {
        if self.high_water_mark.map_or(true, |hwm| price > hwm) {
            self.high_water_mark = Some(price);
        }
    }

    /// Decide whether the resting order at `order_price` needs re-pricing
    /// given the latest market price.
    ///
    /// A new high always signals adjustment. A drop beyond the deviation
    /// threshold resets the mark to the current price and signals. Otherwise
    /// the order is compared to the ideal trailing price with a 0.5% buffer.
    pub fn needs_adjustment(
        &mut self,
        current_price: Decimal,
        order_price: Decimal,
        deviation_pct: Decimal,
    ) -> bool {
        if current_price <= Decimal::ZERO || order_price <= Decimal::ZERO {
            return false;
        }

        let hwm = match self.high_water_mark {
            Some(hwm) if current_price <= hwm => hwm,
            _ => {
                // New high: trail upward.
                self.high_water_mark = Some(current_price);
                return true;
            }
        };

        let drop_pct = (hwm - current_price) / hwm * dec!(100);
        if drop_pct > deviation_pct {
            // Fell through the trailing floor: restart tracking from here.
            debug!(%drop_pct, %deviation_pct, "Price dropped through deviation threshold");
            self.high_water_mark = Some(current_price);
            return true;
        }

        let ideal = self.ideal_trailing_price(current_price, deviation_pct);
        if ideal <= Decimal::ZERO {
            return false;
        }
        percentage_diff(order_price, ideal) > ADJUSTMENT_BUFFER_PCT
    }

    /// The trailing-stop floor marked up by the configured offset:
    /// `max(current, hwm * (1 - deviation/100)) * (1 + offset/100)`.
    pub fn ideal_trailing_price(&self, current_price: Decimal, deviation_pct: Decimal) -> Decimal {
        let reference = self.high_water_mark.unwrap_or(current_price);
        let floor = reference * (Decimal::ONE - deviation_pct / dec!(100));
        let trailing = current_price.max(floor);
        trailing * (Decimal::ONE + self.first_order_offset_pct / dec!(100))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_new_high_signals_adjustment() {
        let mut tracker = PriceDeviationTracker::new(dec!(0.02));
        for price in [dec!(100), dec!(101), dec!(102), dec!(105)] {
            assert!(tracker.needs_adjustment(price, dec!(100), dec!(2)));
            assert_eq!(tracker.high_water_mark(), Some(price));
        }
    }

    #[test]
    fn test_small_dip_within_buffer_is_quiet() {
        let mut tracker = PriceDeviationTracker::new(dec!(0));
        assert!(tracker.needs_adjustment(dec!(100), dec!(100), dec!(5)));

        // 1% below the mark, under the 5% threshold; order sits exactly at
        // the ideal trailing price (= max(99, 95) with zero offset).
        assert!(!tracker.needs_adjustment(dec!(99), dec!(99), dec!(5)));
    }

    #[test]
    fn test_drop_through_threshold_resets_mark() {
        let mut tracker = PriceDeviationTracker::new(dec!(0));
        tracker.observe(dec!(100));

        assert!(tracker.needs_adjustment(dec!(90), dec!(99), dec!(5)));
        assert_eq!(tracker.high_water_mark(), Some(dec!(90)));
    }

    #[test]
    fn test_stale_order_price_triggers_repricing() {
        let mut tracker = PriceDeviationTracker::new(dec!(0));
        tracker.observe(dec!(100));

        // Price holds just under the mark, but the resting order is 3% off
        // the ideal trailing price.
        assert!(tracker.needs_adjustment(dec!(99.5), dec!(96.5), dec!(5)));
    }

    #[test]
    fn test_ideal_trailing_price_formula() {
        let mut tracker = PriceDeviationTracker::new(dec!(1));
        tracker.observe(dec!(100));

        // floor = 100 * 0.95 = 95; current 97 above floor; markup 1%.
        assert_eq!(tracker.ideal_trailing_price(dec!(97), dec!(5)), dec!(97.97));

        // Current below the floor: floor wins.
        let expected = dec!(95) * dec!(1.01);
        assert_eq!(tracker.ideal_trailing_price(dec!(90), dec!(5)), expected);
    }

    #[test]
    fn test_reset_forgets_mark() {
        let mut tracker = PriceDeviationTracker::new(dec!(0));
        tracker.observe(dec!(100));
        tracker.reset();
        assert_eq!(tracker.high_water_mark(), None);

        // Without a mark, the current price becomes the reference.
        assert_eq!(tracker.ideal_trailing_price(dec!(50), dec!(5)), dec!(50));
    }
}
