//! Trailing limit-sell monitor for volume mode.
//!
//! Instead of dumping the position at market, a limit sell trails the price
//! upward: every new high re-prices the order, a drop through the deviation
//! threshold locks the sale in near the top. The monitor runs as its own
//! task and reports how the cycle ended.

use crate::exchange::{ExchangeGateway, Order, OrderSide};
use crate::trading::balance::BalanceReconciler;
use crate::trading::deviation::PriceDeviationTracker;
use crate::trading::lifecycle::{OrderLifecycleManager, PlacementOutcome};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum spacing between re-prices of the resting sell.
const MIN_ADJUSTMENT_GAP: Duration = Duration::from_secs(3);

/// Consecutive failed sell placements before the cycle is abandoned.
const MAX_FAILED_SELLS: u32 = 3;

/// Consecutive below-minimum balance polls (with nothing resting) that count
/// as a fully liquidated position.
const ZERO_BALANCE_POLLS_TO_COMPLETE: u32 = 5;

/// How a trailing cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailingOutcome {
    /// The position sold out, the caller may start a new cycle.
    Completed,
    /// The stop flag was raised mid-cycle.
    Stopped,
    /// Too many consecutive sell failures.
    Aborted,
}

/// Owns one trailing sell cycle from first placement to liquidation.
pub struct TrailingMonitor {
    gateway: Arc<dyn ExchangeGateway>,
    symbol: String,
    deviation_pct: Decimal,
    lifecycle: OrderLifecycleManager,
    balance: BalanceReconciler,
    tracker: PriceDeviationTracker,
    stop: Arc<AtomicBool>,
}

impl TrailingMonitor {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        symbol: String,
        deviation_pct: Decimal,
        offset_pct: Decimal,
        min_trade_size: Decimal,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let lifecycle = OrderLifecycleManager::new(gateway.clone(), symbol.clone());
        let balance = BalanceReconciler::new(gateway.clone(), symbol.clone(), min_trade_size);
        Self {
            gateway,
            symbol,
            deviation_pct,
            lifecycle,
            balance,
            tracker: PriceDeviationTracker::new(offset_pct),
            stop,
        }
    }

    /// Drive the cycle to a terminal outcome.
    pub async fn run(mut self) -> TrailingOutcome {
        info!(symbol = %self.symbol, "Trailing monitor started");
        self.tracker.reset();

        let mut current_order: Option<Order> = None;
        let mut last_adjustment: Option<Instant> = None;
        let mut failed_sells = 0u32;
        let mut zero_balance_polls = 0u32;

        loop {
            if self.stop.load(Ordering::SeqCst) {
                if let Some(order) = &current_order {
                    let _ = self.lifecycle.cancel(&order.order_id).await;
                }
                return TrailingOutcome::Stopped;
            }
            tokio::time::sleep(POLL_INTERVAL).await;

            let price = match self.gateway.get_ticker(&self.symbol).await {
                Ok(ticker) => ticker.price,
                Err(e) => {
                    error!(symbol = %self.symbol, error = %e, "Ticker fetch failed");
                    continue;
                }
            };

            if self.balance.has_active_sell_orders().await {
                zero_balance_polls = 0;
                let Some(order) = current_order.clone() else {
                    continue;
                };

                let gap_elapsed =
                    last_adjustment.map_or(true, |t| t.elapsed() >= MIN_ADJUSTMENT_GAP);
                if gap_elapsed
                    && self
                        .tracker
                        .needs_adjustment(price, order.price, self.deviation_pct)
                {
                    match self.reprice(&order, price).await {
                        Ok(Some(replacement)) => {
                            current_order = Some(replacement);
                            last_adjustment = Some(Instant::now());
                            failed_sells = 0;
                        }
                        Ok(None) => current_order = None,
                        Err(()) => {
                            failed_sells += 1;
                            if failed_sells >= MAX_FAILED_SELLS {
                                error!(failed_sells, "Giving up on trailing sell");
                                return TrailingOutcome::Aborted;
                            }
                        }
                    }
                }
            } else {
                current_order = None;
                let available = self.balance.available_balance().await;

                if available >= self.balance.min_trade_size() {
                    zero_balance_polls = 0;
                    let size = self.balance.validate_sell_size(available).await;
                    if size <= Decimal::ZERO {
                        continue;
                    }
                    let target = self.tracker.ideal_trailing_price(price, self.deviation_pct);
                    match self.lifecycle.place_limit(OrderSide::Sell, size, target).await {
                        PlacementOutcome::Placed(order) => {
                            info!(order_id = %order.order_id, %target, %size, "Placed trailing sell");
                            self.tracker.observe(price);
                            current_order = Some(order);
                            last_adjustment = Some(Instant::now());
                            failed_sells = 0;
                        }
                        other => {
                            error!(outcome = ?other, "Trailing sell placement failed");
                            failed_sells += 1;
                            if failed_sells >= MAX_FAILED_SELLS {
                                error!(failed_sells, "Giving up on trailing sell");
                                return TrailingOutcome::Aborted;
                            }
                        }
                    }
                } else {
                    zero_balance_polls += 1;
                    if zero_balance_polls >= ZERO_BALANCE_POLLS_TO_COMPLETE {
                        // Anything left here is sub-minimum dust the
                        // exchange will not accept; abandon it.
                        if available > Decimal::ZERO {
                            info!(%available, "Leaving unsellable dust behind");
                        }
                        info!(symbol = %self.symbol, "Position liquidated, trailing cycle complete");
                        return TrailingOutcome::Completed;
                    }
                }
            }
        }
    }

    /// Cancel the resting sell and replace it at the current ideal trailing
    /// price for whatever is still unfilled.
    ///
    /// `Ok(None)` means nothing remained to re-price. `Err` counts against
    /// the failed-sell budget.
    async fn reprice(&mut self, order: &Order, price: Decimal) -> Result<Option<Order>, ()> {
        let state = self.lifecycle.order_state(&order.order_id).await;
        let remaining = state.remaining_size();
        if remaining <= Decimal::ZERO {
            info!(order_id = %order.order_id, "Trailing sell fully executed");
            return Ok(None);
        }

        if !self.lifecycle.cancel(&order.order_id).await.confirmed() {
            warn!(order_id = %order.order_id, "Trailing sell cancel unconfirmed, keeping it");
            return Ok(Some(order.clone()));
        }

        let target = self.tracker.ideal_trailing_price(price, self.deviation_pct);
        match self
            .lifecycle
            .place_limit(OrderSide::Sell, remaining, target)
            .await
        {
            PlacementOutcome::Placed(replacement) => {
                info!(
                    order_id = %replacement.order_id,
                    %target,
                    %remaining,
                    "Re-priced trailing sell"
                );
                Ok(Some(replacement))
            }
            other => {
                error!(outcome = ?other, "Failed to replace trailing sell");
                Err(())
            }
        }
    }
}
