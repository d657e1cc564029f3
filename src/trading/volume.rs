//! Volume-mode engine: buy via the grid, then liquidate after a randomized
//! delay, either at market or through a trailing limit sell.

use crate::config::{TradingConfig, TradingMode};
use crate::error::BotError;
use crate::exchange::{ExchangeGateway, Order};
use crate::trading::balance::BalanceReconciler;
use crate::trading::delay::DelayScheduler;
use crate::trading::engine::{arm_grid, upward_drift_exceeds};
use crate::trading::lifecycle::{OrderLifecycleManager, PlacementOutcome};
use crate::trading::position::PositionTracker;
use crate::trading::trailing::{TrailingMonitor, TrailingOutcome};
use crate::trading::EngineEvent;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Volume-strategy driver.
pub struct VolumeEngine {
    gateway: Arc<dyn ExchangeGateway>,
    config: TradingConfig,
    lifecycle: OrderLifecycleManager,
    position: PositionTracker,
    grid_orders: HashMap<String, Order>,
    delay: DelayScheduler,
    stop: Arc<AtomicBool>,
    events: mpsc::Sender<EngineEvent>,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl VolumeEngine {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        config: TradingConfig,
        stop: Arc<AtomicBool>,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let lifecycle = OrderLifecycleManager::new(gateway.clone(), config.symbol.clone());
        let delay = DelayScheduler::new(config.delay_min_secs, config.delay_max_secs);
        Self {
            gateway,
            config,
            lifecycle,
            position: PositionTracker::new(),
            grid_orders: HashMap::new(),
            delay,
            stop,
            events,
            poll_interval: POLL_INTERVAL,
            error_backoff: ERROR_BACKOFF,
        }
    }

    /// Run until the stop flag is raised. Errors only when the initial grid
    /// cannot be placed.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let _ = self
            .events
            .send(EngineEvent::Started {
                mode: TradingMode::Volume,
            })
            .await;

        let mut balance = self.init().await?;

        while !self.stop.load(Ordering::SeqCst) {
            tokio::time::sleep(self.poll_interval).await;
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.poll_once(&mut balance).await {
                error!(error = %e, "Poll iteration failed, backing off");
                let _ = self.events.send(EngineEvent::Error(e.to_string())).await;
                tokio::time::sleep(self.error_backoff).await;
            }
        }

        self.shutdown().await;
        let _ = self.events.send(EngineEvent::Stopped).await;
        Ok(())
    }

    /// Fetch the pair snapshot, build the balance reconciler and arm the
    /// first grid.
    async fn init(&mut self) -> anyhow::Result<BalanceReconciler> {
        let pair = self.gateway.get_pair_info(&self.config.symbol).await?;
        let balance = BalanceReconciler::new(
            self.gateway.clone(),
            self.config.symbol.clone(),
            pair.min_size,
        );
        self.arm().await?;
        Ok(balance)
    }

    async fn arm(&mut self) -> anyhow::Result<()> {
        self.grid_orders = arm_grid(&self.gateway, &self.lifecycle, &self.config).await?;
        let _ = self
            .events
            .send(EngineEvent::GridArmed {
                levels: self.grid_orders.len(),
            })
            .await;
        Ok(())
    }

    async fn poll_once(&mut self, balance: &mut BalanceReconciler) -> anyhow::Result<()> {
        // No ladder on the book: either a liquidation is pending from an
        // earlier failed attempt, or the cycle is done and a new grid waits
        // on the balance gate.
        if self.grid_orders.is_empty() {
            if self.position.size() > Decimal::ZERO {
                return self.liquidate(balance).await;
            }
            if balance.can_start_new_cycle().await {
                self.arm().await?;
            }
            return Ok(());
        }

        let active = self
            .gateway
            .get_active_orders(Some(&self.config.symbol))
            .await
            .map_err(|e| BotError::Transient(e.to_string()))?;
        let active_ids: HashSet<&str> = active.iter().map(|o| o.order_id.as_str()).collect();

        // Same disappearance heuristic as grid mode.
        let filled: Vec<Order> = self
            .grid_orders
            .values()
            .filter(|o| !active_ids.contains(o.order_id.as_str()))
            .cloned()
            .collect();
        for order in &filled {
            self.grid_orders.remove(&order.order_id);
            info!(order_id = %order.order_id, price = %order.price, size = %order.size, "Grid level filled");
            self.position.record_fill(order.price, order.size);
            let _ = self
                .events
                .send(EngineEvent::FillDetected {
                    order_id: order.order_id.clone(),
                    price: order.price,
                    size: order.size,
                })
                .await;
        }
        if !filled.is_empty() {
            return self.liquidate(balance).await;
        }

        // Nothing filled: chase the market upward.
        let ticker = self.gateway.get_ticker(&self.config.symbol).await?;
        let highest = self
            .grid_orders
            .values()
            .map(|o| o.price)
            .max()
            .unwrap_or(Decimal::ZERO);
        if upward_drift_exceeds(ticker.price, highest, self.config.price_deviation_pct) {
            warn!(
                price = %ticker.price,
                %highest,
                "Price drifted above the grid, re-arming"
            );
            self.cancel_tracked_grid().await;
            self.arm().await?;
        }
        Ok(())
    }

    /// Sell the accumulated position after the randomized delay.
    ///
    /// The remaining buy ladder is cancelled first so the position stops
    /// growing mid-liquidation. On failure the position is kept and the next
    /// poll retries the whole sequence.
    async fn liquidate(&mut self, balance: &mut BalanceReconciler) -> anyhow::Result<()> {
        self.cancel_tracked_grid().await;

        let delay = self.delay.sample_delay();
        info!(secs = delay.as_secs_f64(), "Waiting before liquidation");
        let countdown = tokio::spawn(DelayScheduler::countdown(
            delay,
            self.stop.clone(),
            self.events.clone(),
        ));
        let _ = countdown.await;
        if self.stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        if self.config.use_trailing {
            let monitor = TrailingMonitor::new(
                self.gateway.clone(),
                self.config.symbol.clone(),
                self.config.price_deviation_pct,
                self.config.first_order_offset_pct,
                balance.min_trade_size(),
                self.stop.clone(),
            );
            let outcome = match tokio::spawn(monitor.run()).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Trailing monitor task failed");
                    TrailingOutcome::Aborted
                }
            };
            match outcome {
                TrailingOutcome::Completed => self.complete_cycle().await,
                TrailingOutcome::Stopped => Ok(()),
                TrailingOutcome::Aborted => {
                    anyhow::bail!("trailing sell aborted after repeated failures")
                }
            }
        } else {
            let size = balance.validate_sell_size(self.position.size()).await;
            if size <= Decimal::ZERO {
                warn!("Nothing sellable, treating cycle as complete");
                return self.complete_cycle().await;
            }
            match self.lifecycle.place_market_sell(size).await {
                PlacementOutcome::Placed(order) => {
                    info!(order_id = %order.order_id, %size, "Sold position at market");
                    self.complete_cycle().await
                }
                PlacementOutcome::AssumedComplete => {
                    warn!("Market sell assumed already complete");
                    self.complete_cycle().await
                }
                other => anyhow::bail!("market sell failed: {:?}", other),
            }
        }
    }

    async fn complete_cycle(&mut self) -> anyhow::Result<()> {
        self.position.clear();
        let _ = self.events.send(EngineEvent::CycleCompleted).await;
        Ok(())
    }

    async fn cancel_tracked_grid(&mut self) {
        for (order_id, _) in self.grid_orders.drain() {
            let outcome = self.lifecycle.cancel(&order_id).await;
            if !outcome.confirmed() {
                warn!(%order_id, ?outcome, "Grid order cancel unconfirmed");
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down, cancelling tracked orders");
        self.cancel_tracked_grid().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::{test_pair, MockExchange};
    use crate::exchange::{OrderSide, OrderType};
    use rust_decimal_macros::dec;

    async fn scripted_exchange() -> Arc<MockExchange> {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_pair(test_pair()).await;
        exchange.set_price("ETH_USDT", dec!(100)).await;
        exchange.set_balance("USDT", dec!(1000), dec!(1000)).await;
        exchange.set_balance("ETH", Decimal::ZERO, Decimal::ZERO).await;
        exchange
    }

    fn engine(exchange: &Arc<MockExchange>) -> VolumeEngine {
        let (tx, rx) = mpsc::channel(256);
        std::mem::forget(rx);
        let config = TradingConfig {
            capital: dec!(100),
            mode: TradingMode::Volume,
            delay_min_secs: 0.0,
            delay_max_secs: 0.0,
            ..TradingConfig::default()
        };
        VolumeEngine::new(
            exchange.clone() as Arc<dyn ExchangeGateway>,
            config,
            Arc::new(AtomicBool::new(false)),
            tx,
        )
    }

    #[tokio::test]
    async fn test_fill_liquidates_at_market() {
        let exchange = scripted_exchange().await;
        let mut engine = engine(&exchange);
        let mut balance = engine.init().await.unwrap();
        assert_eq!(exchange.active_order_count().await, 5);

        let filled = exchange.active_orders_snapshot().await[0].clone();
        exchange.fill_order(&filled.order_id).await;
        exchange.set_balance("ETH", filled.size, filled.size).await;

        engine.poll_once(&mut balance).await.unwrap();

        // Ladder torn down, position flat again.
        assert_eq!(exchange.active_order_count().await, 0);
        assert_eq!(engine.position.size(), Decimal::ZERO);

        // The market sell is clamped to 99.9% of the holding.
        let history = exchange
            .get_order_history(Some("ETH_USDT"), 50)
            .await
            .unwrap();
        let sell = history
            .iter()
            .find(|o| o.side == OrderSide::Sell && o.order_type == OrderType::Market)
            .expect("market sell in history");
        assert_eq!(sell.size, filled.size * dec!(0.999));
    }

    #[tokio::test]
    async fn test_new_cycle_waits_for_liquidated_balance() {
        let exchange = scripted_exchange().await;
        let mut engine = engine(&exchange);
        let mut balance = engine.init().await.unwrap();

        let filled = exchange.active_orders_snapshot().await[0].clone();
        exchange.fill_order(&filled.order_id).await;
        exchange.set_balance("ETH", filled.size, filled.size).await;
        engine.poll_once(&mut balance).await.unwrap();

        // Base asset still held: the gate stays shut.
        engine.poll_once(&mut balance).await.unwrap();
        assert_eq!(exchange.active_order_count().await, 0);

        // Holding gone: next poll re-arms the grid.
        exchange.set_balance("ETH", Decimal::ZERO, Decimal::ZERO).await;
        engine.poll_once(&mut balance).await.unwrap();
        assert_eq!(exchange.active_order_count().await, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_market_sell_retries_through_transient_failures() {
        let exchange = scripted_exchange().await;
        let mut engine = engine(&exchange);
        let mut balance = engine.init().await.unwrap();

        let filled = exchange.active_orders_snapshot().await[0].clone();
        exchange.fill_order(&filled.order_id).await;
        exchange.set_balance("ETH", filled.size, filled.size).await;

        exchange.fail_next_placements(2).await;
        engine.poll_once(&mut balance).await.unwrap();

        assert_eq!(engine.position.size(), Decimal::ZERO);
        let history = exchange
            .get_order_history(Some("ETH_USDT"), 50)
            .await
            .unwrap();
        assert!(history.iter().any(|o| o.order_type == OrderType::Market));
    }

    #[tokio::test]
    async fn test_upward_drift_rearms_ladder() {
        let exchange = scripted_exchange().await;
        let mut engine = engine(&exchange);
        let mut balance = engine.init().await.unwrap();
        let old_ids: Vec<String> = engine.grid_orders.keys().cloned().collect();

        exchange.set_price("ETH_USDT", dec!(110)).await;
        engine.poll_once(&mut balance).await.unwrap();

        assert_eq!(engine.grid_orders.len(), 5);
        assert!(engine.grid_orders.keys().all(|id| !old_ids.contains(id)));
    }

    #[tokio::test]
    async fn test_dust_position_completes_without_sell() {
        let exchange = scripted_exchange().await;
        let mut engine = engine(&exchange);
        let mut balance = engine.init().await.unwrap();

        let filled = exchange.active_orders_snapshot().await[0].clone();
        exchange.fill_order(&filled.order_id).await;
        // Holding below the pair minimum: nothing sellable.
        exchange.set_balance("ETH", dec!(0.0001), dec!(0.0001)).await;

        engine.poll_once(&mut balance).await.unwrap();

        assert_eq!(engine.position.size(), Decimal::ZERO);
        let history = exchange
            .get_order_history(Some("ETH_USDT"), 50)
            .await
            .unwrap();
        assert!(!history.iter().any(|o| o.order_type == OrderType::Market));
    }
}
