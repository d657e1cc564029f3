//! Grid-mode engine: a descending buy ladder with one take-profit sell.
//!
//! The loop polls the active-order snapshot. Tracked orders missing from the
//! snapshot are booked as fills; each fill refreshes the take-profit order at
//! the new weighted-average entry. When the take-profit itself disappears the
//! cycle is complete and the grid is re-armed.

use crate::config::{TradingConfig, TradingMode};
use crate::error::BotError;
use crate::exchange::{ExchangeGateway, Order, OrderSide};
use crate::trading::grid::compute_grid;
use crate::trading::lifecycle::{OrderLifecycleManager, PlacementOutcome};
use crate::trading::position::PositionTracker;
use crate::trading::EngineEvent;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Seconds between active-order polls.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Back-off after a failed poll iteration.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Quote asset of a pair symbol ("USDT" for "ETH_USDT").
fn quote_currency(symbol: &str) -> &str {
    symbol.split(['_', '/']).nth(1).unwrap_or("USDT")
}

/// Whether the market has run upward past the top of the ladder by more than
/// the configured deviation.
pub(crate) fn upward_drift_exceeds(
    current_price: Decimal,
    highest_order_price: Decimal,
    deviation_pct: Decimal,
) -> bool {
    if highest_order_price <= Decimal::ZERO {
        return false;
    }
    let drift_pct = (current_price - highest_order_price) / highest_order_price * dec!(100);
    drift_pct > deviation_pct
}

/// Fetch market data, size the ladder and place it.
///
/// Shared by both engines. Placement stops early when the exchange reports
/// the quote balance exhausted; individually failed levels are skipped.
/// Errors when market data is unavailable or no order ends up on the book.
pub(crate) async fn arm_grid(
    gateway: &Arc<dyn ExchangeGateway>,
    lifecycle: &OrderLifecycleManager,
    config: &TradingConfig,
) -> anyhow::Result<HashMap<String, Order>> {
    let symbol = config.symbol.as_str();
    let ticker = gateway.get_ticker(symbol).await?;
    let pair = gateway.get_pair_info(symbol).await?;
    if pair.min_size <= Decimal::ZERO || pair.min_tick_price <= Decimal::ZERO {
        return Err(BotError::InvalidPairConfiguration {
            symbol: symbol.to_string(),
            reason: "zero minimum size or tick".into(),
        }
        .into());
    }
    let quote = quote_currency(symbol);
    let available = gateway
        .get_balances()
        .await?
        .into_iter()
        .find(|b| b.symbol == quote)
        .map(|b| b.free)
        .unwrap_or(Decimal::ZERO);

    let levels = compute_grid(
        ticker.price,
        config.capital,
        config.num_orders,
        config.spread_pct,
        config.first_order_offset_pct,
        &pair,
        available,
    )?;
    if levels.is_empty() {
        anyhow::bail!("no grid level for {} clears the pair minimums", symbol);
    }
    info!(symbol, price = %ticker.price, levels = levels.len(), "Arming grid");

    let mut orders = HashMap::with_capacity(levels.len());
    let mut balance_exhausted = None;
    for level in levels {
        match lifecycle
            .place_limit(OrderSide::Buy, level.size, level.price)
            .await
        {
            PlacementOutcome::Placed(order) => {
                orders.insert(order.order_id.clone(), order);
            }
            PlacementOutcome::InsufficientBalance {
                available,
                required,
            } => {
                warn!(%available, %required, "Quote balance exhausted, stopping grid placement");
                balance_exhausted = Some((available, required));
                break;
            }
            other => warn!(outcome = ?other, price = %level.price, "Skipping grid level"),
        }
    }
    if orders.is_empty() {
        if let Some((available, required)) = balance_exhausted {
            return Err(BotError::InsufficientBalance {
                available,
                required,
            }
            .into());
        }
        anyhow::bail!("failed to place any grid order for {}", symbol);
    }
    Ok(orders)
}

/// Grid-strategy driver.
pub struct GridEngine {
    gateway: Arc<dyn ExchangeGateway>,
    config: TradingConfig,
    lifecycle: OrderLifecycleManager,
    position: PositionTracker,
    grid_orders: HashMap<String, Order>,
    take_profit: Option<Order>,
    /// Once a level fills, the ladder is anchored: no more drift regrids
    /// until the cycle completes.
    has_filled_orders: bool,
    stop: Arc<AtomicBool>,
    events: mpsc::Sender<EngineEvent>,
    poll_interval: Duration,
    error_backoff: Duration,
}

impl GridEngine {
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        config: TradingConfig,
        stop: Arc<AtomicBool>,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let lifecycle = OrderLifecycleManager::new(gateway.clone(), config.symbol.clone());
        Self {
            gateway,
            config,
            lifecycle,
            position: PositionTracker::new(),
            grid_orders: HashMap::new(),
            take_profit: None,
            has_filled_orders: false,
            stop,
            events,
            poll_interval: POLL_INTERVAL,
            error_backoff: ERROR_BACKOFF,
        }
    }

    /// Run until the stop flag is raised. Errors only when the initial grid
    /// cannot be placed; later setup failures are logged and retried on
    /// subsequent polls.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        let _ = self
            .events
            .send(EngineEvent::Started {
                mode: TradingMode::Grid,
            })
            .await;

        self.setup_grid().await?;

        while !self.stop.load(Ordering::SeqCst) {
            tokio::time::sleep(self.poll_interval).await;
            if self.stop.load(Ordering::SeqCst) {
                break;
            }
            if let Err(e) = self.poll_once().await {
                error!(error = %e, "Poll iteration failed, backing off");
                let _ = self.events.send(EngineEvent::Error(e.to_string())).await;
                tokio::time::sleep(self.error_backoff).await;
            }
        }

        self.shutdown().await;
        let _ = self.events.send(EngineEvent::Stopped).await;
        Ok(())
    }

    async fn setup_grid(&mut self) -> anyhow::Result<()> {
        self.grid_orders = arm_grid(&self.gateway, &self.lifecycle, &self.config).await?;
        self.has_filled_orders = false;
        let _ = self
            .events
            .send(EngineEvent::GridArmed {
                levels: self.grid_orders.len(),
            })
            .await;
        Ok(())
    }

    async fn poll_once(&mut self) -> anyhow::Result<()> {
        // A failed regrid leaves nothing tracked; retry setup until a ladder
        // is back on the book.
        if self.grid_orders.is_empty() && self.take_profit.is_none() {
            return self.setup_grid().await;
        }

        let active = self
            .gateway
            .get_active_orders(Some(&self.config.symbol))
            .await
            .map_err(|e| BotError::Transient(e.to_string()))?;
        let active_ids: HashSet<&str> = active.iter().map(|o| o.order_id.as_str()).collect();

        // The take-profit leaving the book closes the cycle.
        if let Some(tp) = &self.take_profit {
            if !active_ids.contains(tp.order_id.as_str()) {
                info!(order_id = %tp.order_id, "Take-profit left the book, cycle complete");
                self.take_profit = None;
                self.position.clear();
                self.cancel_tracked_grid().await;
                let _ = self.events.send(EngineEvent::CycleCompleted).await;
                return self.setup_grid().await;
            }
        }

        // Fill detection by disappearance: the active-order snapshot cannot
        // distinguish a fill from an external cancel, so any tracked order
        // missing from it is booked as filled at its limit price.
        let filled: Vec<Order> = self
            .grid_orders
            .values()
            .filter(|o| !active_ids.contains(o.order_id.as_str()))
            .cloned()
            .collect();
        for order in &filled {
            self.grid_orders.remove(&order.order_id);
            self.has_filled_orders = true;
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
            self.refresh_take_profit().await;
            return Ok(());
        }

        // Nothing filled yet: chase the market if it ran upward past the
        // ladder.
        if !self.has_filled_orders && !self.grid_orders.is_empty() {
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
                    deviation_pct = %self.config.price_deviation_pct,
                    "Price drifted above the grid, re-arming"
                );
                self.cancel_tracked_grid().await;
                return self.setup_grid().await;
            }
        }
        Ok(())
    }

    /// Replace the take-profit sell to cover the whole position at the
    /// current weighted-average entry plus the target margin.
    async fn refresh_take_profit(&mut self) {
        if let Some(stale) = self.take_profit.take() {
            if !self.lifecycle.cancel(&stale.order_id).await.confirmed() {
                warn!(order_id = %stale.order_id, "Stale take-profit cancel unconfirmed");
            }
        }

        let size = self.position.size();
        let price = match self
            .position
            .take_profit_price(self.config.target_profit_pct)
        {
            Ok(price) => price,
            Err(e) => {
                error!(error = %e, "Cannot compute take-profit price");
                return;
            }
        };

        match self.lifecycle.place_limit(OrderSide::Sell, size, price).await {
            PlacementOutcome::Placed(order) => {
                info!(order_id = %order.order_id, %price, %size, "Placed take-profit");
                self.take_profit = Some(order);
            }
            other => {
                error!(outcome = ?other, "Failed to place take-profit");
                let _ = self
                    .events
                    .send(EngineEvent::Error("take-profit placement failed".into()))
                    .await;
            }
        }
    }

    async fn cancel_tracked_grid(&mut self) {
        for (order_id, _) in self.grid_orders.drain() {
            let outcome = self.lifecycle.cancel(&order_id).await;
            if !outcome.confirmed() {
                warn!(%order_id, ?outcome, "Grid order cancel unconfirmed");
            }
        }
    }

    /// Cancel everything the engine still tracks.
    async fn shutdown(&mut self) {
        info!("Shutting down, cancelling tracked orders");
        self.cancel_tracked_grid().await;
        if let Some(tp) = self.take_profit.take() {
            let outcome = self.lifecycle.cancel(&tp.order_id).await;
            if !outcome.confirmed() {
                warn!(order_id = %tp.order_id, ?outcome, "Take-profit cancel unconfirmed");
            }
        }
    }
}
