//! Scripted in-memory exchange for engine and lifecycle tests.

use crate::exchange::traits::ExchangeGateway;
use crate::exchange::types::*;
use anyhow::Result;
use async_trait::async_trait;
use rust_decimal::Decimal;
#[cfg(test)]
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Failure injection counters. Each counter fails that many upcoming calls
/// before the endpoint recovers.
#[derive(Debug, Default)]
struct FailureScript {
    place_order: u32,
    cancel_order: u32,
    balances: u32,
    ticker: u32,
    active_orders: u32,
    history: u32,
}

#[derive(Debug, Default)]
struct MockState {
    pairs: HashMap<String, PairInfo>,
    prices: HashMap<String, Decimal>,
    balances: HashMap<String, Balance>,
    active_orders: Vec<Order>,
    history: Vec<Order>,
    failures: FailureScript,
    /// When true, the next placement is rejected with an exchange-style
    /// insufficient-balance error message.
    reject_insufficient_balance: Option<Decimal>,
}

/// In-memory exchange with scripted market data and failure injection.
pub struct MockExchange {
    state: Arc<RwLock<MockState>>,
    order_id_counter: AtomicU64,
}

impl Default for MockExchange {
    fn default() -> Self {
        Self::new()
    }
}

impl MockExchange {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(MockState::default())),
            order_id_counter: AtomicU64::new(1),
        }
    }

    pub async fn set_pair(&self, pair: PairInfo) {
        self.state.write().await.pairs.insert(pair.symbol.clone(), pair);
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.state.write().await.prices.insert(symbol.to_string(), price);
    }

    pub async fn set_balance(&self, asset: &str, free: Decimal, total: Decimal) {
        self.state.write().await.balances.insert(
            asset.to_string(),
            Balance {
                symbol: asset.to_string(),
                balance: total,
                free,
            },
        );
    }

    /// Simulate a fill: the order vanishes from the active set and lands in
    /// history fully executed.
    pub async fn fill_order(&self, order_id: &str) {
        let mut state = self.state.write().await;
        if let Some(pos) = state.active_orders.iter().position(|o| o.order_id == order_id) {
            let mut order = state.active_orders.remove(pos);
            order.executed_size = order.size;
            order.status = OrderStatus::Closed;
            state.history.insert(0, order);
        }
    }

    pub async fn fail_next_placements(&self, count: u32) {
        self.state.write().await.failures.place_order = count;
    }

    pub async fn fail_next_cancels(&self, count: u32) {
        self.state.write().await.failures.cancel_order = count;
    }

    pub async fn fail_next_balance_calls(&self, count: u32) {
        self.state.write().await.failures.balances = count;
    }

    pub async fn fail_next_order_lookups(&self, count: u32) {
        let mut state = self.state.write().await;
        state.failures.active_orders = count;
        state.failures.history = count;
    }

    pub async fn reject_next_placement_insufficient(&self, available: Decimal) {
        self.state.write().await.reject_insufficient_balance = Some(available);
    }

    pub async fn active_order_count(&self) -> usize {
        self.state.read().await.active_orders.len()
    }

    pub async fn active_orders_snapshot(&self) -> Vec<Order> {
        self.state.read().await.active_orders.clone()
    }

    fn next_order_id(&self) -> String {
        format!("mock-{}", self.order_id_counter.fetch_add(1, Ordering::SeqCst))
    }

    fn take_failure(counter: &mut u32) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl ExchangeGateway for MockExchange {
    async fn get_pair_info(&self, symbol: &str) -> Result<PairInfo> {
        self.state
            .read()
            .await
            .pairs
            .get(symbol)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown pair {}", symbol))
    }

    async fn get_trading_pairs(&self) -> Result<Vec<PairInfo>> {
        Ok(self.state.read().await.pairs.values().cloned().collect())
    }

    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        let mut state = self.state.write().await;
        if Self::take_failure(&mut state.failures.ticker) {
            anyhow::bail!("injected ticker failure");
        }
        let price = state
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no price for {}", symbol))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            price,
        })
    }

    async fn get_balances(&self) -> Result<Vec<Balance>> {
        let mut state = self.state.write().await;
        if Self::take_failure(&mut state.failures.balances) {
            anyhow::bail!("injected balance failure");
        }
        Ok(state.balances.values().cloned().collect())
    }

    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        size: Decimal,
        price: Option<Decimal>,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        if Self::take_failure(&mut state.failures.place_order) {
            anyhow::bail!("injected placement failure");
        }
        if let Some(available) = state.reject_insufficient_balance.take() {
            anyhow::bail!(
                "insufficient balance: account has {} {} available",
                available,
                symbol
            );
        }

        let order = Order {
            order_id: self.next_order_id(),
            symbol: symbol.to_string(),
            side,
            order_type,
            price: price.unwrap_or_else(|| {
                state.prices.get(symbol).copied().unwrap_or(Decimal::ZERO)
            }),
            size,
            executed_size: Decimal::ZERO,
            status: OrderStatus::Open,
            time: None,
        };

        match order_type {
            OrderType::Market => {
                // Market orders fill instantly against the scripted price.
                let mut filled = order.clone();
                filled.executed_size = filled.size;
                filled.status = OrderStatus::Closed;
                state.history.insert(0, filled.clone());
                Ok(filled)
            }
            OrderType::LimitGtc => {
                state.active_orders.push(order.clone());
                Ok(order)
            }
        }
    }

    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        if Self::take_failure(&mut state.failures.cancel_order) {
            anyhow::bail!("injected cancel failure");
        }
        if let Some(pos) = state.active_orders.iter().position(|o| o.order_id == order_id) {
            let mut order = state.active_orders.remove(pos);
            order.status = OrderStatus::Cancelled;
            state.history.insert(0, order);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn get_active_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>> {
        let mut state = self.state.write().await;
        if Self::take_failure(&mut state.failures.active_orders) {
            anyhow::bail!("injected active-orders failure");
        }
        Ok(state
            .active_orders
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .cloned()
            .collect())
    }

    async fn get_order_history(&self, symbol: Option<&str>, limit: u32) -> Result<Vec<Order>> {
        let mut state = self.state.write().await;
        if Self::take_failure(&mut state.failures.history) {
            anyhow::bail!("injected history failure");
        }
        Ok(state
            .history
            .iter()
            .filter(|o| symbol.map_or(true, |s| o.symbol == s))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

/// Standard ETH_USDT pair used across tests.
#[cfg(test)]
pub fn test_pair() -> PairInfo {
    PairInfo {
        symbol: "ETH_USDT".to_string(),
        min_size: dec!(0.001),
        min_tick_price: dec!(0.01),
        min_notional: dec!(10),
    }
}
