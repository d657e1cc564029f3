//! Gateway trait the trading core consumes.
//!
//! Engines never talk HTTP directly; they hold an `Arc<dyn ExchangeGateway>`
//! so tests can substitute a scripted in-memory exchange.

use crate::exchange::types::{Balance, Order, OrderSide, OrderType, PairInfo, Ticker};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Authenticated REST operations against a single exchange.
///
/// Every method returns `Err` on transport failure; callers in the trading
/// core catch at the call site, log, and degrade (retry, fall back to a
/// last-known value, or skip the poll iteration) rather than unwinding.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Pair metadata: minimum size, tick and notional.
    async fn get_pair_info(&self, symbol: &str) -> anyhow::Result<PairInfo>;

    /// All tradable pairs.
    async fn get_trading_pairs(&self) -> anyhow::Result<Vec<PairInfo>>;

    /// Last traded price.
    async fn get_ticker(&self, symbol: &str) -> anyhow::Result<Ticker>;

    /// All account balances.
    async fn get_balances(&self) -> anyhow::Result<Vec<Balance>>;

    /// Place an order. `price` is required for limit orders and ignored for
    /// market orders. The implementation quantizes size/price to the pair's
    /// lot/tick decimals before sending.
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        size: Decimal,
        price: Option<Decimal>,
    ) -> anyhow::Result<Order>;

    /// Cancel an order. `Ok(false)` means the exchange answered but did not
    /// confirm the cancel.
    async fn cancel_order(&self, order_id: &str) -> anyhow::Result<bool>;

    /// Orders currently resting on the book.
    async fn get_active_orders(&self, symbol: Option<&str>) -> anyhow::Result<Vec<Order>>;

    /// Most recent orders, newest first.
    async fn get_order_history(
        &self,
        symbol: Option<&str>,
        limit: u32,
    ) -> anyhow::Result<Vec<Order>>;
}
