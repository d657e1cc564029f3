//! Sellable-balance reconciliation against the exchange.
//!
//! Availability over consistency: balance reads retry a few times, then fall
//! back to the last successfully observed value rather than failing the
//! caller mid-cycle.

use crate::exchange::{ExchangeGateway, OrderSide};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const BALANCE_MAX_RETRIES: u32 = 3;
const BALANCE_RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// Safety margin on sell sizes (0.1%) against fee/rounding overshoot.
const SELL_SIZE_BUFFER: Decimal = dec!(0.999);

/// Derives the sellable balance of a pair's base asset.
pub struct BalanceReconciler {
    gateway: Arc<dyn ExchangeGateway>,
    symbol: String,
    base_currency: String,
    min_trade_size: Decimal,
    last_known_balance: Option<Decimal>,
    retry_interval: Duration,
}

impl BalanceReconciler {
    /// `min_trade_size` comes from the pair snapshot the engine fetched at
    /// setup; passing it in keeps this constructor infallible.
    pub fn new(
        gateway: Arc<dyn ExchangeGateway>,
        symbol: impl Into<String>,
        min_trade_size: Decimal,
    ) -> Self {
        let symbol = symbol.into();
        let base_currency = symbol
            .split(['_', '/'])
            .next()
            .unwrap_or(&symbol)
            .to_string();
        Self {
            gateway,
            symbol,
            base_currency,
            min_trade_size,
            last_known_balance: None,
            retry_interval: BALANCE_RETRY_INTERVAL,
        }
    }

    pub fn min_trade_size(&self) -> Decimal {
        self.min_trade_size
    }

    /// Free balance of the base asset, with retries. Falls back to the last
    /// observed value (or zero) when the endpoint stays down.
    pub async fn available_balance(&mut self) -> Decimal {
        for attempt in 1..=BALANCE_MAX_RETRIES {
            match self.gateway.get_balances().await {
                Ok(balances) => {
                    if let Some(balance) =
                        balances.iter().find(|b| b.symbol == self.base_currency)
                    {
                        self.last_known_balance = Some(balance.free);
                        return balance.free;
                    }
                    // Asset absent from the response means a zero holding,
                    // not a failed read.
                    self.last_known_balance = Some(Decimal::ZERO);
                    return Decimal::ZERO;
                }
                Err(e) => {
                    error!(
                        asset = %self.base_currency,
                        attempt,
                        error = %e,
                        "Failed to fetch balances"
                    );
                    if attempt < BALANCE_MAX_RETRIES {
                        tokio::time::sleep(self.retry_interval).await;
                    }
                }
            }
        }

        match self.last_known_balance {
            Some(balance) => {
                warn!(asset = %self.base_currency, %balance, "Using last known balance");
                balance
            }
            None => Decimal::ZERO,
        }
    }

    /// Available balance plus the unfilled remainder of open sell orders.
    pub async fn total_balance(&mut self) -> Decimal {
        let available = self.available_balance().await;

        let in_orders = match self.gateway.get_active_orders(Some(&self.symbol)).await {
            Ok(orders) => orders
                .iter()
                .filter(|o| o.side == OrderSide::Sell)
                .map(|o| o.remaining_size())
                .sum(),
            Err(e) => {
                error!(symbol = %self.symbol, error = %e, "Failed to fetch open sell orders");
                Decimal::ZERO
            }
        };

        let total = available + in_orders;
        info!(
            asset = %self.base_currency,
            %total,
            %available,
            %in_orders,
            "Reconciled balance"
        );
        total
    }

    /// Clamp a desired sell size against the total balance.
    ///
    /// Returns zero when the total balance is below the pair's minimum trade
    /// size; otherwise at most 99.9% of the total.
    pub async fn validate_sell_size(&mut self, desired: Decimal) -> Decimal {
        let total = self.total_balance().await;

        if total <= Decimal::ZERO || total < self.min_trade_size {
            warn!(
                %total,
                min_trade_size = %self.min_trade_size,
                "Total balance below minimum trade size"
            );
            return Decimal::ZERO;
        }

        let max_size = total * SELL_SIZE_BUFFER;
        if desired > max_size {
            warn!(%desired, %max_size, "Clamping sell size to balance");
            max_size
        } else {
            desired
        }
    }

    /// Whether any sell orders rest on the book for this symbol.
    pub async fn has_active_sell_orders(&self) -> bool {
        match self.gateway.get_active_orders(Some(&self.symbol)).await {
            Ok(orders) => orders.iter().any(|o| o.side == OrderSide::Sell),
            Err(e) => {
                error!(symbol = %self.symbol, error = %e, "Failed to check active sell orders");
                false
            }
        }
    }

    /// Sole gate for re-arming the grid in volume mode: the base asset is
    /// (effectively) fully liquidated and nothing rests on the sell side.
    pub async fn can_start_new_cycle(&mut self) -> bool {
        let available = self.available_balance().await;
        let has_sells = self.has_active_sell_orders().await;
        info!(
            %available,
            min_trade_size = %self.min_trade_size,
            has_sells,
            "Checking new-cycle conditions"
        );
        available < self.min_trade_size && !has_sells
    }

    #[cfg(test)]
    pub(crate) fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchange;
    use crate::exchange::OrderType;

    fn reconciler(exchange: &Arc<MockExchange>, min_size: Decimal) -> BalanceReconciler {
        BalanceReconciler::new(
            exchange.clone() as Arc<dyn ExchangeGateway>,
            "ETH_USDT",
            min_size,
        )
        .with_retry_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_available_balance_reads_base_asset() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_balance("ETH", dec!(1.5), dec!(2)).await;
        exchange.set_balance("USDT", dec!(500), dec!(500)).await;

        let mut reconciler = reconciler(&exchange, dec!(0.001));
        assert_eq!(reconciler.available_balance().await, dec!(1.5));
    }

    #[tokio::test]
    async fn test_falls_back_to_last_known_on_outage() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_balance("ETH", dec!(1.5), dec!(2)).await;

        let mut reconciler = reconciler(&exchange, dec!(0.001));
        assert_eq!(reconciler.available_balance().await, dec!(1.5));

        exchange.fail_next_balance_calls(10).await;
        assert_eq!(reconciler.available_balance().await, dec!(1.5));
    }

    #[tokio::test]
    async fn test_zero_when_never_observed() {
        let exchange = Arc::new(MockExchange::new());
        exchange.fail_next_balance_calls(10).await;

        let mut reconciler = reconciler(&exchange, dec!(0.001));
        assert_eq!(reconciler.available_balance().await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_total_balance_includes_open_sells() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_balance("ETH", dec!(1), dec!(3)).await;
        exchange
            .place_order("ETH_USDT", OrderSide::Sell, OrderType::LimitGtc, dec!(2), Some(dec!(1900)))
            .await
            .unwrap();

        let mut reconciler = reconciler(&exchange, dec!(0.001));
        assert_eq!(reconciler.total_balance().await, dec!(3));
    }

    #[tokio::test]
    async fn test_validate_sell_size_clamps_to_buffered_total() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_balance("ETH", dec!(50), dec!(50)).await;

        let mut reconciler = reconciler(&exchange, dec!(0.001));
        let validated = reconciler.validate_sell_size(dec!(100)).await;
        assert_eq!(validated, dec!(49.950));
        assert!(validated <= dec!(49.95));
    }

    #[tokio::test]
    async fn test_validate_sell_size_zero_below_minimum() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_balance("ETH", dec!(0.0005), dec!(0.0005)).await;

        let mut reconciler = reconciler(&exchange, dec!(0.001));
        assert_eq!(reconciler.validate_sell_size(dec!(0.0005)).await, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_can_start_new_cycle_gate() {
        let exchange = Arc::new(MockExchange::new());
        exchange.set_balance("ETH", dec!(0.0001), dec!(0.0001)).await;

        let mut reconciler = reconciler(&exchange, dec!(0.001));
        assert!(reconciler.can_start_new_cycle().await);

        // An open sell order blocks the gate.
        exchange
            .place_order("ETH_USDT", OrderSide::Sell, OrderType::LimitGtc, dec!(1), Some(dec!(1900)))
            .await
            .unwrap();
        assert!(!reconciler.can_start_new_cycle().await);
    }
}
