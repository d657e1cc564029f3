//! Order placement, cancellation and status lookup with bounded retries.
//!
//! Every operation retries up to [`MAX_ATTEMPTS`] times with a fixed
//! [`RETRY_INTERVAL`] between attempts, then classifies the terminal outcome.
//! Two outcomes are heuristic rather than confirmed and are logged as
//! stale-state assumptions: `AssumedComplete` market sells and
//! `Closed { confirmed: false }` status lookups.

use crate::exchange::{ExchangeGateway, Order, OrderSide, OrderStatus, OrderType};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Retry budget per operation.
pub const MAX_ATTEMPTS: u32 = 5;

/// Fixed delay between attempts.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(3);

/// How far back the history fallback looks during status lookups.
const HISTORY_LOOKBACK: u32 = 50;

/// Terminal outcome of a placement after the retry budget.
#[derive(Debug)]
pub enum PlacementOutcome {
    /// The exchange accepted the order.
    Placed(Order),
    /// The exchange rejected the order for lack of funds. Not retried.
    InsufficientBalance {
        available: Decimal,
        required: Decimal,
    },
    /// Market sell failed repeatedly; the balance was most likely consumed
    /// by a just-filled order. Heuristic, not a confirmation.
    AssumedComplete,
    /// Retry budget exhausted with no diagnosis.
    Failed { attempts: u32, last_error: String },
}

/// Terminal outcome of a cancellation after the retry budget.
///
/// Anything other than `Cancelled` means the local view of the order can no
/// longer be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The exchange confirmed the cancel.
    Cancelled,
    /// The exchange kept answering but never confirmed.
    GaveUp,
    /// Every attempt failed with a transport error.
    Errored,
}

impl CancelOutcome {
    pub fn confirmed(self) -> bool {
        self == CancelOutcome::Cancelled
    }
}

/// Reconciled order state from active orders with a history fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    /// Still resting on the book.
    Active {
        executed_size: Decimal,
        remaining_size: Decimal,
    },
    /// Off the book. `confirmed` is false when the state was assumed after
    /// repeated failed lookups rather than observed.
    Closed {
        confirmed: bool,
        executed_size: Option<Decimal>,
        remaining_size: Decimal,
    },
}

impl OrderState {
    pub fn remaining_size(&self) -> Decimal {
        match self {
            OrderState::Active { remaining_size, .. } => *remaining_size,
            OrderState::Closed { remaining_size, .. } => *remaining_size,
        }
    }
}

/// Place/cancel/status operations against a single symbol.
#[derive(Clone)]
pub struct OrderLifecycleManager {
    gateway: Arc<dyn ExchangeGateway>,
    symbol: String,
    retry_interval: Duration,
}

impl OrderLifecycleManager {
    pub fn new(gateway: Arc<dyn ExchangeGateway>, symbol: impl Into<String>) -> Self {
        Self {
            gateway,
            symbol: symbol.into(),
            retry_interval: RETRY_INTERVAL,
        }
    }

    /// Place a limit order with retries.
    pub async fn place_limit(
        &self,
        side: OrderSide,
        size: Decimal,
        price: Decimal,
    ) -> PlacementOutcome {
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            match self
                .gateway
                .place_order(&self.symbol, side, OrderType::LimitGtc, size, Some(price))
                .await
            {
                Ok(order) => {
                    info!(
                        symbol = %self.symbol,
                        order_id = %order.order_id,
                        ?side,
                        %size,
                        %price,
                        "Placed limit order"
                    );
                    return PlacementOutcome::Placed(order);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if let Some(available) = parse_insufficient_balance(&last_error) {
                        warn!(
                            symbol = %self.symbol,
                            %available,
                            required = %size,
                            "Placement rejected for insufficient balance"
                        );
                        return PlacementOutcome::InsufficientBalance {
                            available,
                            required: size,
                        };
                    }
                    error!(
                        symbol = %self.symbol,
                        attempt,
                        error = %last_error,
                        "Failed to place limit order"
                    );
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(self.retry_interval).await;
            }
        }

        PlacementOutcome::Failed {
            attempts: MAX_ATTEMPTS,
            last_error,
        }
    }

    /// Place a market sell with retries.
    ///
    /// After the full budget of consecutive failures the sell is assumed to
    /// be unnecessary: repeated rejection of a market sell usually means the
    /// balance was already consumed. Logged as a stale-state assumption so
    /// false positives can be audited.
    pub async fn place_market_sell(&self, size: Decimal) -> PlacementOutcome {
        for attempt in 1..=MAX_ATTEMPTS {
            match self
                .gateway
                .place_order(&self.symbol, OrderSide::Sell, OrderType::Market, size, None)
                .await
            {
                Ok(order) => {
                    info!(symbol = %self.symbol, order_id = %order.order_id, %size, "Placed market sell");
                    return PlacementOutcome::Placed(order);
                }
                Err(e) => {
                    error!(
                        symbol = %self.symbol,
                        attempt,
                        error = %e,
                        "Failed to place market sell"
                    );
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(self.retry_interval).await;
            }
        }

        warn!(
            symbol = %self.symbol,
            attempts = MAX_ATTEMPTS,
            "STALE-STATE ASSUMPTION: treating market sell as already complete"
        );
        PlacementOutcome::AssumedComplete
    }

    /// Cancel an order with retries.
    pub async fn cancel(&self, order_id: &str) -> CancelOutcome {
        let mut error_count = 0u32;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.gateway.cancel_order(order_id).await {
                Ok(true) => {
                    info!(symbol = %self.symbol, order_id, "Cancelled order");
                    return CancelOutcome::Cancelled;
                }
                Ok(false) => {
                    error!(symbol = %self.symbol, order_id, attempt, "Cancel not confirmed");
                }
                Err(e) => {
                    error_count += 1;
                    error!(symbol = %self.symbol, order_id, attempt, error = %e, "Cancel failed");
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(self.retry_interval).await;
            }
        }

        if error_count >= MAX_ATTEMPTS {
            CancelOutcome::Errored
        } else {
            CancelOutcome::GaveUp
        }
    }

    /// Reconcile an order's state against the exchange.
    ///
    /// Checks the active-order snapshot first and falls back to recent
    /// history. After the retry budget of failed lookups the order is
    /// assumed closed with nothing remaining, trading correctness for
    /// liveness under API flakiness.
    pub async fn order_state(&self, order_id: &str) -> OrderState {
        let mut fail_count = 0u32;

        loop {
            match self.lookup(order_id).await {
                Some(state) => return state,
                None => {
                    fail_count += 1;
                    if fail_count >= MAX_ATTEMPTS {
                        warn!(
                            symbol = %self.symbol,
                            order_id,
                            fail_count,
                            "STALE-STATE ASSUMPTION: order not found after repeated lookups, assuming closed"
                        );
                        return OrderState::Closed {
                            confirmed: false,
                            executed_size: None,
                            remaining_size: Decimal::ZERO,
                        };
                    }
                    tokio::time::sleep(self.retry_interval).await;
                }
            }
        }
    }

    /// One lookup pass: active set, then history. `None` on failure or when
    /// the order is in neither.
    async fn lookup(&self, order_id: &str) -> Option<OrderState> {
        match self.gateway.get_active_orders(Some(&self.symbol)).await {
            Ok(active) => {
                if let Some(order) = active.iter().find(|o| o.order_id == order_id) {
                    return Some(OrderState::Active {
                        executed_size: order.executed_size,
                        remaining_size: order.remaining_size(),
                    });
                }
            }
            Err(e) => {
                error!(symbol = %self.symbol, order_id, error = %e, "Active-order lookup failed");
                return None;
            }
        }

        match self
            .gateway
            .get_order_history(Some(&self.symbol), HISTORY_LOOKBACK)
            .await
        {
            Ok(history) => history.iter().find(|o| o.order_id == order_id).map(|order| {
                match order.status {
                    // A cancelled order keeps its unfilled remainder; a
                    // filled one has none left by definition.
                    OrderStatus::Closed | OrderStatus::Cancelled => OrderState::Closed {
                        confirmed: true,
                        executed_size: Some(order.executed_size),
                        remaining_size: order.remaining_size(),
                    },
                    _ => OrderState::Active {
                        executed_size: order.executed_size,
                        remaining_size: order.remaining_size(),
                    },
                }
            }),
            Err(e) => {
                error!(symbol = %self.symbol, order_id, error = %e, "History lookup failed");
                None
            }
        }
    }

    #[cfg(test)]
    fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }
}

/// Extract the available amount from an exchange insufficient-balance
/// message of the form "... has 1.23 ETH available ...".
fn parse_insufficient_balance(message: &str) -> Option<Decimal> {
    let lowered = message.to_lowercase();
    if !lowered.contains("insufficient balance") {
        return None;
    }
    let amount = lowered
        .split("has ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|token| token.parse().ok())
        .unwrap_or(Decimal::ZERO);
    Some(amount)
}
