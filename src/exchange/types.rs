//! Type definitions for Arkham API responses.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trading pair metadata.
///
/// Fetched fresh per calculation; there is no cache invalidation, a stale
/// snapshot is simply refetched on the next call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairInfo {
    pub symbol: String,
    /// Minimum order size, also the lot step.
    #[serde(with = "rust_decimal::serde::str")]
    pub min_size: Decimal,
    /// Minimum price increment.
    #[serde(with = "rust_decimal::serde::str")]
    pub min_tick_price: Decimal,
    /// Minimum order value (price x size).
    #[serde(with = "rust_decimal::serde::str")]
    pub min_notional: Decimal,
}

/// Last traded price for a symbol.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    #[serde(default)]
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// Per-asset account balance.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,
    /// Balance not locked in open orders.
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    #[serde(rename = "market")]
    Market,
    #[serde(rename = "limitGtc")]
    LimitGtc,
}

/// Order status as reported by the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    New,
    Open,
    Closed,
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// An order as the exchange reports it.
///
/// The engine keeps a local view keyed by `order_id`, but the exchange owns
/// the order: the view is only trusted after reconciling against a fresh
/// active-orders poll.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    #[serde(default, with = "rust_decimal::serde::str")]
    pub executed_size: Decimal,
    pub status: OrderStatus,
    #[serde(default)]
    pub time: Option<i64>,
}

impl Order {
    /// Unfilled remainder of the order.
    pub fn remaining_size(&self) -> Decimal {
        self.size - self.executed_size
    }
}

/// Request body for `POST /orders/new`.
///
/// Size and price are pre-formatted strings quantized to the pair's lot and
/// tick decimals; the exchange rejects unquantized values.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub size: String,
    pub post_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_deserializes_from_wire_format() {
        let raw = r#"{
            "orderId": "abc-123",
            "symbol": "ETH_USDT",
            "side": "buy",
            "type": "limitGtc",
            "price": "1850.25",
            "size": "0.5000",
            "executedSize": "0.1000",
            "status": "open",
            "time": 1714000000000
        }"#;
        let order: Order = serde_json::from_str(raw).unwrap();
        assert_eq!(order.order_id, "abc-123");
        assert_eq!(order.side, OrderSide::Buy);
        assert_eq!(order.order_type, OrderType::LimitGtc);
        assert_eq!(order.price, dec!(1850.25));
        assert_eq!(order.remaining_size(), dec!(0.4));
    }

    #[test]
    fn test_unknown_status_does_not_fail_parsing() {
        let raw = r#"{
            "orderId": "x",
            "symbol": "ETH_USDT",
            "side": "sell",
            "type": "market",
            "price": "0",
            "size": "1",
            "executedSize": "0",
            "status": "somethingNew"
        }"#;
        let order: Order = serde_json::from_str(raw).unwrap();
        assert_eq!(order.status, OrderStatus::Unknown);
    }

    #[test]
    fn test_new_order_request_omits_price_for_market() {
        let req = NewOrderRequest {
            symbol: "ETH_USDT".into(),
            side: OrderSide::Sell,
            order_type: OrderType::Market,
            size: "0.5000".into(),
            post_only: false,
            price: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("price").is_none());
        assert_eq!(json["type"], "market");
        assert_eq!(json["side"], "sell");
    }
}
