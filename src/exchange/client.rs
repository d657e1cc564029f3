//! Arkham REST API client.

use crate::config::ApiConfig;
use crate::exchange::traits::ExchangeGateway;
use crate::exchange::types::*;
use crate::utils::decimal::{floor_dp, tick_decimals};
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

const DEFAULT_BASE_URL: &str = "https://arkm.com/api";

/// Signature expiry window; requests are signed ~5 minutes into the future.
const EXPIRY_WINDOW_SECS: u64 = 300;

/// Arkham API client for public market data and authenticated trading.
pub struct ArkhamClient {
    http: Client,
    api_key: String,
    api_secret: String,
    base_url: String,
}

impl ArkhamClient {
    /// Create a new Arkham client from configuration.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = if config.base_url.is_empty() {
            DEFAULT_BASE_URL.to_string()
        } else {
            config.base_url.trim_end_matches('/').to_string()
        };

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            api_secret: config.api_secret.clone(),
            base_url,
        })
    }

    /// Expiry timestamp in microseconds, `EXPIRY_WINDOW_SECS` ahead of now.
    fn expiry_micros() -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards");
        (now.as_secs() + EXPIRY_WINDOW_SECS) * 1_000_000
    }

    /// Base64 HMAC-SHA256 over `key || expiry || method || path || body`.
    ///
    /// The secret is itself base64-encoded; signing uses the decoded bytes.
    fn sign(&self, expiry: u64, method: &str, path: &str, body: &str) -> Result<String> {
        let secret = BASE64
            .decode(&self.api_secret)
            .context("API secret is not valid base64")?;
        let message = format!("{}{}{}{}{}", self.api_key, expiry, method, path, body);

        let mut mac =
            Hmac::<Sha256>::new_from_slice(&secret).expect("HMAC can take key of any size");
        mac.update(message.as_bytes());
        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    async fn get_public<T: serde::de::DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path_and_query);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", path_and_query))?
            .error_for_status()
            .with_context(|| format!("Request {} rejected", path_and_query))?;

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", path_and_query))
    }

    async fn get_signed<T: serde::de::DeserializeOwned>(&self, path_and_query: &str) -> Result<T> {
        let expiry = Self::expiry_micros();
        let signature = self.sign(expiry, "GET", path_and_query, "")?;
        let url = format!("{}{}", self.base_url, path_and_query);

        let response = self
            .http
            .get(&url)
            .header("Arkham-Api-Key", &self.api_key)
            .header("Arkham-Expires", expiry.to_string())
            .header("Arkham-Signature", signature)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", path_and_query))?
            .error_for_status()
            .with_context(|| format!("Request {} rejected", path_and_query))?;

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", path_and_query))
    }

    async fn post_signed<T: serde::de::DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let body_json = serde_json::to_string(body).context("Failed to serialize request body")?;
        let expiry = Self::expiry_micros();
        let signature = self.sign(expiry, "POST", path, &body_json)?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .http
            .post(&url)
            .header("Arkham-Api-Key", &self.api_key)
            .header("Arkham-Expires", expiry.to_string())
            .header("Arkham-Signature", signature)
            .header("Content-Type", "application/json")
            .body(body_json)
            .send()
            .await
            .with_context(|| format!("Failed to post {}", path))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Request {} failed with {}: {}", path, status, text);
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", path))
    }

    /// Format a value as a string quantized to the given tick/lot size.
    fn format_to_tick(value: Decimal, tick: Decimal) -> String {
        let decimals = tick_decimals(tick);
        format!("{:.*}", decimals as usize, floor_dp(value, decimals))
    }
}

#[async_trait]
impl ExchangeGateway for ArkhamClient {
    #[instrument(skip(self))]
    async fn get_pair_info(&self, symbol: &str) -> Result<PairInfo> {
        self.get_public(&format!(
            "/public/pair?symbol={}",
            urlencoding::encode(symbol)
        ))
        .await
    }

    #[instrument(skip(self))]
    async fn get_trading_pairs(&self) -> Result<Vec<PairInfo>> {
        self.get_public("/public/pairs").await
    }

    #[instrument(skip(self))]
    async fn get_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.get_public(&format!(
            "/public/ticker?symbol={}",
            urlencoding::encode(symbol)
        ))
        .await
    }

    #[instrument(skip(self))]
    async fn get_balances(&self) -> Result<Vec<Balance>> {
        self.get_signed("/account/balances").await
    }

    #[instrument(skip(self))]
    async fn place_order(
        &self,
        symbol: &str,
        side: OrderSide,
        order_type: OrderType,
        size: Decimal,
        price: Option<Decimal>,
    ) -> Result<Order> {
        // Quantize against a fresh pair snapshot; the exchange rejects
        // unaligned sizes and prices outright.
        let pair = self.get_pair_info(symbol).await?;

        anyhow::ensure!(
            size >= pair.min_size,
            "size {} is below minimum {}",
            size,
            pair.min_size
        );

        let formatted_size = Self::format_to_tick(size, pair.min_size);

        let formatted_price = match (order_type, price) {
            (OrderType::Market, _) => None,
            (OrderType::LimitGtc, Some(p)) => {
                let formatted = Self::format_to_tick(p, pair.min_tick_price);
                let notional = p * size;
                anyhow::ensure!(
                    notional >= pair.min_notional,
                    "order notional {} is below minimum {}",
                    notional,
                    pair.min_notional
                );
                Some(formatted)
            }
            (OrderType::LimitGtc, None) => anyhow::bail!("limit order requires a price"),
        };

        let request = NewOrderRequest {
            symbol: symbol.to_string(),
            side,
            order_type,
            size: formatted_size,
            post_only: false,
            price: formatted_price,
        };

        debug!(?request, "Placing order");
        self.post_signed("/orders/new", &request).await
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, order_id: &str) -> Result<bool> {
        let body = serde_json::json!({ "orderId": order_id });
        let _: serde_json::Value = self.post_signed("/orders/cancel", &body).await?;
        Ok(true)
    }

    #[instrument(skip(self))]
    async fn get_active_orders(&self, symbol: Option<&str>) -> Result<Vec<Order>> {
        let path = match symbol {
            Some(s) => format!("/orders?symbol={}", urlencoding::encode(s)),
            None => "/orders".to_string(),
        };
        self.get_signed(&path).await
    }

    #[instrument(skip(self))]
    async fn get_order_history(&self, symbol: Option<&str>, limit: u32) -> Result<Vec<Order>> {
        let path = match symbol {
            Some(s) => format!(
                "/orders/history?symbol={}&limit={}",
                urlencoding::encode(s),
                limit
            ),
            None => format!("/orders/history?limit={}", limit),
        };
        self.get_signed(&path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> ApiConfig {
        ApiConfig {
            // "test-secret!" base64-encoded
            api_key: "test-key".into(),
            api_secret: "dGVzdC1zZWNyZXQh".into(),
            base_url,
        }
    }

    #[test]
    fn test_format_to_tick() {
        assert_eq!(ArkhamClient::format_to_tick(dec!(1850.2567), dec!(0.01)), "1850.25");
        assert_eq!(ArkhamClient::format_to_tick(dec!(0.123456), dec!(0.0001)), "0.1234");
        assert_eq!(ArkhamClient::format_to_tick(dec!(5), dec!(0.01)), "5.00");
    }

    #[tokio::test]
    async fn test_get_ticker_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public/ticker"))
            .and(query_param("symbol", "ETH_USDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "ETH_USDT",
                "price": "1850.25"
            })))
            .mount(&server)
            .await;

        let client = ArkhamClient::new(&test_config(server.uri())).unwrap();
        let ticker = client.get_ticker("ETH_USDT").await.unwrap();
        assert_eq!(ticker.price, dec!(1850.25));
    }

    #[tokio::test]
    async fn test_signed_request_carries_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/account/balances"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "symbol": "USDT", "balance": "1000", "free": "900" }
            ])))
            .mount(&server)
            .await;

        let client = ArkhamClient::new(&test_config(server.uri())).unwrap();
        let balances = client.get_balances().await.unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].free, dec!(900));

        let requests = server.received_requests().await.unwrap();
        let headers = &requests[0].headers;
        assert_eq!(headers.get("Arkham-Api-Key").unwrap(), "test-key");
        // Expiry is microseconds in the future; signature is base64.
        let expiry: u64 = headers
            .get("Arkham-Expires")
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(expiry > 1_000_000_000 * 1_000_000);
        assert!(!headers.get("Arkham-Signature").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_place_order_rejects_undersized_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public/pair"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "ETH_USDT",
                "minSize": "0.01",
                "minTickPrice": "0.01",
                "minNotional": "10"
            })))
            .mount(&server)
            .await;

        let client = ArkhamClient::new(&test_config(server.uri())).unwrap();
        let result = client
            .place_order("ETH_USDT", OrderSide::Buy, OrderType::LimitGtc, dec!(0.001), Some(dec!(1850)))
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("below minimum"));
    }

    #[tokio::test]
    async fn test_place_order_rejects_sub_notional_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/public/pair"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "symbol": "ETH_USDT",
                "minSize": "0.0001",
                "minTickPrice": "0.01",
                "minNotional": "10"
            })))
            .mount(&server)
            .await;

        let client = ArkhamClient::new(&test_config(server.uri())).unwrap();
        let result = client
            .place_order("ETH_USDT", OrderSide::Buy, OrderType::LimitGtc, dec!(0.001), Some(dec!(100)))
            .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("notional"));
    }
}
