//! Binance USDT-margined futures adapter (native Rust, no external SDK).
//!
//! Requests on signed endpoints carry a millisecond timestamp and an
//! HMAC-SHA256 signature over the query string, hex-encoded, per the venue's
//! authentication scheme.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::domain::{OrderResult, OrderSide, OrderStatus, Position, PositionSide};
use crate::error::{KraitError, Result};
use crate::exchange::ExchangeGateway;

const DEFAULT_FUTURES_API_BASE: &str = "https://fapi.binance.com";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct BinanceFuturesGateway {
    http: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    recv_window_ms: u64,
}

impl BinanceFuturesGateway {
    pub fn new(
        base_url: Option<&str>,
        api_key: String,
        api_secret: String,
        recv_window_ms: u64,
    ) -> Result<Self> {
        let base_url = base_url
            .unwrap_or(DEFAULT_FUTURES_API_BASE)
            .trim_end_matches('/')
            .to_string();

        let http = Client::builder()
            .user_agent("krait-futures-adapter/0.1")
            .build()
            .map_err(|e| {
                KraitError::Internal(format!("failed to build venue HTTP client: {}", e))
            })?;

        Ok(Self {
            http,
            base_url,
            api_key,
            api_secret,
            recv_window_ms,
        })
    }

    pub fn from_env(base_url: Option<&str>, recv_window_ms: u64) -> Result<Self> {
        let api_key = std::env::var("KRAIT_API_KEY")
            .map_err(|_| KraitError::Validation("KRAIT_API_KEY is required".to_string()))?;
        let api_secret = std::env::var("KRAIT_API_SECRET")
            .map_err(|_| KraitError::Validation("KRAIT_API_SECRET is required".to_string()))?;

        Self::new(base_url, api_key, api_secret, recv_window_ms)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| KraitError::Internal(format!("invalid venue API secret: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-mbx-apikey"),
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| KraitError::Internal(format!("invalid venue API key: {}", e)))?,
        );
        Ok(headers)
    }

    /// Issue a signed request; `params` are urlencoded key/value pairs.
    async fn signed_request(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        let mut query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let timestamp = Utc::now().timestamp_millis();
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&format!(
            "recvWindow={}&timestamp={}",
            self.recv_window_ms, timestamp
        ));

        let signature = self.sign(&query)?;
        let url = format!(
            "{}{}?{}&signature={}",
            self.base_url, path, query, signature
        );

        let resp = self
            .http
            .request(method, &url)
            .headers(self.auth_headers()?)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            if status == StatusCode::TOO_MANY_REQUESTS {
                warn!("Venue rate limit hit on {}", path);
            }
            return Err(KraitError::VenueCall(format!(
                "{} {} -> {}: {}",
                path,
                status,
                status.canonical_reason().unwrap_or("error"),
                text
            )));
        }

        serde_json::from_str(&text).map_err(|e| {
            KraitError::VenueCall(format!("{}: malformed venue response: {}", path, e))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionRiskEntry {
    symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    position_amt: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    entry_price: Decimal,
    #[serde(rename = "unRealizedProfit", with = "rust_decimal::serde::str")]
    unrealized_profit: Decimal,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderAck {
    order_id: i64,
    status: String,
}

#[async_trait]
impl ExchangeGateway for BinanceFuturesGateway {
    async fn get_position(&self, symbol: &str) -> Result<Position> {
        let value = self
            .signed_request(
                Method::GET,
                "/fapi/v2/positionRisk",
                &[("symbol", symbol.to_string())],
            )
            .await?;

        let entries: Vec<PositionRiskEntry> = serde_json::from_value(value)
            .map_err(|e| KraitError::VenueCall(format!("positionRisk decode: {}", e)))?;

        // One-way mode returns a single entry per symbol; hedge mode returns
        // one per direction and we take the first non-flat leg.
        let entry = entries
            .into_iter()
            .find(|p| p.symbol == symbol && !p.position_amt.is_zero());

        let position = match entry {
            Some(p) => {
                let side = if p.position_amt.is_sign_negative() {
                    PositionSide::Short
                } else {
                    PositionSide::Long
                };
                Position {
                    symbol: p.symbol,
                    side,
                    quantity: p.position_amt.abs(),
                    entry_price: p.entry_price,
                    unrealized_pnl: p.unrealized_profit,
                }
            }
            None => Position::flat(symbol),
        };

        debug!(
            symbol,
            quantity = %position.quantity,
            "Fetched position from venue"
        );
        Ok(position)
    }

    async fn cancel_all_orders(&self, symbol: &str) -> Result<u32> {
        // The venue acknowledges a bulk cancel without per-order detail, so
        // count open orders first to report how many were swept.
        let open = self
            .signed_request(
                Method::GET,
                "/fapi/v1/openOrders",
                &[("symbol", symbol.to_string())],
            )
            .await?;
        let count = open.as_array().map(|a| a.len() as u32).unwrap_or(0);

        self.signed_request(
            Method::DELETE,
            "/fapi/v1/allOpenOrders",
            &[("symbol", symbol.to_string())],
        )
        .await?;

        Ok(count)
    }

    async fn submit_reduce_only_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> Result<OrderResult> {
        let value = self
            .signed_request(
                Method::POST,
                "/fapi/v1/order",
                &[
                    ("symbol", symbol.to_string()),
                    ("side", side.to_string()),
                    ("type", "MARKET".to_string()),
                    ("reduceOnly", "true".to_string()),
                    ("quantity", quantity.to_string()),
                ],
            )
            .await?;

        let ack: OrderAck = serde_json::from_value(value)
            .map_err(|e| KraitError::VenueCall(format!("order ack decode: {}", e)))?;

        let status = match ack.status.as_str() {
            "FILLED" => OrderStatus::Filled,
            "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
            "CANCELED" => OrderStatus::Cancelled,
            "REJECTED" | "EXPIRED" => {
                return Err(KraitError::OrderRejected(format!(
                    "{} close order {}: {}",
                    symbol, ack.order_id, ack.status
                )))
            }
            _ => OrderStatus::Submitted,
        };

        Ok(OrderResult {
            order_id: ack.order_id.to_string(),
            symbol: symbol.to_string(),
            side,
            quantity,
            status,
        })
    }
}
