use crate::error::{PipelineError, Result};
use crate::execution::OrderGateway;
use crate::models::{OrderConfirmation, OrderStatus, Side};
use async_trait::async_trait;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use sha2::Sha256;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

const BINANCE_API_BASE: &str = "https://api.binance.com";
const BINANCE_TESTNET_API_BASE: &str = "https://testnet.binance.vision";
const RECV_WINDOW_MS: u64 = 5000;

type HmacSha256 = Hmac<Sha256>;

type BinanceRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Binance spot REST client for signed market orders
///
/// Cloneable; all clones share one rate limiter.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    rate_limiter: Arc<BinanceRateLimiter>,
}

/// Response from POST /api/v3/order
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewOrderResponse {
    order_id: u64,
    orig_qty: Decimal,
    executed_qty: Decimal,
    status: OrderStatus,
}

/// Error body returned with non-2xx responses
#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

impl BinanceClient {
    /// # Arguments
    /// * `use_testnet` - Trade against testnet.binance.vision instead of the live exchange
    /// * `requests_per_minute` - Client-side request budget
    /// * `timeout` - Per-request HTTP timeout
    pub fn new(
        api_key: String,
        api_secret: String,
        use_testnet: bool,
        requests_per_minute: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let base_url = if use_testnet {
            BINANCE_TESTNET_API_BASE
        } else {
            BINANCE_API_BASE
        };
        Self::with_base_url(base_url, api_key, api_secret, requests_per_minute, timeout)
    }

    /// Client against an arbitrary base URL
    pub fn with_base_url(
        base_url: &str,
        api_key: String,
        api_secret: String,
        requests_per_minute: u32,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        let quota =
            Quota::per_minute(NonZeroU32::new(requests_per_minute).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            api_secret,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Hex HMAC-SHA256 of the query string, keyed by the API secret
    fn sign(&self, query: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| PipelineError::Config(format!("invalid API secret: {}", e)))?;
        mac.update(query.as_bytes());

        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Check connectivity
    pub async fn ping(&self) -> Result<()> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}/api/v3/ping", self.base_url);
        let response = self.client.get(&url).send().await?;
        Self::check_status(response).await?;

        Ok(())
    }

    /// Place a MARKET order for `quantity` of the base asset
    pub async fn create_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderConfirmation> {
        let query = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&recvWindow={}&timestamp={}",
            symbol,
            side,
            quantity.normalize(),
            RECV_WINDOW_MS,
            Utc::now().timestamp_millis()
        );
        let signature = self.sign(&query)?;
        let url = format!(
            "{}/api/v3/order?{}&signature={}",
            self.base_url, query, signature
        );

        self.rate_limiter.until_ready().await;

        tracing::debug!("Placing MARKET {} {} {}", side, quantity, symbol);

        let response = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        let order: NewOrderResponse = response.json().await?;

        Ok(OrderConfirmation {
            order_id: order.order_id.to_string(),
            quantity: order.orig_qty,
            filled_quantity: order.executed_qty,
            status: order.status,
        })
    }

    /// Map non-2xx responses to the exchange's own error code and message
    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        match serde_json::from_str::<ApiError>(&body) {
            Ok(err) => Err(PipelineError::Exchange {
                code: err.code,
                message: err.msg,
            }),
            Err(_) => Err(PipelineError::Exchange {
                code: i64::from(status.as_u16()),
                message: body,
            }),
        }
    }
}

#[async_trait]
impl OrderGateway for BinanceClient {
    async fn place(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderConfirmation> {
        self.create_market_order(symbol, side, quantity).await
    }

    fn name(&self) -> &str {
        "binance"
    }
}
