use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use common::config::Credentials;
use common::models::{Bar, TradingPair};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use sha2::Sha256;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::remote::kline_response::KlineResponse;
use crate::traits::{
    ConnectorError, ExchangeConnector, MarketDataSource, OrderAck, RemoteResponse,
};

type HmacSha256 = Hmac<Sha256>;

const MAX_RETRIES: u32 = 3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
pub struct OrderResponse {
    #[serde(rename = "orderId")]
    pub order_id: u64,
    pub symbol: String,
    pub status: String,
    #[serde(rename = "executedQty")]
    pub executed_qty: String,
    #[serde(rename = "cummulativeQuoteQty")]
    pub cummulative_quote_qty: String,
}

impl RemoteResponse<OrderAck> for OrderResponse {
    fn to_model(&self) -> Result<OrderAck, ConnectorError> {
        let executed_qty = self.executed_qty.parse().map_err(|_| {
            ConnectorError::Decode(format!("executedQty '{}'", self.executed_qty))
        })?;
        Ok(OrderAck {
            order_id: self.order_id,
            status: self.status.clone(),
            executed_qty,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub free: String,
    pub locked: String,
}

#[derive(Debug, Deserialize)]
pub struct AccountInformation {
    pub balances: Vec<Balance>,
    #[serde(rename = "canTrade")]
    pub can_trade: bool,
}

impl AccountInformation {
    pub fn free_balances(&self) -> HashMap<String, f64> {
        self.balances
            .iter()
            .map(|b| (b.asset.clone(), b.free.parse::<f64>().unwrap_or(0.0)))
            .collect()
    }
}

/// Binance spot REST client. Public market data works without credentials;
/// account and order endpoints are HMAC-SHA256 signed.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    credentials: Option<Credentials>,
}

impl BinanceClient {
    pub fn new(base_url: &str, credentials: Option<Credentials>) -> Result<Self, ConnectorError> {
        let client = Client::builder()
            .user_agent("adaptive_trader/0.1.0")
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn credentials(&self) -> Result<&Credentials, ConnectorError> {
        self.credentials.as_ref().ok_or(ConnectorError::Unauthenticated)
    }

    fn sign(secret: &str, query: &str) -> Result<String, ConnectorError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| ConnectorError::Decode(format!("invalid signing key: {}", e)))?;
        mac.update(query.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default()
    }

    /// Sends a request, backing off exponentially on 429/418 responses.
    /// Those status codes mean the request was refused before reaching the
    /// matching engine, so resending an order is safe.
    async fn send_with_backoff<F>(&self, build: F) -> Result<Response, ConnectorError>
    where
        F: Fn() -> Result<reqwest::RequestBuilder, ConnectorError>,
    {
        let mut retry_count = 0;
        loop {
            let resp = build()?.send().await?;
            let status = resp.status().as_u16();

            if let Some(used_weight) = resp.headers().get("x-mbx-used-weight-1m") {
                if let Some(w) = used_weight.to_str().ok().and_then(|v| v.parse::<u32>().ok()) {
                    if w > 1000 {
                        warn!("High API weight usage: {}", w);
                    } else {
                        debug!("Used weights: {}/1200", w);
                    }
                }
            }

            if status == 429 || status == 418 {
                retry_count += 1;
                if retry_count > MAX_RETRIES {
                    return Err(ConnectorError::RateLimited { status });
                }
                let backoff_seconds = 2_u64.pow(retry_count);
                warn!(
                    "Rate limited ({}), backing off for {} seconds (attempt {}/{})",
                    status, backoff_seconds, retry_count, MAX_RETRIES
                );
                sleep(Duration::from_secs(backoff_seconds)).await;
                continue;
            }

            if !resp.status().is_success() {
                let body = resp.text().await.unwrap_or_default();
                error!("Binance request failed ({}): {}", status, body);
                return Err(ConnectorError::Api { status, body });
            }
            return Ok(resp);
        }
    }

    async fn signed(&self, method: Method, path: &str, params: &str) -> Result<Response, ConnectorError> {
        let creds = self.credentials()?;
        self.send_with_backoff(|| {
            // The timestamp must be fresh on every attempt.
            let query = if params.is_empty() {
                format!("timestamp={}", Self::timestamp_ms())
            } else {
                format!("{}&timestamp={}", params, Self::timestamp_ms())
            };
            let signature = Self::sign(&creds.secret_key, &query)?;
            let url = format!("{}{}?{}&signature={}", self.base_url, path, query, signature);
            Ok(self
                .client
                .request(method.clone(), &url)
                .header("X-MBX-APIKEY", &creds.api_key))
        })
        .await
    }

    pub async fn get_account(&self) -> Result<AccountInformation, ConnectorError> {
        let resp = self.signed(Method::GET, "/api/v3/account", "").await?;
        let account_info = resp.json::<AccountInformation>().await?;
        Ok(account_info)
    }

    pub async fn post_market_order(
        &self,
        ticker: &str,
        side: &str,
        quantity: f64,
    ) -> Result<OrderResponse, ConnectorError> {
        let qty = format_quantity(quantity);
        let params = format!(
            "symbol={}&side={}&type=MARKET&quantity={}",
            ticker.to_uppercase(),
            side,
            qty
        );

        info!("Placing Order: {} {} {}", side, qty, ticker);

        let resp = self.signed(Method::POST, "/api/v3/order", &params).await?;
        let order_resp = resp.json::<OrderResponse>().await?;
        info!(
            "Order accepted: ID={} Status={} Filled={} Quote={}",
            order_resp.order_id,
            order_resp.status,
            order_resp.executed_qty,
            order_resp.cummulative_quote_qty
        );
        Ok(order_resp)
    }

    pub async fn get_klines(
        &self,
        ticker: &str,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, ConnectorError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let limit = limit.clamp(1, 1000).to_string();
        let resp = self
            .send_with_backoff(|| {
                Ok(self.client.get(&url).query(&[
                    ("symbol", ticker),
                    ("interval", interval),
                    ("limit", limit.as_str()),
                ]))
            })
            .await?;

        let rows = resp.json::<Vec<KlineResponse>>().await?;
        rows.iter().map(|row| row.to_model()).collect()
    }
}

/// Rounds a base quantity down to six decimals so the order never exceeds the
/// balance it was computed from.
pub fn format_quantity(quantity: f64) -> String {
    let floored = (quantity * 1e6 + 1e-6).floor() / 1e6;
    let text = format!("{:.6}", floored);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[async_trait]
impl ExchangeConnector for BinanceClient {
    async fn fetch_balances(&self) -> Result<HashMap<String, f64>, ConnectorError> {
        let account = self.get_account().await?;
        if !account.can_trade {
            warn!("Binance account reports canTrade=false");
        }
        Ok(account.free_balances())
    }

    async fn market_buy(&self, ticker: &str, base_qty: f64) -> Result<OrderAck, ConnectorError> {
        self.post_market_order(ticker, "BUY", base_qty).await?.to_model()
    }

    async fn market_sell(&self, ticker: &str, base_qty: f64) -> Result<OrderAck, ConnectorError> {
        self.post_market_order(ticker, "SELL", base_qty).await?.to_model()
    }
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    async fn fetch_bars(
        &self,
        pair: &TradingPair,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, ConnectorError> {
        self.get_klines(&pair.ticker(), interval, limit).await
    }
}
