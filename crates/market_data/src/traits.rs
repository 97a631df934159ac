use std::collections::HashMap;

use async_trait::async_trait;
use common::models::{Bar, TradingPair};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Exchange rejected request ({status}): {body}")]
    Api { status: u16, body: String },
    #[error("Rate limited by exchange ({status}), retries exhausted")]
    RateLimited { status: u16 },
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("Signed endpoint called without API credentials")]
    Unauthenticated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderAck {
    pub order_id: u64,
    pub status: String,
    pub executed_qty: f64,
}

/// Live account operations. Every call may fail; callers turn failures into
/// "not executed" outcomes.
#[async_trait]
pub trait ExchangeConnector: Send + Sync {
    /// Free balance per currency code.
    async fn fetch_balances(&self) -> Result<HashMap<String, f64>, ConnectorError>;

    async fn market_buy(&self, ticker: &str, base_qty: f64) -> Result<OrderAck, ConnectorError>;

    async fn market_sell(&self, ticker: &str, base_qty: f64) -> Result<OrderAck, ConnectorError>;
}

#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Closed and in-progress bars, oldest first.
    async fn fetch_bars(
        &self,
        pair: &TradingPair,
        interval: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, ConnectorError>;
}

#[async_trait]
pub trait NewsSource: Send + Sync {
    async fn fetch_headlines(&self) -> Result<Vec<String>, ConnectorError>;
}

/// Wire payload that converts into a domain value.
pub trait RemoteResponse<T> {
    fn to_model(&self) -> Result<T, ConnectorError>;
}
