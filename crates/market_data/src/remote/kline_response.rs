use common::models::Bar;
use serde::Deserialize;

use crate::traits::{ConnectorError, RemoteResponse};

/// One row of `GET /api/v3/klines`. Binance sends each kline as a positional
/// array with prices and volumes encoded as strings.
#[derive(Debug, Deserialize)]
pub struct KlineResponse(
    pub i64,    // open time
    pub String, // open
    pub String, // high
    pub String, // low
    pub String, // close
    pub String, // volume
    pub i64,    // close time
    pub String, // quote asset volume
    pub u64,    // number of trades
    pub String, // taker buy base volume
    pub String, // taker buy quote volume
    pub String, // unused
);

impl RemoteResponse<Bar> for KlineResponse {
    fn to_model(&self) -> Result<Bar, ConnectorError> {
        Ok(Bar::new(
            self.0,
            parse_num(&self.1)?,
            parse_num(&self.2)?,
            parse_num(&self.3)?,
            parse_num(&self.4)?,
            parse_num(&self.5)?,
        ))
    }
}

fn parse_num(raw: &str) -> Result<f64, ConnectorError> {
    raw.parse()
        .map_err(|_| ConnectorError::Decode(format!("not a number: '{}'", raw)))
}
