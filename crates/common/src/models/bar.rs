use serde::{Deserialize, Serialize};

/// One OHLCV candle. `timestamp` is the open time in milliseconds since epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(timestamp: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Feature vector in the layout the predictor is trained on: `[close, volume]`.
    pub fn features(&self) -> [f64; 2] {
        [self.close, self.volume]
    }
}

/// Checks that timestamps are strictly increasing.
pub fn is_ordered(bars: &[Bar]) -> bool {
    bars.windows(2).all(|w| w[0].timestamp < w[1].timestamp)
}
