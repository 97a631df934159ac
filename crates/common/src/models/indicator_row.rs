use serde::{Deserialize, Serialize};

use super::Bar;

/// A bar with its derived technical indicators fully resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRow {
    pub bar: Bar,
    pub ema_12: f64,
    pub ema_26: f64,
    pub rsi_14: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
}

impl IndicatorRow {
    pub fn is_resolved(&self) -> bool {
        [
            self.ema_12,
            self.ema_26,
            self.rsi_14,
            self.macd,
            self.macd_signal,
            self.bb_upper,
            self.bb_middle,
            self.bb_lower,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}
