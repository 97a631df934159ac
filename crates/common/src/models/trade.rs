use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

/// Marker read back by the adaptive threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeOutcome {
    Entry,
    Profit,
    Loss,
}

impl TradeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeOutcome::Entry => "entry",
            TradeOutcome::Profit => "profit",
            TradeOutcome::Loss => "loss",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Position {
    Flat,
    Long,
}

/// Free balances of the traded pair: `quote` is what we buy with, `base` what we hold.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Balances {
    pub quote_free: f64,
    pub base_free: f64,
}

impl Balances {
    pub fn portfolio_value(&self, price: f64) -> f64 {
        self.quote_free + self.base_free * price
    }
}

/// Append-only trade log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub symbol: String,
    pub side: TradeSide,
    pub price: f64,
    pub quantity: f64,
    pub outcome: TradeOutcome,
    /// P/L of an exit, `None` on entries.
    pub pnl: Option<f64>,
    pub message: String,
}

impl TradeRecord {
    pub fn entry(
        timestamp: DateTime<Utc>,
        symbol: &str,
        price: f64,
        quantity: f64,
        message: String,
    ) -> Self {
        Self {
            timestamp,
            symbol: symbol.to_string(),
            side: TradeSide::Buy,
            price,
            quantity,
            outcome: TradeOutcome::Entry,
            pnl: None,
            message,
        }
    }

    /// Exit record. Only a strictly positive P/L is tagged as profit.
    pub fn exit(
        timestamp: DateTime<Utc>,
        symbol: &str,
        price: f64,
        quantity: f64,
        pnl: f64,
        message: String,
    ) -> Self {
        let outcome = if pnl > 0.0 {
            TradeOutcome::Profit
        } else {
            TradeOutcome::Loss
        };
        Self {
            timestamp,
            symbol: symbol.to_string(),
            side: TradeSide::Sell,
            price,
            quantity,
            outcome,
            pnl: Some(pnl),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_marker_from_pnl() {
        let now = Utc::now();
        let win = TradeRecord::exit(now, "BTC/USDT", 110.0, 1.0, 10.0, String::new());
        let flat = TradeRecord::exit(now, "BTC/USDT", 100.0, 1.0, 0.0, String::new());
        let lose = TradeRecord::exit(now, "BTC/USDT", 90.0, 1.0, -10.0, String::new());

        assert_eq!(win.outcome, TradeOutcome::Profit);
        assert_eq!(flat.outcome, TradeOutcome::Loss);
        assert_eq!(lose.outcome, TradeOutcome::Loss);
    }

    #[test]
    fn test_portfolio_value() {
        let b = Balances {
            quote_free: 100.0,
            base_free: 2.0,
        };
        assert_eq!(b.portfolio_value(50.0), 200.0);
    }
}
