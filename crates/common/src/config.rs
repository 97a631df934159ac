//! Session configuration and core tunables, read from the environment
//! (`.env` is honoured through `dotenvy`).

use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{PairParseError, TradingPair};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error("Unknown trade mode '{0}' (expected PAPER or REAL)")]
    UnknownMode(String),
    #[error("Unknown predictor '{0}' (expected linear, forest or onnx)")]
    UnknownPredictor(String),
    #[error(transparent)]
    Pair(#[from] PairParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeMode {
    Paper,
    Real,
}

impl FromStr for TradeMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PAPER" => Ok(TradeMode::Paper),
            "REAL" => Ok(TradeMode::Real),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

impl fmt::Display for TradeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeMode::Paper => f.write_str("PAPER"),
            TradeMode::Real => f.write_str("REAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredictorKind {
    Linear,
    Forest,
    Onnx,
}

impl FromStr for PredictorKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "linear" => Ok(PredictorKind::Linear),
            "forest" => Ok(PredictorKind::Forest),
            "onnx" => Ok(PredictorKind::Onnx),
            other => Err(ConfigError::UnknownPredictor(other.to_string())),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub api_key: String,
    pub secret_key: String,
}

// Keep secrets out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"***")
            .field("secret_key", &"***")
            .finish()
    }
}

/// Fusion weights of the signal generator. Not required to sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SignalWeights {
    pub tech: f64,
    pub sentiment: f64,
    pub ml: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            tech: 0.4,
            sentiment: 0.2,
            ml: 0.4,
        }
    }
}

/// Threshold bands picked from the latest trade outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdBands {
    /// After a profitable exit.
    pub aggressive: f64,
    /// Empty history or latest record is an entry.
    pub base: f64,
    /// After a losing exit.
    pub defensive: f64,
}

impl Default for ThresholdBands {
    fn default() -> Self {
        Self {
            aggressive: 0.15,
            base: 0.20,
            defensive: 0.30,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TraderConfig {
    /// Minimum order value in quote units.
    pub min_notional: f64,
    /// Fraction of the quote balance kept back for fees.
    pub fee_buffer: f64,
    pub paper_balance: f64,
}

impl Default for TraderConfig {
    fn default() -> Self {
        Self {
            min_notional: 10.0,
            fee_buffer: 0.01,
            paper_balance: 10_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub mode: TradeMode,
    pub pair: TradingPair,
    pub credentials: Option<Credentials>,
    pub base_url: String,
    pub cycle_interval: Duration,
    pub bar_interval: String,
    pub bar_limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub lookback: usize,
    pub predictor: PredictorKind,
    pub model_path: String,
    pub training_interval: Duration,
    pub training_limit: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub trader: TraderConfig,
    pub weights: SignalWeights,
    pub thresholds: ThresholdBands,
    pub model: ModelConfig,
    pub database_path: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup; missing keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mode = match lookup("TRADE_MODE") {
            Some(v) => v.parse()?,
            None => TradeMode::Paper,
        };
        let pair = lookup("TRADE_SYMBOL")
            .unwrap_or_else(|| "BTC/USDT".to_string())
            .parse::<TradingPair>()?;

        let credentials = match (lookup("BINANCE_API_KEY"), lookup("BINANCE_SECRET_KEY")) {
            (Some(api_key), Some(secret_key)) if !api_key.is_empty() && !secret_key.is_empty() => {
                Some(Credentials {
                    api_key,
                    secret_key,
                })
            }
            _ => None,
        };

        let defaults = TraderConfig::default();
        let trader = TraderConfig {
            min_notional: parse_or(&lookup, "MIN_NOTIONAL", defaults.min_notional)?,
            fee_buffer: parse_or(&lookup, "FEE_BUFFER", defaults.fee_buffer)?,
            paper_balance: parse_or(&lookup, "PAPER_BALANCE", defaults.paper_balance)?,
        };
        if !(0.0..1.0).contains(&trader.fee_buffer) {
            return Err(ConfigError::InvalidValue {
                key: "FEE_BUFFER",
                value: trader.fee_buffer.to_string(),
            });
        }

        let w = SignalWeights::default();
        let weights = SignalWeights {
            tech: parse_or(&lookup, "WEIGHT_TECH", w.tech)?,
            sentiment: parse_or(&lookup, "WEIGHT_SENTIMENT", w.sentiment)?,
            ml: parse_or(&lookup, "WEIGHT_ML", w.ml)?,
        };

        let t = ThresholdBands::default();
        let thresholds = ThresholdBands {
            aggressive: parse_or(&lookup, "THRESHOLD_AGGRESSIVE", t.aggressive)?,
            base: parse_or(&lookup, "THRESHOLD_BASE", t.base)?,
            defensive: parse_or(&lookup, "THRESHOLD_DEFENSIVE", t.defensive)?,
        };

        let lookback: usize = parse_or(&lookup, "LOOKBACK", 60)?;
        if lookback == 0 {
            return Err(ConfigError::InvalidValue {
                key: "LOOKBACK",
                value: "0".to_string(),
            });
        }

        let model = ModelConfig {
            lookback,
            predictor: match lookup("PREDICTOR") {
                Some(v) => v.parse()?,
                None => PredictorKind::Linear,
            },
            model_path: lookup("MODEL_PATH").unwrap_or_else(|| "models/lstm.onnx".to_string()),
            training_interval: Duration::from_secs(parse_or(
                &lookup,
                "TRAINING_INTERVAL_SECS",
                3600,
            )?),
            training_limit: parse_or(&lookup, "TRAINING_LIMIT", 1000)?,
        };

        let session = SessionConfig {
            mode,
            pair,
            credentials,
            base_url: lookup("BINANCE_BASE_URL")
                .unwrap_or_else(|| "https://api.binance.com".to_string()),
            cycle_interval: Duration::from_secs(parse_or(&lookup, "CYCLE_INTERVAL_SECS", 60)?),
            bar_interval: lookup("BAR_INTERVAL").unwrap_or_else(|| "1h".to_string()),
            bar_limit: parse_or(&lookup, "BAR_LIMIT", 100)?,
        };

        Ok(Self {
            session,
            trader,
            weights,
            thresholds,
            model,
            database_path: lookup("DATABASE_PATH")
                .unwrap_or_else(|| "data/trading.db".to_string()),
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(default),
    }
}
