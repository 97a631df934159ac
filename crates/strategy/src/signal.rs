use common::config::{SignalWeights, ThresholdBands};
use common::models::{IndicatorRow, Signal, SignalDecision, TradeOutcome, TradeRecord};

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;
/// Predicted move (fraction of the current price) that counts as directional.
const ML_MOVE: f64 = 0.005;

/// Fuses technical, sentiment and predicted-price scores into a decision.
///
/// Pure: the same inputs always give the same decision. The only feedback
/// is the caller-supplied trade history, of which only the latest record is
/// read.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SignalGenerator {
    weights: SignalWeights,
    bands: ThresholdBands,
}

impl SignalGenerator {
    pub fn new(weights: SignalWeights, bands: ThresholdBands) -> Self {
        Self { weights, bands }
    }

    pub fn generate(
        &self,
        current_price: f64,
        predicted_price: f64,
        sentiment: f64,
        row: &IndicatorRow,
        history: &[TradeRecord],
    ) -> SignalDecision {
        let tech = tech_score(row);
        let ml = ml_score(current_price, predicted_price);
        let score = tech * self.weights.tech + sentiment * self.weights.sentiment + ml * self.weights.ml;
        let threshold = self.threshold_for(history);

        let signal = if score > threshold {
            Signal::Buy
        } else if score < -threshold {
            Signal::Sell
        } else {
            Signal::Hold
        };

        SignalDecision {
            signal,
            score,
            threshold,
        }
    }

    pub fn threshold_for(&self, history: &[TradeRecord]) -> f64 {
        match history.last().map(|r| r.outcome) {
            Some(TradeOutcome::Loss) => self.bands.defensive,
            Some(TradeOutcome::Profit) => self.bands.aggressive,
            Some(TradeOutcome::Entry) | None => self.bands.base,
        }
    }
}

/// RSI extremes contribute ±0.5; the MACD crossover always contributes ±0.5.
pub fn tech_score(row: &IndicatorRow) -> f64 {
    let rsi = if row.rsi_14 < RSI_OVERSOLD {
        0.5
    } else if row.rsi_14 > RSI_OVERBOUGHT {
        -0.5
    } else {
        0.0
    };
    let macd = if row.macd > row.macd_signal { 0.5 } else { -0.5 };
    rsi + macd
}

pub fn ml_score(current_price: f64, predicted_price: f64) -> f64 {
    if current_price <= 0.0 {
        return 0.0;
    }
    let change = (predicted_price - current_price) / current_price;
    if change > ML_MOVE {
        1.0
    } else if change < -ML_MOVE {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use common::models::Bar;

    fn row(rsi: f64, macd: f64, macd_signal: f64) -> IndicatorRow {
        IndicatorRow {
            bar: Bar::new(0, 100.0, 100.0, 100.0, 100.0, 1.0),
            ema_12: 100.0,
            ema_26: 100.0,
            rsi_14: rsi,
            macd,
            macd_signal,
            bb_upper: 101.0,
            bb_middle: 100.0,
            bb_lower: 99.0,
        }
    }

    fn exit(pnl: f64) -> TradeRecord {
        TradeRecord::exit(Utc::now(), "BTC/USDT", 100.0, 1.0, pnl, String::new())
    }

    fn entry() -> TradeRecord {
        TradeRecord::entry(Utc::now(), "BTC/USDT", 100.0, 1.0, String::new())
    }

    #[test]
    fn test_oversold_bullish_buy() {
        let generator = SignalGenerator::default();
        let d = generator.generate(100.0, 101.0, 0.2, &row(25.0, 1.0, 0.5), &[]);

        assert_eq!(tech_score(&row(25.0, 1.0, 0.5)), 1.0);
        assert_eq!(ml_score(100.0, 101.0), 1.0);
        assert!((d.score - 0.84).abs() < 1e-12);
        assert_eq!(d.threshold, 0.20);
        assert_eq!(d.signal, Signal::Buy);
    }

    #[test]
    fn test_overbought_bearish_sell() {
        let d = SignalGenerator::default().generate(100.0, 98.0, -0.5, &row(80.0, -1.0, 0.0), &[]);
        assert!((d.score - (-0.4 - 0.1 - 0.4)).abs() < 1e-12);
        assert_eq!(d.signal, Signal::Sell);
    }

    #[test]
    fn test_macd_never_neutral() {
        assert_eq!(tech_score(&row(50.0, 1.0, 1.0)), -0.5);
        assert_eq!(tech_score(&row(50.0, 1.1, 1.0)), 0.5);
        assert_eq!(tech_score(&row(100.0, 0.0, 1.0)), -1.0);
    }

    #[test]
    fn test_ml_band_edges() {
        assert_eq!(ml_score(100.0, 100.5), 0.0);
        assert_eq!(ml_score(100.0, 99.5), 0.0);
        assert_eq!(ml_score(100.0, 100.51), 1.0);
        assert_eq!(ml_score(100.0, 99.49), -1.0);
    }

    #[test]
    fn test_threshold_follows_latest_record_only() {
        let g = SignalGenerator::default();
        assert_eq!(g.threshold_for(&[]), 0.20);
        assert_eq!(g.threshold_for(&[exit(-5.0)]), 0.30);
        assert_eq!(g.threshold_for(&[exit(5.0)]), 0.15);
        assert_eq!(g.threshold_for(&[exit(-5.0), exit(-1.0), exit(5.0)]), 0.15);
        assert_eq!(g.threshold_for(&[exit(5.0), entry()]), 0.20);
    }

    #[test]
    fn test_threshold_gates_decision() {
        let g = SignalGenerator::default();
        // tech 0.5 * 0.4 = 0.2, nothing else.
        let r = row(50.0, 1.0, 0.0);
        assert_eq!(g.generate(100.0, 100.0, 0.0, &r, &[exit(5.0)]).signal, Signal::Buy);
        assert_eq!(g.generate(100.0, 100.0, 0.0, &r, &[exit(-5.0)]).signal, Signal::Hold);
    }

    #[test]
    fn test_score_is_not_clamped() {
        let g = SignalGenerator::new(
            SignalWeights {
                tech: 1.0,
                sentiment: 1.0,
                ml: 1.0,
            },
            ThresholdBands::default(),
        );
        let d = g.generate(100.0, 120.0, 1.0, &row(10.0, 2.0, 1.0), &[]);
        assert_eq!(d.score, 3.0);
    }

    #[test]
    fn test_generate_is_pure() {
        let g = SignalGenerator::default();
        let history = vec![entry(), exit(-3.0)];
        let r = row(45.0, -0.2, 0.1);
        let first = g.generate(100.0, 99.0, -0.3, &r, &history);
        for _ in 0..5 {
            assert_eq!(g.generate(100.0, 99.0, -0.3, &r, &history), first);
        }
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_degenerate_rsi_is_consumed() {
        let d = SignalGenerator::default().generate(100.0, 100.0, 0.0, &row(100.0, 0.0, 0.0), &[]);
        assert_eq!(d.signal, Signal::Sell);
    }
}
