use common::models::{Bar, IndicatorRow};
use ta::Next;
use ta::indicators::{
    BollingerBands, ExponentialMovingAverage, MovingAverageConvergenceDivergence,
    RelativeStrengthIndex,
};
use thiserror::Error;

/// Bars consumed before every indicator has its full history: the MACD
/// signal line is an EMA(9) over an EMA(26) difference.
pub const WARMUP_BARS: usize = 26 + 9 - 1;

#[derive(Error, Debug)]
#[error("Indicator setup rejected: {0}")]
pub struct IndicatorError(String);

struct IndicatorSet {
    ema_12: ExponentialMovingAverage,
    ema_26: ExponentialMovingAverage,
    // Standard RSI(14)
    rsi: RelativeStrengthIndex,
    // Standard MACD(12, 26, 9)
    macd: MovingAverageConvergenceDivergence,
    // Standard BB(20, 2.0)
    bb: BollingerBands,
}

impl IndicatorSet {
    fn new() -> Result<Self, IndicatorError> {
        let err = |e: ta::errors::TaError| IndicatorError(format!("{:?}", e));
        Ok(Self {
            ema_12: ExponentialMovingAverage::new(12).map_err(err)?,
            ema_26: ExponentialMovingAverage::new(26).map_err(err)?,
            rsi: RelativeStrengthIndex::new(14).map_err(err)?,
            macd: MovingAverageConvergenceDivergence::new(12, 26, 9).map_err(err)?,
            bb: BollingerBands::new(20, 2.0).map_err(err)?,
        })
    }

    fn next(&mut self, bar: &Bar) -> IndicatorRow {
        let close = bar.close;
        let macd = self.macd.next(close);
        let bb = self.bb.next(close);
        IndicatorRow {
            bar: *bar,
            ema_12: self.ema_12.next(close),
            ema_26: self.ema_26.next(close),
            rsi_14: self.rsi.next(close),
            macd: macd.macd,
            macd_signal: macd.signal,
            bb_upper: bb.upper,
            bb_middle: bb.average,
            bb_lower: bb.lower,
        }
    }
}

/// Runs the indicator set over `bars` and drops the warm-up rows plus any
/// row whose values are not finite. Every returned row is fully resolved.
pub fn compute_indicators(bars: &[Bar]) -> Result<Vec<IndicatorRow>, IndicatorError> {
    let mut set = IndicatorSet::new()?;
    let rows = bars
        .iter()
        .enumerate()
        .map(|(i, bar)| (i, set.next(bar)))
        .filter(|(i, row)| i + 1 >= WARMUP_BARS && row.is_resolved())
        .map(|(_, row)| row)
        .collect();
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trending(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let c = 100.0 + i as f64 + (i as f64 * 0.7).sin() * 3.0;
                Bar::new(i as i64 * 60_000, c, c + 1.0, c - 1.0, c, 10.0 + i as f64)
            })
            .collect()
    }

    #[test]
    fn test_warmup_rows_dropped() {
        let bars = trending(100);
        let rows = compute_indicators(&bars).unwrap();
        assert_eq!(rows.len(), 100 - (WARMUP_BARS - 1));
        assert_eq!(rows[0].bar.timestamp, bars[WARMUP_BARS - 1].timestamp);
        assert!(rows.iter().all(|r| r.is_resolved()));
    }

    #[test]
    fn test_short_history_yields_nothing() {
        assert!(compute_indicators(&trending(WARMUP_BARS - 1)).unwrap().is_empty());
        assert!(compute_indicators(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_bands_are_ordered() {
        let rows = compute_indicators(&trending(80)).unwrap();
        for r in rows {
            assert!(r.bb_lower <= r.bb_middle && r.bb_middle <= r.bb_upper);
            assert!((0.0..=100.0).contains(&r.rsi_14));
        }
    }
}
