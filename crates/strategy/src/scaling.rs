use ndarray::{Array2, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Column layout of the predictor input. The predicted quantity is `close`,
/// at `TARGET_INDEX`; inverse scaling reads back only that column.
pub const FEATURE_COLUMNS: [&str; 2] = ["close", "volume"];
pub const TARGET_INDEX: usize = 0;

#[derive(Error, Debug, PartialEq)]
pub enum ScalerError {
    #[error("Cannot fit a scaler on an empty matrix")]
    Empty,
    #[error("Target column {target} is outside {features} features")]
    TargetOutOfRange { target: usize, features: usize },
    #[error("Scaler was fit on {expected} features, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },
    #[error("Column {column} has an invalid range")]
    InvalidRange { column: usize },
}

/// Per-feature min-max transform onto [0, 1].
///
/// The state is fit once on a training corpus and then reused unchanged at
/// inference. Live values outside the fitted range map outside [0, 1]; they
/// are not clipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalerState {
    pub columns: Vec<String>,
    pub mins: Vec<f64>,
    pub maxs: Vec<f64>,
    /// Column the predictor targets. Part of the persisted contract so that
    /// inverse scaling never relies on implicit column order.
    pub target_index: usize,
}

impl ScalerState {
    pub fn fit(
        data: ArrayView2<f64>,
        columns: &[&str],
        target_index: usize,
    ) -> Result<Self, ScalerError> {
        let features = data.ncols();
        if data.nrows() == 0 || features == 0 {
            return Err(ScalerError::Empty);
        }
        if columns.len() != features {
            return Err(ScalerError::FeatureMismatch {
                expected: columns.len(),
                actual: features,
            });
        }
        if target_index >= features {
            return Err(ScalerError::TargetOutOfRange {
                target: target_index,
                features,
            });
        }

        let mins = data
            .axis_iter(Axis(1))
            .map(|col| col.fold(f64::INFINITY, |a, &b| a.min(b)))
            .collect();
        let maxs = data
            .axis_iter(Axis(1))
            .map(|col| col.fold(f64::NEG_INFINITY, |a, &b| a.max(b)))
            .collect();

        Ok(Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            mins,
            maxs,
            target_index,
        })
    }

    /// Structural check for states that did not come from `fit`, e.g. a
    /// stored artifact.
    pub fn validate(&self) -> Result<(), ScalerError> {
        let features = self.mins.len();
        if features == 0 {
            return Err(ScalerError::Empty);
        }
        for len in [self.maxs.len(), self.columns.len()] {
            if len != features {
                return Err(ScalerError::FeatureMismatch {
                    expected: features,
                    actual: len,
                });
            }
        }
        if self.target_index >= features {
            return Err(ScalerError::TargetOutOfRange {
                target: self.target_index,
                features,
            });
        }
        for (column, (lo, hi)) in self.mins.iter().zip(&self.maxs).enumerate() {
            if !lo.is_finite() || !hi.is_finite() || hi < lo {
                return Err(ScalerError::InvalidRange { column });
            }
        }
        Ok(())
    }

    pub fn feature_count(&self) -> usize {
        self.mins.len()
    }

    // A constant column has zero range; it is shifted to 0 and left unscaled.
    fn range(&self, col: usize) -> f64 {
        let r = self.maxs[col] - self.mins[col];
        if r == 0.0 { 1.0 } else { r }
    }

    pub fn transform(&self, data: ArrayView2<f64>) -> Result<Array2<f64>, ScalerError> {
        if data.ncols() != self.feature_count() {
            return Err(ScalerError::FeatureMismatch {
                expected: self.feature_count(),
                actual: data.ncols(),
            });
        }
        let mut out = data.to_owned();
        for (col, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (min, range) = (self.mins[col], self.range(col));
            column.mapv_inplace(|v| (v - min) / range);
        }
        Ok(out)
    }

    /// Maps a scaled prediction of the target column back to price space.
    pub fn inverse_target(&self, scaled: f64) -> f64 {
        let col = self.target_index;
        scaled * self.range(col) + self.mins[col]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_fit_transform_per_feature() {
        let data = array![[10.0, 100.0], [20.0, 300.0], [15.0, 200.0]];
        let scaler = ScalerState::fit(data.view(), &FEATURE_COLUMNS, TARGET_INDEX).unwrap();
        let scaled = scaler.transform(data.view()).unwrap();

        assert_eq!(scaled, array![[0.0, 0.0], [1.0, 1.0], [0.5, 0.5]]);
        assert_eq!(scaler.inverse_target(0.5), 15.0);
    }

    #[test]
    fn test_constant_column_maps_to_zero() {
        let data = array![[5.0, 1.0], [5.0, 2.0]];
        let scaler = ScalerState::fit(data.view(), &FEATURE_COLUMNS, 0).unwrap();
        let scaled = scaler.transform(data.view()).unwrap();
        assert_eq!(scaled.column(0).to_vec(), vec![0.0, 0.0]);
        assert_eq!(scaler.inverse_target(0.0), 5.0);
    }

    #[test]
    fn test_inverse_uses_explicit_target_column() {
        let data = array![[10.0, 100.0], [20.0, 300.0]];
        let scaler = ScalerState::fit(data.view(), &FEATURE_COLUMNS, 1).unwrap();
        assert_eq!(scaler.inverse_target(1.0), 300.0);
    }

    #[test]
    fn test_validate_catches_malformed_state() {
        let data = array![[10.0, 100.0], [20.0, 300.0]];
        let good = ScalerState::fit(data.view(), &FEATURE_COLUMNS, 0).unwrap();
        assert_eq!(good.validate(), Ok(()));

        let short_max = ScalerState {
            maxs: vec![20.0],
            ..good.clone()
        };
        assert_eq!(
            short_max.validate(),
            Err(ScalerError::FeatureMismatch {
                expected: 2,
                actual: 1
            })
        );

        let far_target = ScalerState {
            target_index: 5,
            ..good.clone()
        };
        assert!(matches!(
            far_target.validate(),
            Err(ScalerError::TargetOutOfRange { target: 5, .. })
        ));

        let inverted = ScalerState {
            mins: vec![30.0, 100.0],
            ..good
        };
        assert_eq!(
            inverted.validate(),
            Err(ScalerError::InvalidRange { column: 0 })
        );
    }

    #[test]
    fn test_rejects_bad_shapes() {
        let data = array![[1.0, 2.0]];
        assert_eq!(
            ScalerState::fit(data.view(), &FEATURE_COLUMNS, 2),
            Err(ScalerError::TargetOutOfRange {
                target: 2,
                features: 2
            })
        );
        let empty = Array2::<f64>::zeros((0, 2));
        assert_eq!(
            ScalerState::fit(empty.view(), &FEATURE_COLUMNS, 0),
            Err(ScalerError::Empty)
        );

        let scaler = ScalerState::fit(data.view(), &FEATURE_COLUMNS, 0).unwrap();
        let wide = array![[1.0, 2.0, 3.0]];
        assert!(matches!(
            scaler.transform(wide.view()),
            Err(ScalerError::FeatureMismatch { .. })
        ));
    }
}
