//! Sequence predictors: a scaled `[1, lookback, features]` window in, one
//! scaled target value out.

mod forest;
mod linear;
mod onnx;

pub use forest::ForestPredictor;
pub use linear::LinearPredictor;
pub use onnx::OnnxPredictor;

use common::config::PredictorKind;
use ndarray::{Array2, ArrayView3, Axis};
use thiserror::Error;

use crate::windowing::TrainingSet;

#[derive(Error, Debug)]
pub enum PredictorError {
    #[error("Predictor '{0}' has not been trained")]
    NotTrained(&'static str),
    #[error("Training set is empty")]
    EmptyTrainingSet,
    #[error("Expected {expected} inputs per window, got {actual}")]
    Shape { expected: usize, actual: usize },
    #[error("Predictor '{0}' is trained offline")]
    TrainingUnsupported(&'static str),
    #[error("Model artifact: {0}")]
    Artifact(#[from] serde_json::Error),
    #[error("Model artifact is malformed: {0}")]
    MalformedArtifact(String),
    #[error("ONNX runtime: {0}")]
    Onnx(String),
}

pub trait Predictor: Send + Sync {
    fn name(&self) -> &'static str;

    fn train(&mut self, set: &TrainingSet) -> Result<(), PredictorError>;

    fn predict(&self, window: ArrayView3<f32>) -> Result<f32, PredictorError>;

    fn is_trained(&self) -> bool;

    /// Serialised model, `None` for predictors whose weights live outside the store.
    fn to_artifact(&self) -> Result<Option<Vec<u8>>, PredictorError>;

    fn load_artifact(&mut self, bytes: &[u8]) -> Result<(), PredictorError>;

    /// Mean absolute error over every window of `set`, in scaled units.
    fn evaluate(&self, set: &TrainingSet) -> Result<f32, PredictorError> {
        if set.is_empty() {
            return Err(PredictorError::EmptyTrainingSet);
        }
        let mut total = 0.0f32;
        for (window, target) in set.x.axis_iter(Axis(0)).zip(set.y.iter()) {
            total += (self.predict(window.insert_axis(Axis(0)))? - target).abs();
        }
        Ok(total / set.len() as f32)
    }
}

pub fn build_predictor(kind: PredictorKind, model_path: &str) -> Box<dyn Predictor> {
    match kind {
        PredictorKind::Linear => Box::new(LinearPredictor::default()),
        PredictorKind::Forest => Box::new(ForestPredictor::default()),
        PredictorKind::Onnx => Box::new(OnnxPredictor::new(model_path)),
    }
}

/// `[samples, lookback, features]` → `[samples, lookback * features]`.
pub(crate) fn flatten_samples(x: ArrayView3<f32>) -> Array2<f32> {
    let (samples, lookback, features) = x.dim();
    let flat: Vec<f32> = x.iter().copied().collect();
    Array2::from_shape_vec((samples, lookback * features), flat)
        .unwrap_or_else(|_| Array2::zeros((0, lookback * features)))
}

/// Flattened single window; rejects batches and mismatched widths.
pub(crate) fn flatten_window(
    window: ArrayView3<f32>,
    expected: usize,
) -> Result<Vec<f32>, PredictorError> {
    let actual = window.len();
    if window.dim().0 != 1 || actual != expected {
        return Err(PredictorError::Shape { expected, actual });
    }
    Ok(window.iter().copied().collect())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use ndarray::{Array1, Array3};

    use crate::scaling::{FEATURE_COLUMNS, ScalerState, TARGET_INDEX};
    use crate::windowing::TrainingSet;

    /// Synthetic set whose target is a step function of the last close.
    pub fn step_set(samples: usize, lookback: usize) -> TrainingSet {
        let mut x = Array3::<f32>::zeros((samples, lookback, 2));
        let mut y = Array1::<f32>::zeros(samples);
        for i in 0..samples {
            let level = (i % 10) as f32 / 9.0;
            for t in 0..lookback {
                x[[i, t, 0]] = level;
                x[[i, t, 1]] = ((i * 7 + t) % 5) as f32 / 4.0;
            }
            y[i] = if level > 0.5 { 1.0 } else { 0.0 };
        }
        let scaler = ScalerState {
            columns: FEATURE_COLUMNS.iter().map(|c| c.to_string()).collect(),
            mins: vec![0.0, 0.0],
            maxs: vec![1.0, 1.0],
            target_index: TARGET_INDEX,
        };
        TrainingSet { x, y, scaler }
    }

    pub fn mse(pred: &[f32], truth: &[f32]) -> f32 {
        pred.iter()
            .zip(truth)
            .map(|(p, t)| (p - t) * (p - t))
            .sum::<f32>()
            / truth.len() as f32
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::step_set;
    use super::*;

    /// Always predicts the midpoint of the step.
    struct Midpoint;

    impl Predictor for Midpoint {
        fn name(&self) -> &'static str {
            "midpoint"
        }

        fn train(&mut self, _set: &TrainingSet) -> Result<(), PredictorError> {
            Ok(())
        }

        fn predict(&self, _window: ArrayView3<f32>) -> Result<f32, PredictorError> {
            Ok(0.5)
        }

        fn is_trained(&self) -> bool {
            true
        }

        fn to_artifact(&self) -> Result<Option<Vec<u8>>, PredictorError> {
            Ok(None)
        }

        fn load_artifact(&mut self, _bytes: &[u8]) -> Result<(), PredictorError> {
            Ok(())
        }
    }

    #[test]
    fn test_evaluate_is_mean_absolute_error() {
        let set = step_set(200, 4);
        assert_eq!(Midpoint.evaluate(&set).unwrap(), 0.5);

        let mut linear = LinearPredictor::default();
        linear.train(&set).unwrap();
        assert!(linear.evaluate(&set).unwrap() < 0.5);
    }

    #[test]
    fn test_evaluate_needs_windows() {
        assert!(matches!(
            Midpoint.evaluate(&step_set(0, 3)),
            Err(PredictorError::EmptyTrainingSet)
        ));
    }
}
