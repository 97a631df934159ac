use std::path::Path;
use std::sync::Arc;

use ndarray::ArrayView3;
use tracing::{error, info, warn};
use tract_onnx::prelude::*;

use super::{Predictor, PredictorError};
use crate::scaling::TARGET_INDEX;
use crate::windowing::TrainingSet;

type RunnableModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Sequence model exported to ONNX and trained offline.
///
/// Without a loadable model file the predictor runs in simulation mode and
/// echoes the last scaled target value, i.e. a "no change" forecast.
#[derive(Clone)]
pub struct OnnxPredictor {
    model: Option<Arc<RunnableModel>>,
}

impl OnnxPredictor {
    pub fn new(model_path: &str) -> Self {
        let path = Path::new(model_path);
        let model = if path.exists() {
            info!("Loading ONNX model from {:?}", path);
            match Self::load_model(path) {
                Ok(plan) => Some(Arc::new(plan)),
                Err(e) => {
                    error!("Failed to load model: {}", e);
                    None
                }
            }
        } else {
            warn!(
                "ONNX model not found at {:?}. Running in SIMULATION mode (last-value predictions).",
                path
            );
            None
        };

        Self { model }
    }

    fn load_model(path: &Path) -> TractResult<RunnableModel> {
        tract_onnx::onnx()
            .model_for_path(path)?
            .into_optimized()?
            .into_runnable()
    }

    pub fn is_simulated(&self) -> bool {
        self.model.is_none()
    }

    fn run(model: &RunnableModel, window: ArrayView3<f32>) -> TractResult<f32> {
        let tensor = tract_ndarray::Array::from_shape_vec(window.dim(), window.iter().copied().collect())?
            .into_tensor();
        let result = model.run(tvec!(tensor.into()))?;
        let output = result[0].to_array_view::<f32>()?;
        output
            .iter()
            .next()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("model produced an empty output"))
    }
}

impl Predictor for OnnxPredictor {
    fn name(&self) -> &'static str {
        "onnx"
    }

    fn train(&mut self, _set: &TrainingSet) -> Result<(), PredictorError> {
        Err(PredictorError::TrainingUnsupported(self.name()))
    }

    fn predict(&self, window: ArrayView3<f32>) -> Result<f32, PredictorError> {
        let (batch, lookback, features) = window.dim();
        if batch != 1 || lookback == 0 || features <= TARGET_INDEX {
            return Err(PredictorError::Shape {
                expected: lookback.max(1) * features.max(TARGET_INDEX + 1),
                actual: window.len(),
            });
        }
        match &self.model {
            Some(model) => {
                Self::run(model, window).map_err(|e| PredictorError::Onnx(e.to_string()))
            }
            None => Ok(window[[0, lookback - 1, TARGET_INDEX]]),
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::fixtures::step_set;
    use ndarray::Array3;

    #[test]
    fn test_missing_model_echoes_last_target() {
        let p = OnnxPredictor::new("does/not/exist.onnx");
        assert!(p.is_simulated());

        let mut window = Array3::<f32>::zeros((1, 4, 2));
        window[[0, 3, TARGET_INDEX]] = 0.42;
        window[[0, 2, TARGET_INDEX]] = 0.9;
        assert_eq!(p.predict(window.view()).unwrap(), 0.42);
    }

    #[test]
    fn test_training_is_offline() {
        let mut p = OnnxPredictor::new("does/not/exist.onnx");
        assert!(matches!(
            p.train(&step_set(3, 2)),
            Err(PredictorError::TrainingUnsupported("onnx"))
        ));
        assert!(p.to_artifact().unwrap().is_none());
    }

    #[test]
    fn test_rejects_batches() {
        let p = OnnxPredictor::new("does/not/exist.onnx");
        let batch = Array3::<f32>::zeros((2, 4, 2));
        assert!(matches!(
            p.predict(batch.view()),
            Err(PredictorError::Shape { .. })
        ));
    }
}
