use ndarray::{Array1, ArrayView3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Predictor, PredictorError, flatten_samples, flatten_window};
use crate::windowing::TrainingSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LinearModel {
    weights: Vec<f32>,
    bias: f32,
}

/// Ridge regression over the flattened window, fit by batch gradient descent.
#[derive(Debug, Clone)]
pub struct LinearPredictor {
    epochs: usize,
    l2: f32,
    model: Option<LinearModel>,
}

impl Default for LinearPredictor {
    fn default() -> Self {
        Self::new(2000, 1e-3)
    }
}

impl LinearPredictor {
    pub fn new(epochs: usize, l2: f32) -> Self {
        Self {
            epochs,
            l2,
            model: None,
        }
    }
}

impl Predictor for LinearPredictor {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn train(&mut self, set: &TrainingSet) -> Result<(), PredictorError> {
        if set.is_empty() {
            return Err(PredictorError::EmptyTrainingSet);
        }
        let x = flatten_samples(set.x.view());
        let y = &set.y;
        let (n, d) = x.dim();
        let inv_n = 1.0 / n as f32;
        // Inputs live in [0, 1]: the Hessian's largest eigenvalue is below d + 1.
        let lr = 1.0 / (d + 1) as f32;

        let mut w = Array1::<f32>::zeros(d);
        let mut b = y.mean().unwrap_or(0.0);
        for _ in 0..self.epochs {
            let err = x.dot(&w) + b - y;
            let grad_w = x.t().dot(&err) * inv_n + &w * self.l2;
            let grad_b = err.sum() * inv_n;
            w.scaled_add(-lr, &grad_w);
            b -= lr * grad_b;
        }

        debug!("Linear predictor fit on {} samples x {} inputs", n, d);
        self.model = Some(LinearModel {
            weights: w.to_vec(),
            bias: b,
        });
        Ok(())
    }

    fn predict(&self, window: ArrayView3<f32>) -> Result<f32, PredictorError> {
        let model = self
            .model
            .as_ref()
            .ok_or(PredictorError::NotTrained(self.name()))?;
        let inputs = flatten_window(window, model.weights.len())?;
        Ok(inputs
            .iter()
            .zip(&model.weights)
            .map(|(x, w)| x * w)
            .sum::<f32>()
            + model.bias)
    }

    fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    fn to_artifact(&self) -> Result<Option<Vec<u8>>, PredictorError> {
        match &self.model {
            Some(model) => Ok(Some(serde_json::to_vec(model)?)),
            None => Ok(None),
        }
    }

    fn load_artifact(&mut self, bytes: &[u8]) -> Result<(), PredictorError> {
        let model: LinearModel = serde_json::from_slice(bytes)?;
        if model.weights.is_empty() || !model.bias.is_finite() {
            return Err(PredictorError::MalformedArtifact(
                "linear model needs weights and a finite bias".to_string(),
            ));
        }
        if model.weights.iter().any(|w| !w.is_finite()) {
            return Err(PredictorError::MalformedArtifact(
                "linear weights must be finite".to_string(),
            ));
        }
        self.model = Some(model);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::fixtures::{mse, step_set};
    use ndarray::{Axis, s};

    #[test]
    fn test_untrained_predict_fails() {
        let p = LinearPredictor::default();
        let set = step_set(1, 3);
        assert!(matches!(
            p.predict(set.x.view()),
            Err(PredictorError::NotTrained("linear"))
        ));
    }

    #[test]
    fn test_fit_beats_mean_baseline() {
        let set = step_set(200, 4);
        let mut p = LinearPredictor::default();
        p.train(&set).unwrap();

        let preds: Vec<f32> = set
            .x
            .axis_iter(Axis(0))
            .map(|w| p.predict(w.insert_axis(Axis(0))).unwrap())
            .collect();
        let truth = set.y.to_vec();
        let mean = set.y.mean().unwrap();
        let baseline = mse(&vec![mean; truth.len()], &truth);
        assert!(mse(&preds, &truth) < baseline);
    }

    #[test]
    fn test_rejects_wrong_window_width() {
        let mut p = LinearPredictor::default();
        p.train(&step_set(20, 4)).unwrap();
        let other = step_set(1, 5);
        assert!(matches!(
            p.predict(other.x.view()),
            Err(PredictorError::Shape {
                expected: 8,
                actual: 10
            })
        ));
    }

    #[test]
    fn test_artifact_restores_predictions() {
        let set = step_set(50, 3);
        let mut p = LinearPredictor::new(200, 1e-3);
        p.train(&set).unwrap();
        let bytes = p.to_artifact().unwrap().unwrap();

        let mut restored = LinearPredictor::default();
        assert!(restored.to_artifact().unwrap().is_none());
        restored.load_artifact(&bytes).unwrap();

        let window = set.x.slice(s![7..8, .., ..]);
        assert_eq!(p.predict(window).unwrap(), restored.predict(window).unwrap());
    }

    #[test]
    fn test_empty_weights_are_rejected() {
        let mut p = LinearPredictor::default();
        assert!(matches!(
            p.load_artifact(br#"{"weights":[],"bias":0.5}"#),
            Err(PredictorError::MalformedArtifact(_))
        ));
        assert!(!p.is_trained());
    }
}
