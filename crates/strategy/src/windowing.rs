//! Turns raw feature history into fixed-length scaled sequences for the
//! predictor.
//!
//! Training fits the scaler on the whole corpus and persists it; inference
//! reuses the persisted scaler unchanged, so both sides see the same
//! transform.

use common::models::Bar;
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis, s};
use thiserror::Error;
use tracing::warn;

use crate::artifacts::{ArtifactError, ArtifactStore};
use crate::scaling::{FEATURE_COLUMNS, ScalerError, ScalerState, TARGET_INDEX};

#[derive(Error, Debug)]
pub enum WindowError {
    #[error("Insufficient data: need {required} rows, have {available}")]
    InsufficientData { required: usize, available: usize },
    #[error(transparent)]
    Scaler(#[from] ScalerError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareMode {
    Train,
    Infer,
}

/// Supervised samples: `x[i]` holds rows `i .. i + lookback`, `y[i]` the
/// scaled target of row `i + lookback`.
#[derive(Debug, Clone)]
pub struct TrainingSet {
    pub x: Array3<f32>,
    pub y: Array1<f32>,
    pub scaler: ScalerState,
}

impl TrainingSet {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    /// Splits off the last `count` windows; both halves share the scaler.
    pub fn split_tail(&self, count: usize) -> (TrainingSet, TrainingSet) {
        let cut = self.len().saturating_sub(count);
        let part = |from: usize, to: usize| TrainingSet {
            x: self.x.slice(s![from..to, .., ..]).to_owned(),
            y: self.y.slice(s![from..to]).to_owned(),
            scaler: self.scaler.clone(),
        };
        (part(0, cut), part(cut, self.len()))
    }
}

/// A single `[1, lookback, features]` window of the most recent rows.
#[derive(Debug, Clone)]
pub struct InferenceWindow {
    pub window: Array3<f32>,
    pub scaler: ScalerState,
    /// Set when no persisted scaler existed and the window was scaled by a
    /// transform fit on itself.
    pub degraded: bool,
}

#[derive(Debug, Clone)]
pub enum Prepared {
    Training(TrainingSet),
    Inference(InferenceWindow),
}

/// Feature matrix in `FEATURE_COLUMNS` order, one row per bar.
pub fn feature_matrix<'a, I>(bars: I) -> Array2<f64>
where
    I: IntoIterator<Item = &'a Bar>,
{
    let flat: Vec<f64> = bars.into_iter().flat_map(|b| b.features()).collect();
    let rows = flat.len() / FEATURE_COLUMNS.len();
    Array2::from_shape_vec((rows, FEATURE_COLUMNS.len()), flat)
        .unwrap_or_else(|_| Array2::zeros((0, FEATURE_COLUMNS.len())))
}

pub fn build_training_windows(
    features: ArrayView2<f64>,
    lookback: usize,
) -> Result<TrainingSet, WindowError> {
    let rows = features.nrows();
    if lookback == 0 || rows < lookback + 1 {
        return Err(WindowError::InsufficientData {
            required: lookback + 1,
            available: rows,
        });
    }

    let scaler = ScalerState::fit(features, &FEATURE_COLUMNS, TARGET_INDEX)?;
    let scaled = scaler.transform(features)?;
    let samples = rows - lookback;
    let width = features.ncols();

    let mut x = Array3::<f32>::zeros((samples, lookback, width));
    let mut y = Array1::<f32>::zeros(samples);
    for i in 0..samples {
        x.slice_mut(s![i, .., ..])
            .assign(&scaled.slice(s![i..i + lookback, ..]).mapv(|v| v as f32));
        y[i] = scaled[[i + lookback, scaler.target_index]] as f32;
    }

    Ok(TrainingSet { x, y, scaler })
}

pub fn build_inference_window(
    features: ArrayView2<f64>,
    lookback: usize,
    persisted: Option<&ScalerState>,
) -> Result<InferenceWindow, WindowError> {
    let rows = features.nrows();
    if lookback == 0 || rows < lookback {
        return Err(WindowError::InsufficientData {
            required: lookback.max(1),
            available: rows,
        });
    }

    let recent = features.slice(s![rows - lookback.., ..]);
    let (scaler, degraded) = match persisted {
        Some(state) => (state.clone(), false),
        None => {
            warn!(
                "No persisted scaler; fitting on the current {}-row window. Predictions are degraded until the model is trained.",
                lookback
            );
            (
                ScalerState::fit(recent, &FEATURE_COLUMNS, TARGET_INDEX)?,
                true,
            )
        }
    };

    let window = scaler
        .transform(recent)?
        .mapv(|v| v as f32)
        .insert_axis(Axis(0));

    Ok(InferenceWindow {
        window,
        scaler,
        degraded,
    })
}

/// Windowing front-end bound to one persisted scaler key.
#[derive(Clone)]
pub struct WindowPipeline {
    artifacts: ArtifactStore,
    scaler_key: String,
    lookback: usize,
}

impl WindowPipeline {
    pub fn new(artifacts: ArtifactStore, scaler_key: String, lookback: usize) -> Self {
        Self {
            artifacts,
            scaler_key,
            lookback,
        }
    }

    /// TRAIN fits and persists the scaler; INFER loads it and never refits it.
    pub async fn prepare(
        &self,
        features: ArrayView2<'_, f64>,
        mode: PrepareMode,
    ) -> Result<Prepared, WindowError> {
        match mode {
            PrepareMode::Train => {
                let set = build_training_windows(features, self.lookback)?;
                self.artifacts
                    .save_scaler(&set.scaler, &self.scaler_key)
                    .await?;
                Ok(Prepared::Training(set))
            }
            PrepareMode::Infer => {
                let persisted = self.artifacts.load_scaler(&self.scaler_key).await?;
                let window = build_inference_window(features, self.lookback, persisted.as_ref())?;
                Ok(Prepared::Inference(window))
            }
        }
    }

    /// Fits a training set without persisting its scaler; see [`Self::commit`].
    pub fn training_set(&self, features: ArrayView2<'_, f64>) -> Result<TrainingSet, WindowError> {
        build_training_windows(features, self.lookback)
    }

    /// Persists a scaler together with the model trained against it.
    pub async fn commit(
        &self,
        scaler: &ScalerState,
        model_key: &str,
        model: Option<Vec<u8>>,
    ) -> Result<(), WindowError> {
        self.artifacts
            .save_bundle(&self.scaler_key, scaler, model_key, model)
            .await?;
        Ok(())
    }

    /// INFER variant that also returns the model artifact, read from the same
    /// snapshot as the scaler.
    pub async fn infer_with_model(
        &self,
        features: ArrayView2<'_, f64>,
        model_key: &str,
    ) -> Result<(InferenceWindow, Option<Vec<u8>>), WindowError> {
        let (persisted, model) = self
            .artifacts
            .load_bundle(&self.scaler_key, model_key)
            .await?;
        let window = build_inference_window(features, self.lookback, persisted.as_ref())?;
        Ok((window, model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use storage::{BlobStore, MemoryBlobStore};

    fn series(n: usize) -> Array2<f64> {
        let bars: Vec<Bar> = (0..n)
            .map(|i| {
                let c = 100.0 + (i as f64 * 0.3).sin() * 10.0 + i as f64 * 0.1;
                Bar::new(i as i64, c, c, c, c, 1000.0 + (i % 7) as f64 * 50.0)
            })
            .collect();
        feature_matrix(&bars)
    }

    #[test]
    fn test_training_window_count_and_no_lookahead() {
        let features = series(80);
        let set = build_training_windows(features.view(), 10).unwrap();
        assert_eq!(set.len(), 80 - 10);
        assert_eq!(set.x.shape(), &[70, 10, 2]);

        let scaled = set.scaler.transform(features.view()).unwrap();
        for i in 0..set.len() {
            // Window i ends at row i + lookback - 1; target is the next row.
            assert_eq!(set.x[[i, 9, 0]], scaled[[i + 9, 0]] as f32);
            assert_eq!(set.x[[i, 0, 1]], scaled[[i, 1]] as f32);
            assert_eq!(set.y[i], scaled[[i + 10, 0]] as f32);
        }
    }

    #[test]
    fn test_split_tail_keeps_order() {
        let set = build_training_windows(series(40).view(), 5).unwrap();
        let (head, tail) = set.split_tail(7);
        assert_eq!((head.len(), tail.len()), (28, 7));
        assert_eq!(tail.y[0], set.y[28]);
        assert_eq!(tail.x.slice(s![6, .., ..]), set.x.slice(s![34, .., ..]));
        assert_eq!(tail.scaler, set.scaler);

        let (all, none) = set.split_tail(0);
        assert_eq!(all.len(), set.len());
        assert!(none.is_empty());
    }

    #[test]
    fn test_training_requires_lookback_plus_one() {
        let features = series(10);
        assert!(matches!(
            build_training_windows(features.view(), 10),
            Err(WindowError::InsufficientData {
                required: 11,
                available: 10
            })
        ));
        assert_eq!(build_training_windows(series(11).view(), 10).unwrap().len(), 1);
    }

    #[test]
    fn test_inference_uses_only_recent_rows() {
        let features = series(50);
        let persisted = build_training_windows(features.view(), 10).unwrap().scaler;
        let win = build_inference_window(features.view(), 10, Some(&persisted)).unwrap();

        assert_eq!(win.window.shape(), &[1, 10, 2]);
        assert!(!win.degraded);
        let expected = persisted.transform(features.slice(s![40.., ..])).unwrap();
        assert_eq!(win.window.index_axis(Axis(0), 0), expected.mapv(|v| v as f32));
    }

    #[test]
    fn test_inference_insufficient_data() {
        let features = series(5);
        assert!(matches!(
            build_inference_window(features.view(), 10, None),
            Err(WindowError::InsufficientData {
                required: 10,
                available: 5
            })
        ));
    }

    #[test]
    fn test_missing_scaler_falls_back_degraded() {
        let features = series(30);
        let win = build_inference_window(features.view(), 10, None).unwrap();
        assert!(win.degraded);
        // Self-fit window spans exactly [0, 1] on every column.
        let closes = win.window.slice(s![0, .., 0]);
        assert_eq!(closes.fold(f32::INFINITY, |a, &b| a.min(b)), 0.0);
        assert_eq!(closes.fold(f32::NEG_INFINITY, |a, &b| a.max(b)), 1.0);
    }

    #[tokio::test]
    async fn test_pipeline_train_then_infer_is_stable() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let pipeline = WindowPipeline::new(
            ArtifactStore::new(blobs.clone()),
            "scaler:TEST".to_string(),
            10,
        );
        let corpus = series(200);

        let trained = match pipeline.prepare(corpus.view(), PrepareMode::Train).await.unwrap() {
            Prepared::Training(set) => set,
            Prepared::Inference(_) => panic!("expected training set"),
        };
        let stored = blobs.load("scaler:TEST").await.unwrap().unwrap();

        // Live data drifts outside the training range; the scaler must not move.
        let live = series(40).mapv(|v| v * 1.5);
        let mut windows = Vec::new();
        for _ in 0..3 {
            match pipeline.prepare(live.view(), PrepareMode::Infer).await.unwrap() {
                Prepared::Inference(w) => {
                    assert!(!w.degraded);
                    assert_eq!(w.scaler, trained.scaler);
                    windows.push(w.window);
                }
                Prepared::Training(_) => panic!("expected inference window"),
            }
        }
        assert_eq!(windows[0], windows[1]);
        assert_eq!(windows[1], windows[2]);
        assert_eq!(blobs.load("scaler:TEST").await.unwrap().unwrap(), stored);
    }

    #[tokio::test]
    async fn test_commit_pairs_scaler_with_model() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let pipeline = WindowPipeline::new(
            ArtifactStore::new(blobs.clone()),
            "scaler:TEST".to_string(),
            10,
        );
        let corpus = series(60);

        let set = pipeline.training_set(corpus.view()).unwrap();
        assert!(blobs.load("scaler:TEST").await.unwrap().is_none());

        pipeline
            .commit(&set.scaler, "model:linear:TEST", Some(b"weights".to_vec()))
            .await
            .unwrap();
        let (window, model) = pipeline
            .infer_with_model(corpus.view(), "model:linear:TEST")
            .await
            .unwrap();
        assert!(!window.degraded);
        assert_eq!(window.scaler, set.scaler);
        assert_eq!(model.as_deref(), Some(&b"weights"[..]));
    }
}
