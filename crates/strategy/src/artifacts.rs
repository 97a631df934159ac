use std::sync::Arc;

use common::config::PredictorKind;
use common::models::TradingPair;
use storage::{BlobStore, StorageError};
use thiserror::Error;
use tracing::debug;

use crate::scaling::{ScalerError, ScalerState};

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Artifact '{key}' could not be decoded: {source}")]
    Decode {
        key: String,
        source: serde_json::Error,
    },
    #[error("Artifact '{key}' is malformed: {source}")]
    Invalid { key: String, source: ScalerError },
    #[error("Artifact could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
}

pub fn scaler_key(pair: &TradingPair) -> String {
    format!("scaler:{}", pair.ticker())
}

pub fn model_key(kind: PredictorKind, pair: &TradingPair) -> String {
    let kind = match kind {
        PredictorKind::Linear => "linear",
        PredictorKind::Forest => "forest",
        PredictorKind::Onnx => "onnx",
    };
    format!("model:{}:{}", kind, pair.ticker())
}

/// Typed access to persisted model artifacts on top of an injected `BlobStore`.
#[derive(Clone)]
pub struct ArtifactStore {
    store: Arc<dyn BlobStore>,
}

impl ArtifactStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    pub async fn save_scaler(&self, state: &ScalerState, key: &str) -> Result<(), ArtifactError> {
        let bytes = serde_json::to_vec(state)?;
        self.store.save(key, &bytes).await?;
        debug!("Persisted scaler '{}'", key);
        Ok(())
    }

    pub async fn load_scaler(&self, key: &str) -> Result<Option<ScalerState>, ArtifactError> {
        match self.store.load(key).await? {
            Some(bytes) => Ok(Some(decode_scaler(key, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Replaces scaler and model together so inference never pairs a new
    /// scaler with an old model.
    pub async fn save_bundle(
        &self,
        scaler_key: &str,
        scaler: &ScalerState,
        model_key: &str,
        model: Option<Vec<u8>>,
    ) -> Result<(), ArtifactError> {
        let mut entries = vec![(scaler_key.to_string(), serde_json::to_vec(scaler)?)];
        if let Some(model) = model {
            entries.push((model_key.to_string(), model));
        }
        self.store.save_all(&entries).await?;
        debug!("Persisted artifact bundle '{}' + '{}'", scaler_key, model_key);
        Ok(())
    }

    pub async fn load_bundle(
        &self,
        scaler_key: &str,
        model_key: &str,
    ) -> Result<(Option<ScalerState>, Option<Vec<u8>>), ArtifactError> {
        let mut blobs = self
            .store
            .load_all(&[scaler_key.to_string(), model_key.to_string()])
            .await?
            .into_iter();
        let scaler = match blobs.next().flatten() {
            Some(bytes) => Some(decode_scaler(scaler_key, &bytes)?),
            None => None,
        };
        Ok((scaler, blobs.next().flatten()))
    }
}

fn decode_scaler(key: &str, bytes: &[u8]) -> Result<ScalerState, ArtifactError> {
    let state: ScalerState =
        serde_json::from_slice(bytes).map_err(|source| ArtifactError::Decode {
            key: key.to_string(),
            source,
        })?;
    state.validate().map_err(|source| ArtifactError::Invalid {
        key: key.to_string(),
        source,
    })?;
    Ok(state)
}
