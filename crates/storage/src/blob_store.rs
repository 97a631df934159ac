use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;

/// Key → blob persistence for model artifacts (scaler state, predictor weights).
///
/// Writes replace the whole value for a key. A reader never observes a
/// partially written value: it gets either the previous or the new blob.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn save(&self, key: &str, payload: &[u8]) -> Result<(), StorageError>;

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replaces several keys as one unit.
    async fn save_all(&self, entries: &[(String, Vec<u8>)]) -> Result<(), StorageError> {
        for (key, payload) in entries {
            self.save(key, payload).await?;
        }
        Ok(())
    }

    /// Reads several keys; transactional stores read them from one snapshot.
    async fn load_all(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push(self.load(key).await?);
        }
        Ok(out)
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    inner: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save(&self, key: &str, payload: &[u8]) -> Result<(), StorageError> {
        self.inner
            .write()
            .await
            .insert(key.to_string(), payload.to_vec());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn save_all(&self, entries: &[(String, Vec<u8>)]) -> Result<(), StorageError> {
        let mut guard = self.inner.write().await;
        for (key, payload) in entries {
            guard.insert(key.clone(), payload.clone());
        }
        Ok(())
    }

    async fn load_all(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        let guard = self.inner.read().await;
        Ok(keys.iter().map(|k| guard.get(k).cloned()).collect())
    }
}
