use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::blob_store::BlobStore;
use crate::error::StorageError;

/// `BlobStore` backed by the `artifacts` table. Every write is a single-row
/// upsert inside a transaction, so readers see either the old or the new blob.
#[derive(Clone)]
pub struct ArtifactRepository {
    pool: SqlitePool,
}

impl ArtifactRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const UPSERT: &str = r#"
    INSERT INTO artifacts (key, payload, updated_at) VALUES (?, ?, ?)
    ON CONFLICT(key) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at
"#;

#[async_trait]
impl BlobStore for ArtifactRepository {
    async fn save(&self, key: &str, payload: &[u8]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(UPSERT)
            .bind(key)
            .bind(payload)
            .bind(Utc::now().timestamp_millis())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let payload = sqlx::query_scalar::<_, Vec<u8>>("SELECT payload FROM artifacts WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payload)
    }

    async fn save_all(&self, entries: &[(String, Vec<u8>)]) -> Result<(), StorageError> {
        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        for (key, payload) in entries {
            sqlx::query(UPSERT)
                .bind(key)
                .bind(payload)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn load_all(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>, StorageError> {
        // One read transaction: every key comes from the same snapshot.
        let mut tx = self.pool.begin().await?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let payload =
                sqlx::query_scalar::<_, Vec<u8>>("SELECT payload FROM artifacts WHERE key = ?")
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await?;
            out.push(payload);
        }
        tx.commit().await?;
        Ok(out)
    }
}
