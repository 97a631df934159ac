use common::models::SignalDecision;
use sqlx::SqlitePool;

pub struct SignalRepository;

impl SignalRepository {
    pub async fn insert(
        pool: &SqlitePool,
        symbol: &str,
        timestamp: i64,
        decision: &SignalDecision,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
                INSERT INTO signals (symbol, timestamp, signal, confidence, threshold)
                VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(symbol)
        .bind(timestamp)
        .bind(decision.signal.as_str())
        .bind(decision.score)
        .bind(decision.threshold)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn count(pool: &SqlitePool, symbol: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM signals WHERE symbol = ?")
            .bind(symbol)
            .fetch_one(pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use common::models::Signal;

    #[tokio::test]
    async fn test_insert_signal() {
        let db = Database::open_in_memory().await.unwrap();
        let decision = SignalDecision {
            signal: Signal::Buy,
            score: 0.84,
            threshold: 0.2,
        };
        SignalRepository::insert(db.pool(), "BTC/USDT", 1, &decision)
            .await
            .unwrap();
        assert_eq!(SignalRepository::count(db.pool(), "BTC/USDT").await.unwrap(), 1);
    }
}
