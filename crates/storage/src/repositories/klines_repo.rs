use common::models::Bar;
use sqlx::{Row, SqlitePool};

pub struct KlinesRepository;

impl KlinesRepository {
    /// Inserts bars, silently skipping ones already stored for the same timestamp.
    pub async fn insert_batch(
        pool: &SqlitePool,
        symbol: &str,
        bars: &[Bar],
    ) -> Result<u64, sqlx::Error> {
        if bars.is_empty() {
            return Ok(0);
        }

        let mut tx = pool.begin().await?;
        let mut inserted = 0;

        for bar in bars {
            let result = sqlx::query(
                r#"
                    INSERT OR IGNORE INTO ohlcv_data (
                        symbol, timestamp, open, high, low, close, volume
                    ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(symbol)
            .bind(bar.timestamp)
            .bind(bar.open)
            .bind(bar.high)
            .bind(bar.low)
            .bind(bar.close)
            .bind(bar.volume)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }

    /// Most recent `limit` bars in ascending timestamp order.
    pub async fn fetch_recent(
        pool: &SqlitePool,
        symbol: &str,
        limit: i64,
    ) -> Result<Vec<Bar>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
                SELECT timestamp, open, high, low, close, volume FROM (
                    SELECT timestamp, open, high, low, close, volume
                    FROM ohlcv_data WHERE symbol = ?
                    ORDER BY timestamp DESC LIMIT ?
                ) ORDER BY timestamp ASC
            "#,
        )
        .bind(symbol)
        .bind(limit)
        .fetch_all(pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Bar, sqlx::Error> {
                Ok(Bar::new(
                    row.try_get("timestamp")?,
                    row.try_get("open")?,
                    row.try_get("high")?,
                    row.try_get("low")?,
                    row.try_get("close")?,
                    row.try_get("volume")?,
                ))
            })
            .collect()
    }
}
