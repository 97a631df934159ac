use chrono::DateTime;
use common::models::{TradeOutcome, TradeRecord, TradeSide};
use sqlx::{Row, SqlitePool};

use crate::error::StorageError;

pub struct TradeRepository;

impl TradeRepository {
    pub async fn insert(pool: &SqlitePool, record: &TradeRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"
                INSERT INTO trades (
                    symbol, timestamp, side, price, quantity, outcome, pnl, message
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.symbol)
        .bind(record.timestamp.timestamp_millis())
        .bind(record.side.as_str())
        .bind(record.price)
        .bind(record.quantity)
        .bind(record.outcome.as_str())
        .bind(record.pnl)
        .bind(&record.message)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Full trade log for a symbol, oldest first.
    pub async fn fetch_history(
        pool: &SqlitePool,
        symbol: &str,
    ) -> Result<Vec<TradeRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
                SELECT symbol, timestamp, side, price, quantity, outcome, pnl, message
                FROM trades WHERE symbol = ? ORDER BY id ASC
            "#,
        )
        .bind(symbol)
        .fetch_all(pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<TradeRecord, StorageError> {
                let millis: i64 = row.try_get("timestamp")?;
                let side: String = row.try_get("side")?;
                let outcome: String = row.try_get("outcome")?;

                Ok(TradeRecord {
                    timestamp: DateTime::from_timestamp_millis(millis).ok_or_else(|| {
                        StorageError::Corrupt(format!("timestamp out of range: {}", millis))
                    })?,
                    symbol: row.try_get("symbol")?,
                    side: parse_side(&side)?,
                    price: row.try_get("price")?,
                    quantity: row.try_get("quantity")?,
                    outcome: parse_outcome(&outcome)?,
                    pnl: row.try_get("pnl")?,
                    message: row.try_get("message")?,
                })
            })
            .collect()
    }
}

fn parse_side(raw: &str) -> Result<TradeSide, StorageError> {
    match raw {
        "BUY" => Ok(TradeSide::Buy),
        "SELL" => Ok(TradeSide::Sell),
        other => Err(StorageError::Corrupt(format!("unknown trade side: {}", other))),
    }
}

fn parse_outcome(raw: &str) -> Result<TradeOutcome, StorageError> {
    match raw {
        "entry" => Ok(TradeOutcome::Entry),
        "profit" => Ok(TradeOutcome::Profit),
        "loss" => Ok(TradeOutcome::Loss),
        other => Err(StorageError::Corrupt(format!("unknown trade outcome: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::{TimeZone, Utc};

    #[tokio::test]
    async fn test_history_preserves_markers_and_order() {
        let db = Database::open_in_memory().await.unwrap();
        let ts = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

        let entry = TradeRecord::entry(ts, "BTC/USDT", 100.0, 99.0, "buy".to_string());
        let exit = TradeRecord::exit(ts, "BTC/USDT", 110.0, 99.0, 990.0, "sell".to_string());
        TradeRepository::insert(db.pool(), &entry).await.unwrap();
        TradeRepository::insert(db.pool(), &exit).await.unwrap();

        let history = TradeRepository::fetch_history(db.pool(), "BTC/USDT").await.unwrap();
        assert_eq!(history, vec![entry, exit]);
        assert_eq!(history[1].outcome, TradeOutcome::Profit);
    }
}
