use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use chrono::Utc;
use common::actors::{Actor, ActorType, ControlMessage, HeartbeatGuard};
use common::models::Balances;
use sqlx::SqlitePool;
use storage::repositories::{KlinesRepository, SignalRepository, TradeRepository};
use strategy::services::{Analysis, AnalysisService};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::trader::{ExecutionReport, Trader};

/// Bounded retry of a failed cycle before the loop moves on.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub analysis: Analysis,
    pub execution: ExecutionReport,
    /// `None` when the live balance query failed after execution.
    pub balances: Option<Balances>,
}

/// One trading session: analyse, execute, persist, sleep, repeat until the
/// stop signal flips. The session owns its Trader exclusively.
pub struct TradingSession {
    id: Uuid,
    analysis: AnalysisService,
    trader: Trader,
    pool: Option<SqlitePool>,
    notify_tx: Option<broadcast::Sender<String>>,
    stop_rx: watch::Receiver<bool>,
    cycle_interval: Duration,
    retry: RetryPolicy,
}

#[async_trait]
impl Actor for TradingSession {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> ActorType {
        ActorType::TradingSessionActor
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let _heartbeat = HeartbeatGuard::new(self.spawn_heartbeat(supervisor_tx.clone()));
        info!(
            "Starting {} trading session for {} (cycle {:?})",
            self.trader.mode(),
            self.trader.pair(),
            self.cycle_interval
        );

        while !self.is_stopped() {
            match self.run_with_retry().await {
                Some(report) => self.log_report(&report),
                None => {
                    if supervisor_tx
                        .send(ControlMessage::Error(
                            self.id,
                            format!("{:?}: cycle failed after retries", self.name()),
                        ))
                        .await
                        .is_err()
                    {
                        bail!("Supervisor channel closed");
                    }
                }
            }
            self.pause(self.cycle_interval).await;
        }

        info!("Trading session for {} stopped", self.trader.pair());
        let _ = supervisor_tx.send(ControlMessage::Shutdown(self.id)).await;
        Ok(())
    }
}

impl TradingSession {
    pub fn new(analysis: AnalysisService, trader: Trader, stop_rx: watch::Receiver<bool>) -> Self {
        Self {
            id: Uuid::new_v4(),
            analysis,
            trader,
            pool: None,
            notify_tx: None,
            stop_rx,
            cycle_interval: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_pool(mut self, pool: SqlitePool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_notifier(mut self, tx: broadcast::Sender<String>) -> Self {
        self.notify_tx = Some(tx);
        self
    }

    pub fn with_cycle_interval(mut self, interval: Duration) -> Self {
        self.cycle_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn trader(&self) -> &Trader {
        &self.trader
    }

    fn is_stopped(&self) -> bool {
        *self.stop_rx.borrow()
    }

    /// Sleeps for `duration`, returning early if the stop signal flips.
    async fn pause(&mut self, duration: Duration) {
        if self.is_stopped() {
            return;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            Ok(()) = self.stop_rx.changed() => {}
        }
    }

    /// Only the analysis half can fail, so a retry never repeats an order.
    async fn run_with_retry(&mut self) -> Option<CycleReport> {
        for attempt in 1..=self.retry.attempts {
            match self.run_cycle().await {
                Ok(report) => return Some(report),
                Err(e) => {
                    warn!(
                        "Cycle attempt {}/{} failed: {:#}",
                        attempt, self.retry.attempts, e
                    );
                    if attempt < self.retry.attempts {
                        self.pause(self.retry.delay).await;
                        if self.is_stopped() {
                            return None;
                        }
                    }
                }
            }
        }
        error!("Cycle abandoned after {} attempts", self.retry.attempts);
        None
    }

    /// fetch → indicators → sentiment → predict → signal → execute → balances.
    pub async fn run_cycle(&mut self) -> anyhow::Result<CycleReport> {
        let analysis = self.analysis.analyze(self.trader.history()).await?;

        let execution = self
            .trader
            .execute(analysis.decision.signal, analysis.current_price, Utc::now())
            .await;

        let balances = match self.trader.balances().await {
            Ok(b) => Some(b),
            Err(e) => {
                warn!("Balance query failed: {}", e);
                None
            }
        };

        self.persist(&analysis, &execution).await;
        self.notify(&execution);

        Ok(CycleReport {
            analysis,
            execution,
            balances,
        })
    }

    // Storage problems are logged; they never undo or repeat a trade.
    async fn persist(&self, analysis: &Analysis, execution: &ExecutionReport) {
        let Some(pool) = &self.pool else {
            return;
        };
        let symbol = self.trader.pair().to_string();

        if let Err(e) = KlinesRepository::insert_batch(pool, &symbol, &analysis.bars).await {
            warn!("Failed to store bars: {}", e);
        }
        if let Err(e) =
            SignalRepository::insert(pool, &symbol, analysis.timestamp(), &analysis.decision).await
        {
            warn!("Failed to store signal: {}", e);
        }
        if let Some(record) = &execution.record {
            if let Err(e) = TradeRepository::insert(pool, record).await {
                error!("Failed to store trade record: {}", e);
            }
        }
    }

    fn notify(&self, execution: &ExecutionReport) {
        if execution.neutral {
            return;
        }
        if let Some(tx) = &self.notify_tx {
            let _ = tx.send(format!("[{}] {}", self.trader.pair(), execution.message));
        }
    }

    fn log_report(&self, report: &CycleReport) {
        let d = &report.analysis.decision;
        let value = report
            .balances
            .map(|b| format!("{:.2}", b.portfolio_value(report.analysis.current_price)))
            .unwrap_or_else(|| "n/a".to_string());
        info!(
            "{} {} score={:+.3} threshold={:.2} price={:.4} -> {} | portfolio={}",
            self.trader.pair(),
            d.signal,
            d.score,
            d.threshold,
            report.analysis.current_price,
            report.execution.message,
            value
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use common::config::AppConfig;
    use common::models::{Bar, TradingPair};
    use market_data::{ConnectorError, MarketDataSource, StaticNewsSource};
    use mockall::mock;
    use storage::{Database, MemoryBlobStore};
    use strategy::ArtifactStore;

    mock! {
        pub Market {}

        #[async_trait]
        impl MarketDataSource for Market {
            async fn fetch_bars(
                &self,
                pair: &TradingPair,
                interval: &str,
                limit: usize,
            ) -> Result<Vec<Bar>, ConnectorError>;
        }
    }

    // Steady decline: oversold RSI and a bearish MACD cancel out.
    fn falling(n: usize) -> Vec<Bar> {
        (0..n)
            .map(|i| {
                let c = 200.0 - i as f64 * 0.5;
                Bar::new(i as i64 * 60_000, c + 0.2, c + 0.4, c - 0.4, c, 500.0)
            })
            .collect()
    }

    fn session(market: MockMarket, stop_rx: watch::Receiver<bool>) -> TradingSession {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        let analysis = AnalysisService::new(
            &config,
            Arc::new(market),
            Arc::new(StaticNewsSource::empty()),
            ArtifactStore::new(Arc::new(MemoryBlobStore::new())),
        );
        let trader = Trader::paper(config.session.pair.clone(), config.trader);
        TradingSession::new(analysis, trader, stop_rx).with_retry(RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn test_cycle_persists_signal_and_bars() {
        let mut market = MockMarket::new();
        market
            .expect_fetch_bars()
            .returning(|_, _, _| Ok(falling(100)));
        let db = Database::open_in_memory().await.unwrap();
        let (_stop_tx, stop_rx) = watch::channel(false);
        let mut s = session(market, stop_rx).with_pool(db.pool().clone());

        let report = s.run_cycle().await.unwrap();
        assert!(!report.execution.executed);
        assert!(report.execution.neutral);
        assert_eq!(report.balances.unwrap().quote_free, 10_000.0);
        assert_eq!(SignalRepository::count(db.pool(), "BTC/USDT").await.unwrap(), 1);
        let stored = KlinesRepository::fetch_recent(db.pool(), "BTC/USDT", 500)
            .await
            .unwrap();
        assert_eq!(stored.len(), 100);
    }

    #[tokio::test]
    async fn test_failed_cycle_is_retried_then_skipped() {
        let mut market = MockMarket::new();
        market
            .expect_fetch_bars()
            .times(3)
            .returning(|_, _, _| Err(ConnectorError::Decode("down".to_string())));
        let (_stop_tx, stop_rx) = watch::channel(false);
        let mut s = session(market, stop_rx);

        assert!(s.run_with_retry().await.is_none());
        assert!(s.trader().history().is_empty());
    }

    #[tokio::test]
    async fn test_stop_signal_ends_loop_at_boundary() {
        let mut market = MockMarket::new();
        market
            .expect_fetch_bars()
            .returning(|_, _, _| Ok(falling(100)));
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut s = session(market, stop_rx).with_cycle_interval(Duration::from_secs(3600));
        let (sup_tx, mut sup_rx) = mpsc::channel(16);

        let handle = tokio::spawn(async move { s.run(sup_tx).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());

        let mut saw_shutdown = false;
        while let Ok(msg) = sup_rx.try_recv() {
            saw_shutdown |= matches!(msg, ControlMessage::Shutdown(_));
        }
        assert!(saw_shutdown);
    }
}
