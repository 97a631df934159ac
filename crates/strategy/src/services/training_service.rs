use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use common::actors::{Actor, ActorType, ControlMessage, HeartbeatGuard};
use common::config::AppConfig;
use common::models::TradingPair;
use common::models::bar::is_ordered;
use market_data::MarketDataSource;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifacts::{ArtifactStore, model_key, scaler_key};
use crate::indicators::compute_indicators;
use crate::predictor::{Predictor, PredictorError, build_predictor};
use crate::windowing::{PrepareMode, TrainingSet, WindowPipeline, feature_matrix};

/// Share of the newest windows held back to score each retrain.
const HOLDOUT_FRACTION: f32 = 0.2;

#[derive(Debug, Clone, PartialEq)]
pub struct TrainingReport {
    pub predictor: &'static str,
    pub samples: usize,
    /// Newest windows scored after fitting on the rest.
    pub holdout: usize,
    /// Mean absolute error on the holdout, in scaled units.
    pub holdout_mae: Option<f32>,
    /// False when only the scaler was refreshed (offline-trained predictors).
    pub model_updated: bool,
}

/// Periodic retraining: fetches a long bar history, refits the scaler and
/// the configured predictor, and replaces both artifacts in one write.
pub struct TrainingService {
    id: Uuid,
    pair: TradingPair,
    bar_interval: String,
    limit: usize,
    interval: Duration,
    market: Arc<dyn MarketDataSource>,
    pipeline: WindowPipeline,
    model_key: String,
    predictor: Box<dyn Predictor>,
}

#[async_trait]
impl Actor for TrainingService {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> ActorType {
        ActorType::TrainerActor
    }

    async fn run(&mut self, supervisor_tx: mpsc::Sender<ControlMessage>) -> anyhow::Result<()> {
        let _heartbeat = HeartbeatGuard::new(self.spawn_heartbeat(supervisor_tx.clone()));
        info!(
            "Starting training routine for {} every {:?}",
            self.pair, self.interval
        );

        loop {
            match self.train_once().await {
                Ok(report) => info!(
                    "Training finished: {} on {} samples (model updated: {}), holdout MAE {} over {} windows",
                    report.predictor,
                    report.samples,
                    report.model_updated,
                    report
                        .holdout_mae
                        .map_or_else(|| "n/a".to_string(), |mae| format!("{:.4}", mae)),
                    report.holdout
                ),
                Err(e) => {
                    error!("Training run failed: {:#}", e);
                    supervisor_tx
                        .send(ControlMessage::Error(
                            self.id,
                            format!("{:?}: {:#}", self.name(), e),
                        ))
                        .await?;
                }
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

impl TrainingService {
    pub fn new(
        config: &AppConfig,
        market: Arc<dyn MarketDataSource>,
        artifacts: ArtifactStore,
    ) -> Self {
        let pair = config.session.pair.clone();
        Self {
            id: Uuid::new_v4(),
            bar_interval: config.session.bar_interval.clone(),
            limit: config.model.training_limit,
            interval: config.model.training_interval,
            market,
            pipeline: WindowPipeline::new(artifacts, scaler_key(&pair), config.model.lookback),
            model_key: model_key(config.model.predictor, &pair),
            predictor: build_predictor(config.model.predictor, &config.model.model_path),
            pair,
        }
    }

    pub async fn train_once(&mut self) -> anyhow::Result<TrainingReport> {
        let bars = self
            .market
            .fetch_bars(&self.pair, &self.bar_interval, self.limit)
            .await
            .with_context(|| format!("Failed to fetch training bars for {}", self.pair))?;
        if !is_ordered(&bars) {
            bail!(
                "Training bars for {} are not in strictly increasing time order",
                self.pair
            );
        }
        let rows = compute_indicators(&bars).context("Indicator computation failed")?;
        let features = feature_matrix(rows.iter().map(|r| &r.bar));

        let set = self.pipeline.training_set(features.view())?;
        info!(
            "Training {} predictor on {} windows of {}",
            self.predictor.name(),
            set.len(),
            self.pair
        );

        let (head, holdout) = set.split_tail((set.len() as f32 * HOLDOUT_FRACTION) as usize);
        let (model_updated, holdout_mae) = match self.predictor.train(&head) {
            Ok(()) => {
                let mae = self.score(&holdout);
                if !holdout.is_empty() {
                    // Refit on every window so the newest bars reach the model.
                    self.predictor.train(&set)?;
                }
                let model = self.predictor.to_artifact()?;
                self.pipeline
                    .commit(&set.scaler, &self.model_key, model)
                    .await?;
                (true, mae)
            }
            Err(PredictorError::TrainingUnsupported(name)) => {
                info!("{} is trained offline; refreshing the scaler only", name);
                self.pipeline.prepare(features.view(), PrepareMode::Train).await?;
                (false, self.score(&holdout))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(TrainingReport {
            predictor: self.predictor.name(),
            samples: set.len(),
            holdout: holdout.len(),
            holdout_mae,
            model_updated,
        })
    }

    fn score(&self, holdout: &TrainingSet) -> Option<f32> {
        if holdout.is_empty() {
            return None;
        }
        match self.predictor.evaluate(holdout) {
            Ok(mae) => Some(mae),
            Err(e) => {
                warn!("Unable to score {} on the holdout: {}", self.predictor.name(), e);
                None
            }
        }
    }
}
