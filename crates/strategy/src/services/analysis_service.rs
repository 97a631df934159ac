use std::sync::Arc;

use anyhow::{Context, bail};
use common::config::AppConfig;
use common::models::bar::is_ordered;
use common::models::{Bar, IndicatorRow, SignalDecision, TradeRecord, TradingPair};
use market_data::{MarketDataSource, NewsSource};
use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactStore, model_key, scaler_key};
use crate::indicators::compute_indicators;
use crate::predictor::{Predictor, build_predictor};
use crate::sentiment::{LexiconSentiment, SentimentProvider};
use crate::signal::SignalGenerator;
use crate::windowing::{WindowError, WindowPipeline, feature_matrix};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredictionSource {
    Model,
    /// Model output scaled by a transform fit on the live window.
    DegradedScaler,
    /// No usable prediction; the last close stands in.
    LastClose,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub price: f64,
    pub source: PredictionSource,
}

impl Prediction {
    fn last_close(price: f64) -> Self {
        Self {
            price,
            source: PredictionSource::LastClose,
        }
    }
}

/// Everything one decision cycle derived from market data, before execution.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub bars: Vec<Bar>,
    pub latest: IndicatorRow,
    pub current_price: f64,
    pub sentiment: f64,
    pub prediction: Prediction,
    pub decision: SignalDecision,
}

impl Analysis {
    pub fn timestamp(&self) -> i64 {
        self.latest.bar.timestamp
    }
}

/// Data → decision half of the trading cycle: bars, indicators, news
/// sentiment, windowed prediction and the fused signal.
pub struct AnalysisService {
    pair: TradingPair,
    bar_interval: String,
    bar_limit: usize,
    market: Arc<dyn MarketDataSource>,
    news: Arc<dyn NewsSource>,
    sentiment: Box<dyn SentimentProvider>,
    pipeline: WindowPipeline,
    model_key: String,
    predictor: Box<dyn Predictor>,
    generator: SignalGenerator,
}

impl AnalysisService {
    pub fn new(
        config: &AppConfig,
        market: Arc<dyn MarketDataSource>,
        news: Arc<dyn NewsSource>,
        artifacts: ArtifactStore,
    ) -> Self {
        let pair = config.session.pair.clone();
        Self {
            bar_interval: config.session.bar_interval.clone(),
            bar_limit: config.session.bar_limit,
            market,
            news,
            sentiment: Box::new(LexiconSentiment::default()),
            pipeline: WindowPipeline::new(artifacts, scaler_key(&pair), config.model.lookback),
            model_key: model_key(config.model.predictor, &pair),
            predictor: build_predictor(config.model.predictor, &config.model.model_path),
            generator: SignalGenerator::new(config.weights, config.thresholds),
            pair,
        }
    }

    pub fn with_predictor(mut self, predictor: Box<dyn Predictor>) -> Self {
        self.predictor = predictor;
        self
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    pub async fn analyze(&mut self, history: &[TradeRecord]) -> anyhow::Result<Analysis> {
        let bars = self
            .market
            .fetch_bars(&self.pair, &self.bar_interval, self.bar_limit)
            .await
            .with_context(|| format!("Failed to fetch bars for {}", self.pair))?;
        if !is_ordered(&bars) {
            bail!("Bars for {} are not in strictly increasing time order", self.pair);
        }

        let rows = compute_indicators(&bars).context("Indicator computation failed")?;
        let Some(latest) = rows.last().copied() else {
            bail!(
                "No resolved indicator rows from {} bars of {}",
                bars.len(),
                self.pair
            );
        };
        let current_price = latest.bar.close;

        let headlines = match self.news.fetch_headlines().await {
            Ok(headlines) => headlines,
            Err(e) => {
                warn!("News source failed, sentiment is neutral this cycle: {}", e);
                Vec::new()
            }
        };
        let sentiment = self.sentiment.aggregate(&headlines);

        let prediction = self.predict(&rows, current_price).await;
        let decision =
            self.generator
                .generate(current_price, prediction.price, sentiment, &latest, history);

        debug!(
            "{} close={:.4} predicted={:.4} ({:?}) sentiment={:.3} score={:.3} threshold={:.2}",
            self.pair,
            current_price,
            prediction.price,
            prediction.source,
            sentiment,
            decision.score,
            decision.threshold
        );

        Ok(Analysis {
            bars,
            latest,
            current_price,
            sentiment,
            prediction,
            decision,
        })
    }

    // Any failure on the way to a prediction degrades to the last close.
    async fn predict(&mut self, rows: &[IndicatorRow], current_price: f64) -> Prediction {
        let features = feature_matrix(rows.iter().map(|r| &r.bar));

        let (window, model) = match self
            .pipeline
            .infer_with_model(features.view(), &self.model_key)
            .await
        {
            Ok(found) => found,
            Err(WindowError::InsufficientData {
                required,
                available,
            }) => {
                info!(
                    "Cannot score yet: window needs {} rows, have {}. Holding last price.",
                    required, available
                );
                return Prediction::last_close(current_price);
            }
            Err(e) => {
                warn!("Window preparation failed: {}", e);
                return Prediction::last_close(current_price);
            }
        };

        if let Some(bytes) = model {
            if let Err(e) = self.predictor.load_artifact(&bytes) {
                warn!("Stored {} model is unreadable: {}", self.predictor.name(), e);
                return Prediction::last_close(current_price);
            }
        }
        if !self.predictor.is_trained() {
            debug!("{} predictor is not trained yet", self.predictor.name());
            return Prediction::last_close(current_price);
        }

        match self.predictor.predict(window.window.view()) {
            Ok(scaled) => Prediction {
                price: window.scaler.inverse_target(scaled as f64),
                source: if window.degraded {
                    PredictionSource::DegradedScaler
                } else {
                    PredictionSource::Model
                },
            },
            Err(e) => {
                warn!("{} prediction failed: {}", self.predictor.name(), e);
                Prediction::last_close(current_price)
            }
        }
    }
}
