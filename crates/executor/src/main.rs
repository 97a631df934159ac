use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use common::actors::ActorType;
use common::config::AppConfig;
use common::logger;
use market_data::remote::BinanceClient;
use market_data::{ExchangeConnector, MarketDataSource, NewsSource, StaticNewsSource};
use storage::Database;
use storage::repositories::ArtifactRepository;
use strategy::ArtifactStore;
use strategy::services::{AnalysisService, TrainingService};

use crate::actors::supervisor::Supervisor;
use crate::services::session_service::TradingSession;
use crate::services::telegram_service::{TelegramService, TelegramTarget};
use crate::trader::Trader;

mod actors;
mod services;
mod trader;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    logger::setup_logger();
    debug!("System starting up...");

    let config = Arc::new(AppConfig::from_env().context("Invalid configuration")?);
    info!(
        "{} session for {} every {:?} (predictor {:?}, lookback {})",
        config.session.mode,
        config.session.pair,
        config.session.cycle_interval,
        config.model.predictor,
        config.model.lookback
    );

    let db = Database::open(&config.database_path).await?;
    let artifacts = ArtifactStore::new(Arc::new(ArtifactRepository::new(db.pool().clone())));

    let client = Arc::new(BinanceClient::new(
        &config.session.base_url,
        config.session.credentials.clone(),
    )?);
    let market: Arc<dyn MarketDataSource> = client.clone();
    let connector: Option<Arc<dyn ExchangeConnector>> = match config.session.credentials {
        Some(_) => Some(client),
        None => None,
    };
    let news: Arc<dyn NewsSource> = Arc::new(StaticNewsSource::empty());

    // Fails fast on REAL without credentials; each session spawn clones it fresh.
    let prototype = Arc::new(Trader::new(
        config.session.mode,
        config.session.pair.clone(),
        config.trader,
        connector,
    )?);

    let (stop_tx, stop_rx) = watch::channel(false);
    let (notify_tx, _) = broadcast::channel::<String>(256);
    let telegram = TelegramTarget::from_env();
    let telegram_enabled = telegram.is_some();

    let mut supervisor = Supervisor::new(stop_rx.clone());
    supervisor.drain_on_stop(ActorType::TradingSessionActor);

    {
        let (config, market, news, artifacts) = (
            config.clone(),
            market.clone(),
            news.clone(),
            artifacts.clone(),
        );
        let (prototype, stop_rx, notify_tx) =
            (prototype.clone(), stop_rx.clone(), notify_tx.clone());
        supervisor.register_actor(
            ActorType::TradingSessionActor,
            Box::new(move || {
                let analysis =
                    AnalysisService::new(&config, market.clone(), news.clone(), artifacts.clone());
                let mut session = TradingSession::new(analysis, prototype.fresh(), stop_rx.clone())
                    .with_cycle_interval(config.session.cycle_interval);
                if telegram_enabled {
                    session = session.with_notifier(notify_tx.clone());
                }
                Box::new(session)
            }),
        );
    }

    {
        let (config, market, artifacts) = (config.clone(), market.clone(), artifacts.clone());
        supervisor.register_actor(
            ActorType::TrainerActor,
            Box::new(move || {
                Box::new(TrainingService::new(
                    &config,
                    market.clone(),
                    artifacts.clone(),
                ))
            }),
        );
    }

    match telegram {
        Some(target) => {
            let notify_tx = notify_tx.clone();
            supervisor.register_actor(
                ActorType::NotifierActor,
                Box::new(move || {
                    Box::new(TelegramService::new(target.clone(), notify_tx.subscribe()))
                }),
            );
        }
        None => info!("Telegram notifications disabled"),
    }

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Stop requested; finishing the current cycle");
                let _ = stop_tx.send(true);
            }
            Err(e) => warn!("Unable to listen for shutdown signal: {}", e),
        }
    });

    supervisor.start().await;
    db.close().await;
    Ok(())
}
