pub mod artifact_repo;
pub mod klines_repo;
pub mod signal_repo;
pub mod trade_repo;

pub use artifact_repo::ArtifactRepository;
pub use klines_repo::KlinesRepository;
pub use signal_repo::SignalRepository;
pub use trade_repo::TradeRepository;
