pub mod news;
pub mod remote;
pub mod traits;

pub use news::StaticNewsSource;
pub use traits::{ConnectorError, ExchangeConnector, MarketDataSource, NewsSource, OrderAck};
