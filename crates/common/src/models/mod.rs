pub mod bar;
pub mod indicator_row;
pub mod pair;
pub mod signal;
pub mod trade;

pub use bar::Bar;
pub use indicator_row::IndicatorRow;
pub use pair::{PairParseError, TradingPair};
pub use signal::{Signal, SignalDecision};
pub use trade::{Balances, Position, TradeOutcome, TradeRecord, TradeSide};
