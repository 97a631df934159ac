//! Position and balance state machine for one trading pair.
//!
//! `FLAT --BUY--> LONG --SELL--> FLAT`. Everything else (HOLD, BUY while
//! LONG, SELL while FLAT) is a neutral no-op. Rejections and connector
//! failures come back as not-executed reports and never change state.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::config::{TradeMode, TraderConfig};
use common::models::{Balances, Position, Signal, TradeRecord, TradingPair};
use market_data::{ConnectorError, ExchangeConnector};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum TraderError {
    #[error("Live trading requires API credentials")]
    MissingCredentials,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub executed: bool,
    /// HOLD, BUY while LONG and SELL while FLAT: nothing was attempted.
    pub neutral: bool,
    pub message: String,
    /// The history entry appended by an executed transition.
    pub record: Option<TradeRecord>,
}

impl ExecutionReport {
    fn rejected(message: String) -> Self {
        Self {
            executed: false,
            neutral: false,
            message,
            record: None,
        }
    }

    fn noop(message: &str) -> Self {
        Self {
            executed: false,
            neutral: true,
            message: message.to_string(),
            record: None,
        }
    }

    fn done(record: TradeRecord) -> Self {
        Self {
            executed: true,
            neutral: false,
            message: record.message.clone(),
            record: Some(record),
        }
    }
}

enum Venue {
    Paper(Balances),
    /// Balances are never cached; the account is the source of truth.
    Live(Arc<dyn ExchangeConnector>),
}

pub struct Trader {
    pair: TradingPair,
    config: TraderConfig,
    venue: Venue,
    position: Position,
    entry_price: Option<f64>,
    history: Vec<TradeRecord>,
}

impl Trader {
    pub fn new(
        mode: TradeMode,
        pair: TradingPair,
        config: TraderConfig,
        connector: Option<Arc<dyn ExchangeConnector>>,
    ) -> Result<Self, TraderError> {
        let venue = match (mode, connector) {
            (TradeMode::Paper, _) => Venue::Paper(Balances {
                quote_free: config.paper_balance,
                base_free: 0.0,
            }),
            (TradeMode::Real, Some(connector)) => Venue::Live(connector),
            (TradeMode::Real, None) => return Err(TraderError::MissingCredentials),
        };
        Ok(Self {
            pair,
            config,
            venue,
            position: Position::Flat,
            entry_price: None,
            history: Vec::new(),
        })
    }

    pub fn paper(pair: TradingPair, config: TraderConfig) -> Self {
        Self {
            pair,
            venue: Venue::Paper(Balances {
                quote_free: config.paper_balance,
                base_free: 0.0,
            }),
            config,
            position: Position::Flat,
            entry_price: None,
            history: Vec::new(),
        }
    }

    /// Same mode, pair and connector with a clean ledger and empty history.
    pub fn fresh(&self) -> Self {
        match &self.venue {
            Venue::Paper(_) => Self::paper(self.pair.clone(), self.config),
            Venue::Live(connector) => Self {
                pair: self.pair.clone(),
                config: self.config,
                venue: Venue::Live(connector.clone()),
                position: Position::Flat,
                entry_price: None,
                history: Vec::new(),
            },
        }
    }

    pub fn mode(&self) -> TradeMode {
        match self.venue {
            Venue::Paper(_) => TradeMode::Paper,
            Venue::Live(_) => TradeMode::Real,
        }
    }

    pub fn pair(&self) -> &TradingPair {
        &self.pair
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn history(&self) -> &[TradeRecord] {
        &self.history
    }

    /// Paper: the in-memory ledger. Live: a fresh account query on every call.
    pub async fn balances(&self) -> Result<Balances, ConnectorError> {
        match &self.venue {
            Venue::Paper(ledger) => Ok(*ledger),
            Venue::Live(connector) => {
                let free = connector.fetch_balances().await?;
                Ok(Balances {
                    quote_free: free.get(self.pair.quote()).copied().unwrap_or(0.0),
                    base_free: free.get(self.pair.base()).copied().unwrap_or(0.0),
                })
            }
        }
    }

    pub async fn execute(
        &mut self,
        signal: Signal,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> ExecutionReport {
        let report = match (signal, self.position) {
            (Signal::Buy, Position::Flat) => self.open(price, timestamp).await,
            (Signal::Sell, Position::Long) => self.close(price, timestamp).await,
            (Signal::Hold, _) => ExecutionReport::noop("HOLD: no action"),
            (Signal::Buy, Position::Long) => {
                ExecutionReport::noop("BUY ignored: already holding a position")
            }
            (Signal::Sell, Position::Flat) => ExecutionReport::noop("SELL ignored: no open position"),
        };

        if let Some(record) = &report.record {
            self.history.push(record.clone());
        }
        report
    }

    fn spendable(&self, quote_free: f64) -> f64 {
        quote_free * (1.0 - self.config.fee_buffer)
    }

    async fn open(&mut self, price: f64, timestamp: DateTime<Utc>) -> ExecutionReport {
        if price <= 0.0 {
            return ExecutionReport::rejected(format!("BUY rejected: invalid price {}", price));
        }
        let quote_free = match self.balances().await {
            Ok(b) => b.quote_free,
            Err(e) => {
                warn!("Balance query failed before BUY: {}", e);
                return ExecutionReport::rejected(format!("BUY not executed: {}", e));
            }
        };

        let spendable = self.spendable(quote_free);
        if spendable < self.config.min_notional {
            let msg = format!(
                "BUY rejected: insufficient balance ({:.2} {} spendable, minimum {:.2})",
                spendable,
                self.pair.quote(),
                self.config.min_notional
            );
            info!("{}", msg);
            return ExecutionReport::rejected(msg);
        }
        let quantity = spendable / price;

        let filled = match &mut self.venue {
            Venue::Paper(ledger) => {
                ledger.quote_free = 0.0;
                ledger.base_free += quantity;
                quantity
            }
            Venue::Live(connector) => {
                match connector.market_buy(&self.pair.ticker(), quantity).await {
                    Ok(ack) if ack.executed_qty > 0.0 => ack.executed_qty,
                    Ok(ack) => {
                        warn!("Market BUY {} came back {} with no fill", ack.order_id, ack.status);
                        return ExecutionReport::rejected(format!(
                            "BUY not executed: order {} {}",
                            ack.order_id, ack.status
                        ));
                    }
                    Err(e) => {
                        warn!("Market BUY failed: {}", e);
                        return ExecutionReport::rejected(format!("BUY not executed: {}", e));
                    }
                }
            }
        };

        self.position = Position::Long;
        self.entry_price = Some(price);
        let msg = format!(
            "BUY {:.6} {} @ {:.2} ({:.2} {})",
            filled,
            self.pair.base(),
            price,
            spendable,
            self.pair.quote()
        );
        info!("{}", msg);
        ExecutionReport::done(TradeRecord::entry(
            timestamp,
            &self.pair.to_string(),
            price,
            filled,
            msg,
        ))
    }

    async fn close(&mut self, price: f64, timestamp: DateTime<Utc>) -> ExecutionReport {
        let entry = self.entry_price.unwrap_or(price);

        let sold = match &mut self.venue {
            Venue::Paper(ledger) => {
                let held = ledger.base_free;
                ledger.quote_free += held * price;
                ledger.base_free = 0.0;
                held
            }
            Venue::Live(connector) => {
                let held = match connector.fetch_balances().await {
                    Ok(free) => free.get(self.pair.base()).copied().unwrap_or(0.0),
                    Err(e) => {
                        warn!("Balance query failed before SELL: {}", e);
                        return ExecutionReport::rejected(format!("SELL not executed: {}", e));
                    }
                };
                if held <= 0.0 {
                    // Sold outside this session: follow the account.
                    warn!("No {} left to sell; position reset to FLAT", self.pair.base());
                    self.position = Position::Flat;
                    self.entry_price = None;
                    return ExecutionReport::rejected(format!(
                        "SELL not executed: no {} balance, position reset to FLAT",
                        self.pair.base()
                    ));
                }
                match connector.market_sell(&self.pair.ticker(), held).await {
                    Ok(ack) if ack.executed_qty > 0.0 => ack.executed_qty,
                    Ok(ack) => {
                        warn!("Market SELL {} came back {} with no fill", ack.order_id, ack.status);
                        return ExecutionReport::rejected(format!(
                            "SELL not executed: order {} {}",
                            ack.order_id, ack.status
                        ));
                    }
                    Err(e) => {
                        warn!("Market SELL failed: {}", e);
                        return ExecutionReport::rejected(format!("SELL not executed: {}", e));
                    }
                }
            }
        };

        let pnl = (price - entry) * sold;
        self.position = Position::Flat;
        self.entry_price = None;
        let msg = format!(
            "SELL {:.6} {} @ {:.2}, P/L {:+.2} {}",
            sold,
            self.pair.base(),
            price,
            pnl,
            self.pair.quote()
        );
        info!("{}", msg);
        ExecutionReport::done(TradeRecord::exit(
            timestamp,
            &self.pair.to_string(),
            price,
            sold,
            pnl,
            msg,
        ))
    }
}
