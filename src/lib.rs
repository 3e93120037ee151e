//! Off-chain ledger for an AMM prediction market.
//!
//! Trade events from the market contract are reconciled exactly once into a
//! trade log, per-trader positions, per-market aggregates and a price history.

pub mod configure;
pub mod engine;
pub mod key_locks;
pub mod ledger;
pub mod logger;
pub mod metrics;
pub mod models;

pub use configure::{AppConfig, EngineConfig};
pub use engine::{FailPoint, LedgerEngine, ProcessingOutcome};
pub use models::{
    ConsistencyAnomaly, InvalidEventError, LedgerError, MarketAggregate, PersistenceError,
    Position, PricePoint, RawTradeEvent, Side, TradeEvent, TradeRecord, TradeType,
};
