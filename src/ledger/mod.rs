//! sled-backed ledger: trade log, positions, market aggregates, price history
//! and the anomaly log, each in its own tree of one database.
//!
//! Every mutation goes through [`LedgerStore::transaction`], which hands the
//! closure a [`UnitOfWork`] spanning all five trees. sled commits the unit
//! atomically or not at all, and may re-run the closure on conflict, so the
//! closure must stay free of side effects outside the unit.

pub mod anomalies;
pub mod keys;
pub mod markets;
pub mod positions;
pub mod price_history;
pub mod trade_log;

use ethers::types::Address;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError, Transactional,
    TransactionalTree,
};
use sled::{Db, IVec, Tree};

use crate::models::{
    ConsistencyAnomaly, EventKey, MarketAggregate, PersistenceError, Position, PricePoint,
    TradeRecord,
};

pub use markets::MarketAggregateStore;
pub use positions::PositionLedger;
pub use trade_log::{RecordOutcome, TradeLog};

const TRADES_TREE: &str = "trades";
const POSITIONS_TREE: &str = "positions";
const MARKETS_TREE: &str = "markets";
const PRICE_HISTORY_TREE: &str = "price_history";
const ANOMALIES_TREE: &str = "anomalies";

pub type TxResult<T> = ConflictableTransactionResult<T, PersistenceError>;

/// Transactional view over every ledger tree for the duration of one event.
pub struct UnitOfWork<'a> {
    pub trades: &'a TransactionalTree,
    pub positions: &'a TransactionalTree,
    pub markets: &'a TransactionalTree,
    pub price_history: &'a TransactionalTree,
    pub anomalies: &'a TransactionalTree,
}

impl UnitOfWork<'_> {
    /// Abort the whole unit; nothing written so far becomes visible.
    pub fn abort<T>(err: PersistenceError) -> TxResult<T> {
        Err(ConflictableTransactionError::Abort(err))
    }
}

pub struct LedgerStore {
    db: Db,
    trade_log: TradeLog,
    positions: PositionLedger,
    markets: MarketAggregateStore,
    price_history: Tree,
    anomalies: Tree,
}

impl LedgerStore {
    pub fn open(path: &str) -> Result<Self, PersistenceError> {
        Self::from_db(sled::open(path)?)
    }

    /// In-memory store removed on drop. Used by tests and dry runs.
    pub fn temporary() -> Result<Self, PersistenceError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    pub fn from_db(db: Db) -> Result<Self, PersistenceError> {
        Ok(Self {
            trade_log: TradeLog::new(db.open_tree(TRADES_TREE)?),
            positions: PositionLedger::new(db.open_tree(POSITIONS_TREE)?),
            markets: MarketAggregateStore::new(db.open_tree(MARKETS_TREE)?),
            price_history: db.open_tree(PRICE_HISTORY_TREE)?,
            anomalies: db.open_tree(ANOMALIES_TREE)?,
            db,
        })
    }

    /// Run `f` as one atomic unit across all ledger trees.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        F: Fn(&UnitOfWork<'_>) -> TxResult<T>,
    {
        let result = (
            self.trade_log.tree(),
            self.positions.tree(),
            self.markets.tree(),
            &self.price_history,
            &self.anomalies,
        )
            .transaction(|(trades, positions, markets, price_history, anomalies)| {
                f(&UnitOfWork { trades, positions, markets, price_history, anomalies })
            });

        match result {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(err)) => Err(err),
            Err(TransactionError::Storage(err)) => Err(err.into()),
        }
    }

    pub fn flush(&self) -> Result<usize, PersistenceError> {
        Ok(self.db.flush()?)
    }

    // ---- read model ----

    pub fn get_trade_record(&self, key: &EventKey) -> Result<Option<TradeRecord>, PersistenceError> {
        self.trade_log.get(key)
    }

    pub fn get_position(
        &self,
        trader: &Address,
        market_id: u64,
    ) -> Result<Option<Position>, PersistenceError> {
        self.positions.get(trader, market_id)
    }

    pub fn get_market_aggregate(
        &self,
        market_id: u64,
    ) -> Result<Option<MarketAggregate>, PersistenceError> {
        self.markets.get(market_id)
    }

    pub fn positions_for_market(&self, market_id: u64) -> Result<Vec<Position>, PersistenceError> {
        self.positions.for_market(market_id)
    }

    pub fn price_history(&self, market_id: u64) -> Result<Vec<PricePoint>, PersistenceError> {
        price_history::for_market(&self.price_history, market_id)
    }

    pub fn anomalies(&self) -> Result<Vec<ConsistencyAnomaly>, PersistenceError> {
        anomalies::all(&self.anomalies)
    }

    pub fn trade_count(&self) -> usize {
        self.trade_log.len()
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, PersistenceError> {
    Ok(serde_json::to_vec(value)?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &IVec) -> Result<T, PersistenceError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// `encode` for use inside a transaction closure.
pub(crate) fn tx_encode<T: Serialize>(value: &T) -> TxResult<Vec<u8>> {
    encode(value).map_err(ConflictableTransactionError::Abort)
}

/// `decode` for use inside a transaction closure.
pub(crate) fn tx_decode<T: DeserializeOwned>(bytes: &IVec) -> TxResult<T> {
    decode(bytes).map_err(ConflictableTransactionError::Abort)
}

/// Decode every value under `prefix`, in key order.
pub(crate) fn scan_prefix<T: DeserializeOwned>(
    tree: &Tree,
    prefix: &[u8],
) -> Result<Vec<T>, PersistenceError> {
    let mut out = Vec::new();
    for item in tree.scan_prefix(prefix) {
        let (_, value) = item?;
        out.push(decode(&value)?);
    }
    Ok(out)
}
