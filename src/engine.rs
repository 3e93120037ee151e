//! Ledger reconciliation engine.
//!
//! `LedgerEngine::process` is the only write path into the ledger. One call
//! validates the event, takes the lock for its market (which covers every
//! position in that market), and then, inside a single sled unit of work:
//!
//! 1. inserts the event into the trade log unless its key is already there;
//! 2. on a duplicate, commits the (empty) unit and reports `Duplicate`;
//! 3. otherwise applies the position delta, the market delta, appends the
//!    price point and records any share-floor anomalies, all in the same unit.
//!
//! Either every write of step 3 becomes visible together with the trade
//! record, or none do.

use std::time::Instant;

use ethers::types::{Address, H256};
use parking_lot::Mutex;

use crate::configure::EngineConfig;
use crate::key_locks::KeyLocks;
use crate::ledger::markets::MarketTrade;
use crate::ledger::{
    anomalies, price_history, trade_log, LedgerStore, MarketAggregateStore, PositionLedger,
    UnitOfWork,
};
use crate::metrics::{EngineStats, StatsSnapshot};
use crate::models::{
    display_amount, AnomalyScope, ConsistencyAnomaly, EventKey, LedgerError, MarketAggregate,
    PersistenceError, Position, PricePoint, RawTradeEvent, TradeEvent, TradeRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// First sighting: the trade record, position and aggregate were committed together.
    Applied {
        record: TradeRecord,
        position: Position,
        market: MarketAggregate,
        anomalies: Vec<ConsistencyAnomaly>,
    },
    /// Key already in the trade log; nothing changed.
    Duplicate { record: TradeRecord },
}

impl ProcessingOutcome {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, ProcessingOutcome::Duplicate { .. })
    }

    pub fn record(&self) -> &TradeRecord {
        match self {
            ProcessingOutcome::Applied { record, .. } => record,
            ProcessingOutcome::Duplicate { record } => record,
        }
    }
}

/// Points inside the unit of work where a test can force a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    AfterTradeLog,
    AfterPosition,
}

impl FailPoint {
    fn name(&self) -> &'static str {
        match self {
            FailPoint::AfterTradeLog => "after_trade_log",
            FailPoint::AfterPosition => "after_position",
        }
    }
}

pub struct LedgerEngine {
    store: LedgerStore,
    locks: KeyLocks,
    config: EngineConfig,
    stats: EngineStats,
    fail_point: Mutex<Option<FailPoint>>,
}

impl LedgerEngine {
    pub fn new(store: LedgerStore, config: EngineConfig) -> Self {
        Self {
            locks: KeyLocks::new(config.lock_stripes, config.lock_timeout),
            store,
            config,
            stats: EngineStats::new(),
            fail_point: Mutex::new(None),
        }
    }

    pub fn open(path: &str, config: EngineConfig) -> Result<Self, PersistenceError> {
        Ok(Self::new(LedgerStore::open(path)?, config))
    }

    /// Engine over a throwaway in-memory database.
    pub fn temporary(config: EngineConfig) -> Result<Self, PersistenceError> {
        Ok(Self::new(LedgerStore::temporary()?, config))
    }

    /// Arm (or clear with `None`) a fail point. Test hook only.
    pub fn set_fail_point(&self, point: Option<FailPoint>) {
        *self.fail_point.lock() = point;
    }

    /// Validate a raw inbound event and process it.
    pub fn process_raw(&self, raw: &RawTradeEvent) -> Result<ProcessingOutcome, LedgerError> {
        let event = raw.validate().map_err(|e| {
            self.stats.record_invalid();
            log::warn!("INVALID_EVENT: tx={} log_index={} {}", raw.transaction_hash, raw.log_index, e);
            e
        })?;
        self.process(&event)
    }

    pub fn process(&self, event: &TradeEvent) -> Result<ProcessingOutcome, LedgerError> {
        let start = Instant::now();
        let key = event.key();

        if let Err(e) = event.validate() {
            self.stats.record_invalid();
            log::warn!("INVALID_EVENT: {} {}", key, e);
            return Err(e.into());
        }

        let _guard = self.locks.acquire(event.market_id).map_err(|e| {
            self.stats.record_busy();
            log::warn!("LEDGER_BUSY: {} {}", key, e);
            e
        })?;

        let fail_point = *self.fail_point.lock();
        let outcome = self.store.transaction(|uow| apply_event(uow, event, fail_point)).map_err(|e| {
            self.stats.record_storage_failure();
            log::error!("PERSISTENCE_FAILED: {} {}", key, e);
            e
        })?;

        match &outcome {
            ProcessingOutcome::Applied { anomalies, position, market, .. } => {
                self.stats.record_applied(anomalies.len());
                for anomaly in anomalies {
                    log_anomaly(anomaly);
                }
                log::debug!(
                    "APPLIED: {} market={} trader={:?} side={:?} outcome={} shares={} cost={} pos_yes={} pos_no={} mkt_volume={} took_us={}",
                    key,
                    event.market_id,
                    event.trader,
                    event.side,
                    event.outcome_label(),
                    display_amount(event.shares_amount),
                    display_amount(event.cost_amount),
                    display_amount(position.yes_shares),
                    display_amount(position.no_shares),
                    display_amount(market.total_volume),
                    start.elapsed().as_micros()
                );
            }
            ProcessingOutcome::Duplicate { record } => {
                self.stats.record_duplicate();
                if record.event != *event {
                    log::warn!("PAYLOAD_MISMATCH: {} redelivered with different fields, keeping first", key);
                } else {
                    log::debug!("DUPLICATE: {}", key);
                }
            }
        }

        // The unit is committed at this point; a failed flush only delays durability.
        if self.config.flush_on_commit {
            if let Err(e) = self.store.flush() {
                self.stats.record_storage_failure();
                log::error!("FLUSH_FAILED: {} committed but not flushed: {}", key, e);
            }
        }

        Ok(outcome)
    }

    // ---- read accessors ----

    pub fn get_position(&self, trader: &Address, market_id: u64) -> Result<Option<Position>, PersistenceError> {
        self.store.get_position(trader, market_id)
    }

    pub fn get_market_aggregate(&self, market_id: u64) -> Result<Option<MarketAggregate>, PersistenceError> {
        self.store.get_market_aggregate(market_id)
    }

    pub fn get_trade_record(
        &self,
        transaction_hash: H256,
        log_index: u64,
    ) -> Result<Option<TradeRecord>, PersistenceError> {
        self.store.get_trade_record(&EventKey::new(transaction_hash, log_index))
    }

    pub fn positions_for_market(&self, market_id: u64) -> Result<Vec<Position>, PersistenceError> {
        self.store.positions_for_market(market_id)
    }

    pub fn price_history(&self, market_id: u64) -> Result<Vec<PricePoint>, PersistenceError> {
        self.store.price_history(market_id)
    }

    pub fn anomalies(&self) -> Result<Vec<ConsistencyAnomaly>, PersistenceError> {
        self.store.anomalies()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }
}

/// Body of the unit of work. sled may run it more than once, so it only
/// touches the unit and returns everything the caller needs to report.
fn apply_event(
    uow: &UnitOfWork<'_>,
    event: &TradeEvent,
    fail_point: Option<FailPoint>,
) -> crate::ledger::TxResult<ProcessingOutcome> {
    let logged = trade_log::record_if_new(uow.trades, event)?;
    if !logged.inserted {
        return Ok(ProcessingOutcome::Duplicate { record: logged.record });
    }

    if fail_point == Some(FailPoint::AfterTradeLog) {
        return UnitOfWork::abort(PersistenceError::Injected(FailPoint::AfterTradeLog.name()));
    }

    let position = PositionLedger::apply_delta(
        uow.positions,
        &event.trader,
        event.market_id,
        event.is_yes,
        event.side,
        event.shares_amount,
        event.cost_amount,
    )?;

    if fail_point == Some(FailPoint::AfterPosition) {
        return UnitOfWork::abort(PersistenceError::Injected(FailPoint::AfterPosition.name()));
    }

    let market = MarketAggregateStore::apply_delta(
        uow.markets,
        event.market_id,
        &MarketTrade {
            is_yes: event.is_yes,
            side: event.side,
            shares_amount: event.shares_amount,
            cost_amount: event.cost_amount,
            price_bps: event.price_bps,
            block_number: event.block_number,
            transaction_hash: event.transaction_hash,
        },
    )?;

    price_history::append(uow.price_history, &PricePoint::from_event(event))?;

    let mut found = Vec::new();
    if let Some(available) = position.floored_from {
        found.push(ConsistencyAnomaly::share_floor(AnomalyScope::Position, event, available));
    }
    if let Some(available) = market.floored_from {
        found.push(ConsistencyAnomaly::share_floor(AnomalyScope::Market, event, available));
    }
    for anomaly in &found {
        anomalies::record(uow.anomalies, anomaly)?;
    }

    Ok(ProcessingOutcome::Applied {
        record: logged.record,
        position: position.position,
        market: market.aggregate,
        anomalies: found,
    })
}

fn log_anomaly(anomaly: &ConsistencyAnomaly) {
    log::warn!(
        "SHARE_FLOOR_ANOMALY: scope={} tx={:?} log_index={} market={} trader={:?} outcome={} requested={} available={} shortfall={}",
        anomaly.scope.as_str(),
        anomaly.transaction_hash,
        anomaly.log_index,
        anomaly.market_id,
        anomaly.trader,
        if anomaly.is_yes { "YES" } else { "NO" },
        display_amount(anomaly.requested),
        display_amount(anomaly.available),
        display_amount(anomaly.shortfall())
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use ethers::types::U256;

    fn units_tenths(tenths: u64) -> U256 {
        U256::from(tenths) * U256::exp10(17)
    }

    fn event(log_index: u64, side: Side, shares_tenths: u64, cost_tenths: u64) -> TradeEvent {
        TradeEvent {
            transaction_hash: H256::from_low_u64_be(1000 + log_index),
            log_index,
            market_id: 7,
            trader: Address::repeat_byte(0x0a),
            is_yes: true,
            side,
            shares_amount: units_tenths(shares_tenths),
            price_bps: 4000,
            cost_amount: units_tenths(cost_tenths),
            block_number: 100 + log_index,
            block_time: 1_700_000_000,
        }
    }

    fn engine() -> LedgerEngine {
        LedgerEngine::temporary(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_fail_after_trade_log_rolls_back_everything() {
        let engine = engine();
        let e = event(0, Side::Buy, 25, 10);

        engine.set_fail_point(Some(FailPoint::AfterTradeLog));
        let err = engine.process(&e).unwrap_err();
        assert_eq!(err, LedgerError::Persistence(PersistenceError::Injected("after_trade_log")));

        assert!(engine.get_trade_record(e.transaction_hash, e.log_index).unwrap().is_none());
        assert!(engine.get_position(&e.trader, 7).unwrap().is_none());
        assert!(engine.get_market_aggregate(7).unwrap().is_none());
        assert!(engine.price_history(7).unwrap().is_empty());

        // retry once the failure clears: applied exactly once
        engine.set_fail_point(None);
        assert!(!engine.process(&e).unwrap().is_duplicate());
        assert!(engine.process(&e).unwrap().is_duplicate());
        assert_eq!(engine.get_position(&e.trader, 7).unwrap().unwrap().yes_shares, units_tenths(25));
    }

    #[test]
    fn test_fail_after_position_rolls_back_position() {
        let engine = engine();
        let e = event(0, Side::Buy, 25, 10);

        engine.set_fail_point(Some(FailPoint::AfterPosition));
        assert!(engine.process(&e).is_err());
        assert!(engine.get_trade_record(e.transaction_hash, e.log_index).unwrap().is_none());
        assert!(engine.get_position(&e.trader, 7).unwrap().is_none());
        assert_eq!(engine.stats().storage_failures, 1);
    }

    #[test]
    fn test_anomaly_recorded_once_across_redelivery() {
        let engine = engine();
        let sell = event(0, Side::Sell, 10, 5);

        match engine.process(&sell).unwrap() {
            ProcessingOutcome::Applied { anomalies, position, .. } => {
                assert_eq!(anomalies.len(), 2);
                assert!(position.yes_shares.is_zero());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(engine.process(&sell).unwrap().is_duplicate());

        let stored = engine.anomalies().unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].scope, AnomalyScope::Position);
        assert_eq!(stored[1].scope, AnomalyScope::Market);
        assert_eq!(engine.stats().anomalies, 2);
    }

    #[test]
    fn test_flush_on_commit_reports_applied_and_anomalies() {
        let engine = LedgerEngine::temporary(EngineConfig { flush_on_commit: true, ..EngineConfig::default() })
            .unwrap();
        let sell = event(0, Side::Sell, 10, 5);

        match engine.process(&sell).unwrap() {
            ProcessingOutcome::Applied { anomalies, .. } => assert_eq!(anomalies.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
        let stats = engine.stats();
        assert_eq!(stats.applied, 1);
        assert_eq!(stats.anomalies, 2);
        assert_eq!(stats.storage_failures, 0);
        assert!(engine.get_trade_record(sell.transaction_hash, 0).unwrap().is_some());
    }

    #[test]
    fn test_busy_when_market_is_held_then_retry_applies() {
        let engine = LedgerEngine::temporary(EngineConfig {
            lock_timeout: std::time::Duration::from_millis(5),
            ..EngineConfig::default()
        })
        .unwrap();
        let e = event(0, Side::Buy, 25, 10);

        let held = engine.locks.acquire(e.market_id).unwrap();
        let err = std::thread::scope(|s| s.spawn(|| engine.process(&e)).join().unwrap()).unwrap_err();
        assert_eq!(err.error_code(), "LEDGER_BUSY");
        assert!(err.is_retryable());
        assert_eq!(engine.stats().busy, 1);
        assert_eq!(engine.store().trade_count(), 0);
        drop(held);

        assert!(!engine.process(&e).unwrap().is_duplicate());
        assert_eq!(engine.stats().applied, 1);
    }

    #[test]
    fn test_invalid_event_touches_nothing() {
        let engine = engine();
        let mut e = event(0, Side::Buy, 1, 1);
        e.market_id = 0;

        let err = engine.process(&e).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_EVENT");
        assert_eq!(engine.store().trade_count(), 0);
        assert_eq!(engine.stats().invalid, 1);
    }
}
