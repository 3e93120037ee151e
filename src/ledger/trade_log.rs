//! Append-only, deduplicated log of processed trade events.
//!
//! The `(transactionHash, logIndex)` key is the idempotency token. The
//! existence check and the insert happen inside the same sled transaction,
//! so two concurrent deliveries of one event cannot both insert: the loser is
//! re-run by sled and then observes the winner's record.

use sled::transaction::TransactionalTree;
use sled::Tree;

use super::{decode, keys, tx_decode, tx_encode, TxResult};
use crate::models::{EventKey, PersistenceError, TradeEvent, TradeRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOutcome {
    /// `false` when the key was already present; nothing was written.
    pub inserted: bool,
    pub record: TradeRecord,
}

/// Insert `event` into the trade log unless its key is already there.
pub fn record_if_new(trades: &TransactionalTree, event: &TradeEvent) -> TxResult<RecordOutcome> {
    let key = keys::trade_key(&event.key());

    if let Some(existing) = trades.get(&key)? {
        let record: TradeRecord = tx_decode(&existing)?;
        return Ok(RecordOutcome { inserted: false, record });
    }

    let record = TradeRecord::from_event(event);
    trades.insert(key, tx_encode(&record)?)?;
    Ok(RecordOutcome { inserted: true, record })
}

pub struct TradeLog {
    tree: Tree,
}

impl TradeLog {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Standalone dedup insert touching only the trade log.
    pub fn record_if_new(&self, event: &TradeEvent) -> Result<RecordOutcome, PersistenceError> {
        let result = self.tree.transaction(|trades| record_if_new(trades, event));
        match result {
            Ok(outcome) => Ok(outcome),
            Err(sled::transaction::TransactionError::Abort(err)) => Err(err),
            Err(sled::transaction::TransactionError::Storage(err)) => Err(err.into()),
        }
    }

    pub fn get(&self, key: &EventKey) -> Result<Option<TradeRecord>, PersistenceError> {
        match self.tree.get(keys::trade_key(key))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn contains(&self, key: &EventKey) -> Result<bool, PersistenceError> {
        Ok(self.tree.contains_key(keys::trade_key(key))?)
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Side, TradeType};
    use ethers::types::{Address, H256, U256};

    fn event(log_index: u64) -> TradeEvent {
        TradeEvent {
            transaction_hash: H256::repeat_byte(0x42),
            log_index,
            market_id: 7,
            trader: Address::repeat_byte(0x01),
            is_yes: false,
            side: Side::Sell,
            shares_amount: U256::from(10u64),
            price_bps: 2500,
            cost_amount: U256::from(3u64),
            block_number: 12,
            block_time: 1_700_000_000,
        }
    }

    fn trade_log() -> TradeLog {
        let db = sled::Config::new().temporary(true).open().unwrap();
        TradeLog::new(db.open_tree("trades").unwrap())
    }

    #[test]
    fn test_first_insert_then_duplicate() {
        let log = trade_log();
        let first = log.record_if_new(&event(0)).unwrap();
        assert!(first.inserted);
        assert_eq!(first.record.trade_type, TradeType::Sell);

        let second = log.record_if_new(&event(0)).unwrap();
        assert!(!second.inserted);
        assert_eq!(second.record, first.record);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_same_hash_different_log_index_is_distinct() {
        let log = trade_log();
        assert!(log.record_if_new(&event(0)).unwrap().inserted);
        assert!(log.record_if_new(&event(1)).unwrap().inserted);
        assert_eq!(log.len(), 2);
        assert!(log.contains(&event(1).key()).unwrap());
    }

    #[test]
    fn test_duplicate_keeps_first_payload() {
        let log = trade_log();
        log.record_if_new(&event(0)).unwrap();

        let mut altered = event(0);
        altered.cost_amount = U256::from(999u64);
        let outcome = log.record_if_new(&altered).unwrap();
        assert!(!outcome.inserted);
        assert_eq!(outcome.record.event.cost_amount, U256::from(3u64));
    }
}
