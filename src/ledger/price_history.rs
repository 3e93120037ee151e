use sled::transaction::TransactionalTree;
use sled::Tree;

use super::{keys, scan_prefix, tx_encode, TxResult};
use crate::models::{PersistenceError, PricePoint};

pub fn append(price_history: &TransactionalTree, point: &PricePoint) -> TxResult<()> {
    price_history.insert(keys::price_key(point), tx_encode(point)?)?;
    Ok(())
}

/// Price points of one market ordered by (block, log index).
pub fn for_market(tree: &Tree, market_id: u64) -> Result<Vec<PricePoint>, PersistenceError> {
    scan_prefix(tree, &keys::market_key(market_id))
}
