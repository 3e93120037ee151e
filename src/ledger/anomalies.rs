use sled::transaction::TransactionalTree;
use sled::Tree;

use super::{decode, keys, tx_encode, TxResult};
use crate::models::{ConsistencyAnomaly, EventKey, PersistenceError};

/// Persist an anomaly alongside the event that caused it. Keyed by event
/// identity and scope, so the record exists at most once per event.
pub fn record(anomalies: &TransactionalTree, anomaly: &ConsistencyAnomaly) -> TxResult<()> {
    let key = keys::anomaly_key(
        &EventKey::new(anomaly.transaction_hash, anomaly.log_index),
        anomaly.scope,
    );
    anomalies.insert(key, tx_encode(anomaly)?)?;
    Ok(())
}

pub fn all(tree: &Tree) -> Result<Vec<ConsistencyAnomaly>, PersistenceError> {
    let mut out = Vec::new();
    for item in tree.iter() {
        let (_, value) = item?;
        out.push(decode(&value)?);
    }
    Ok(out)
}
