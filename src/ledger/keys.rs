//! Binary key layouts. Integers are big-endian so sled's lexicographic order
//! matches numeric order and prefix scans group by market.

use ethers::types::Address;

use crate::models::{AnomalyScope, EventKey, PricePoint};

pub fn trade_key(key: &EventKey) -> Vec<u8> {
    key.to_bytes()
}

pub fn market_key(market_id: u64) -> Vec<u8> {
    market_id.to_be_bytes().to_vec()
}

/// `market_id ++ trader`, so all holders of a market share a prefix.
pub fn position_key(trader: &Address, market_id: u64) -> Vec<u8> {
    let mut key = Vec::with_capacity(28);
    key.extend_from_slice(&market_id.to_be_bytes());
    key.extend_from_slice(trader.as_bytes());
    key
}

/// `market_id ++ block_number ++ log_index ++ tx_hash`: history reads back in
/// block order no matter in which order events were delivered.
pub fn price_key(point: &PricePoint) -> Vec<u8> {
    let mut key = Vec::with_capacity(56);
    key.extend_from_slice(&point.market_id.to_be_bytes());
    key.extend_from_slice(&point.block_number.to_be_bytes());
    key.extend_from_slice(&point.log_index.to_be_bytes());
    key.extend_from_slice(point.transaction_hash.as_bytes());
    key
}

pub fn anomaly_key(key: &EventKey, scope: AnomalyScope) -> Vec<u8> {
    let mut bytes = key.to_bytes();
    bytes.push(match scope {
        AnomalyScope::Position => 0,
        AnomalyScope::Market => 1,
    });
    bytes
}
