//! Stored ledger entities.

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use super::serde_utils as u256_as_decimal;
use super::trade_event::{EventKey, Side, TradeEvent, TradeType};

/// Persisted copy of a processed event. Written once per identity key and
/// never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    #[serde(flatten)]
    pub event: TradeEvent,
    pub trade_type: TradeType,
}

impl TradeRecord {
    pub fn from_event(event: &TradeEvent) -> Self {
        Self { event: event.clone(), trade_type: event.side.into() }
    }

    pub fn key(&self) -> EventKey {
        self.event.key()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub trader: Address,
    pub market_id: u64,
    #[serde(with = "u256_as_decimal")]
    pub yes_shares: U256,
    #[serde(with = "u256_as_decimal")]
    pub no_shares: U256,
    /// Gross cost of every buy. Sells never reduce it, so this is not net exposure.
    #[serde(with = "u256_as_decimal")]
    pub total_invested: U256,
}

impl Position {
    pub fn empty(trader: Address, market_id: u64) -> Self {
        Self {
            trader,
            market_id,
            yes_shares: U256::zero(),
            no_shares: U256::zero(),
            total_invested: U256::zero(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketAggregate {
    pub market_id: u64,
    #[serde(with = "u256_as_decimal")]
    pub total_yes_shares: U256,
    #[serde(with = "u256_as_decimal")]
    pub total_no_shares: U256,
    #[serde(with = "u256_as_decimal")]
    pub total_volume: U256,
    pub last_yes_price_bps: Option<u16>,
    pub last_no_price_bps: Option<u16>,
    /// Display only: last writer wins, so out-of-order delivery can leave a
    /// stale pointer here until a later event overwrites it.
    pub last_trade_block: u64,
    pub last_trade_tx_hash: Option<H256>,
}

impl MarketAggregate {
    pub fn empty(market_id: u64) -> Self {
        Self {
            market_id,
            total_yes_shares: U256::zero(),
            total_no_shares: U256::zero(),
            total_volume: U256::zero(),
            last_yes_price_bps: None,
            last_no_price_bps: None,
            last_trade_block: 0,
            last_trade_tx_hash: None,
        }
    }
}

/// One entry of a market's price history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePoint {
    pub market_id: u64,
    pub is_yes: bool,
    pub price_bps: u16,
    pub block_number: u64,
    pub block_time: i64,
    pub transaction_hash: H256,
    pub log_index: u64,
}

impl PricePoint {
    pub fn from_event(event: &TradeEvent) -> Self {
        Self {
            market_id: event.market_id,
            is_yes: event.is_yes,
            price_bps: event.price_bps,
            block_number: event.block_number,
            block_time: event.block_time,
            transaction_hash: event.transaction_hash,
            log_index: event.log_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyScope {
    Position,
    Market,
}

impl AnomalyScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyScope::Position => "position",
            AnomalyScope::Market => "market",
        }
    }
}

/// A sell that asked for more shares than the balance held. The balance was
/// floored at zero instead of failing; usually means a prior event was missed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyAnomaly {
    pub scope: AnomalyScope,
    pub transaction_hash: H256,
    pub log_index: u64,
    pub market_id: u64,
    pub trader: Address,
    pub is_yes: bool,
    pub side: Side,
    #[serde(with = "u256_as_decimal")]
    pub requested: U256,
    #[serde(with = "u256_as_decimal")]
    pub available: U256,
}

impl ConsistencyAnomaly {
    pub fn share_floor(scope: AnomalyScope, event: &TradeEvent, available: U256) -> Self {
        Self {
            scope,
            transaction_hash: event.transaction_hash,
            log_index: event.log_index,
            market_id: event.market_id,
            trader: event.trader,
            is_yes: event.is_yes,
            side: event.side,
            requested: event.shares_amount,
            available,
        }
    }

    /// Shares the sell could not take from the balance.
    pub fn shortfall(&self) -> U256 {
        self.requested.saturating_sub(self.available)
    }
}
