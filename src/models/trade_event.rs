//! Trade events emitted by the AMM market contract.
//!
//! `RawTradeEvent` is what the chain subscription layer hands over (hashes,
//! addresses and amounts still as strings). `RawTradeEvent::validate` turns it
//! into a `TradeEvent`, the only shape the reconciliation engine accepts.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use super::ledger_errors::InvalidEventError;
use super::serde_utils as u256_as_decimal;

/// Upper bound of a price expressed in basis points (100%).
pub const MAX_PRICE_BPS: u16 = 10_000;

/// Scale of share and cost amounts (18-decimal fixed point).
pub const AMOUNT_DECIMALS: u32 = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Map the emitting event kind to a side: any "sold" kind is a Sell,
    /// everything else is a Buy.
    pub fn from_event_kind(kind: &str) -> Self {
        if kind.to_ascii_lowercase().contains("sold") {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}

/// Trade direction as persisted on a `TradeRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeType {
    Buy,
    Sell,
}

impl From<Side> for TradeType {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => TradeType::Buy,
            Side::Sell => TradeType::Sell,
        }
    }
}

/// Idempotency token of an on-chain log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventKey {
    pub transaction_hash: H256,
    pub log_index: u64,
}

impl EventKey {
    pub fn new(transaction_hash: H256, log_index: u64) -> Self {
        Self { transaction_hash, log_index }
    }

    /// 32-byte hash followed by the big-endian log index.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut key = Vec::with_capacity(40);
        key.extend_from_slice(self.transaction_hash.as_bytes());
        key.extend_from_slice(&self.log_index.to_be_bytes());
        key
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.transaction_hash, self.log_index)
    }
}

/// A validated trade execution. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeEvent {
    pub transaction_hash: H256,
    pub log_index: u64,
    pub market_id: u64,
    pub trader: Address,
    /// Outcome side traded; `price_bps` only describes this side.
    pub is_yes: bool,
    pub side: Side,
    #[serde(with = "u256_as_decimal")]
    pub shares_amount: U256,
    pub price_bps: u16,
    #[serde(with = "u256_as_decimal")]
    pub cost_amount: U256,
    pub block_number: u64,
    /// Unix seconds
    pub block_time: i64,
}

impl TradeEvent {
    pub fn key(&self) -> EventKey {
        EventKey::new(self.transaction_hash, self.log_index)
    }

    pub fn block_time_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.block_time, 0)
    }

    pub fn outcome_label(&self) -> &'static str {
        if self.is_yes {
            "YES"
        } else {
            "NO"
        }
    }

    /// Structural checks on an already-typed event. `RawTradeEvent::validate`
    /// runs these as well, so events built by hand get the same guarantees.
    pub fn validate(&self) -> Result<(), InvalidEventError> {
        if self.transaction_hash.is_zero() {
            return Err(InvalidEventError::new("transactionHash", "empty hash"));
        }
        if self.market_id == 0 {
            return Err(InvalidEventError::new("marketId", "must be a positive integer"));
        }
        if self.trader.is_zero() {
            return Err(InvalidEventError::new("trader", "zero address"));
        }
        if self.price_bps > MAX_PRICE_BPS {
            return Err(InvalidEventError::new(
                "priceBasisPoints",
                format!("{} exceeds {}", self.price_bps, MAX_PRICE_BPS),
            ));
        }
        if self.block_time_utc().is_none() {
            return Err(InvalidEventError::new(
                "blockTime",
                format!("{} is not a representable timestamp", self.block_time),
            ));
        }
        Ok(())
    }
}

/// Inbound event as delivered by the chain subscription layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTradeEvent {
    pub transaction_hash: String,
    pub log_index: i64,
    pub market_id: i64,
    pub trader: String,
    pub is_yes: bool,
    /// e.g. "SharesPurchased" or "SharesSold"
    pub event_kind: String,
    pub shares_amount: String,
    pub price_basis_points: i64,
    pub cost_amount: String,
    pub block_number: u64,
    pub block_time: i64,
}

impl RawTradeEvent {
    pub fn validate(&self) -> Result<TradeEvent, InvalidEventError> {
        let hash = self.transaction_hash.trim();
        if hash.is_empty() {
            return Err(InvalidEventError::new("transactionHash", "empty"));
        }
        let transaction_hash = H256::from_str(hash)
            .map_err(|e| InvalidEventError::new("transactionHash", format!("{}: {}", hash, e)))?;

        let log_index = u64::try_from(self.log_index)
            .map_err(|_| InvalidEventError::new("logIndex", format!("{} is negative", self.log_index)))?;

        let market_id = u64::try_from(self.market_id)
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| {
                InvalidEventError::new("marketId", format!("{} is not a positive integer", self.market_id))
            })?;

        let trader = Address::from_str(self.trader.trim())
            .map_err(|e| InvalidEventError::new("trader", format!("{}: {}", self.trader, e)))?;

        let price_bps = u16::try_from(self.price_basis_points)
            .ok()
            .filter(|bps| *bps <= MAX_PRICE_BPS)
            .ok_or_else(|| {
                InvalidEventError::new(
                    "priceBasisPoints",
                    format!("{} outside 0..={}", self.price_basis_points, MAX_PRICE_BPS),
                )
            })?;

        let event = TradeEvent {
            transaction_hash,
            log_index,
            market_id,
            trader,
            is_yes: self.is_yes,
            side: Side::from_event_kind(&self.event_kind),
            shares_amount: parse_amount("sharesAmount", &self.shares_amount)?,
            price_bps,
            cost_amount: parse_amount("costAmount", &self.cost_amount)?,
            block_number: self.block_number,
            block_time: self.block_time,
        };
        event.validate()?;
        Ok(event)
    }
}

/// Parse a non-negative base-10 fixed-point integer.
pub fn parse_amount(field: &'static str, raw: &str) -> Result<U256, InvalidEventError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(InvalidEventError::new(field, "empty amount"));
    }
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InvalidEventError::new(field, format!("{} is not a non-negative integer", raw)));
    }
    U256::from_dec_str(raw).map_err(|e| InvalidEventError::new(field, format!("{}: {}", raw, e)))
}

/// Human-readable rendering of an 18-decimal amount for log lines.
pub fn display_amount(amount: U256) -> String {
    ethers::utils::format_units(amount, AMOUNT_DECIMALS).unwrap_or_else(|_| amount.to_string())
}
