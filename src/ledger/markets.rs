//! Market-wide running totals and last traded prices.

use ethers::types::{H256, U256};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Tree;

use super::{decode, keys, tx_decode, tx_encode, TxResult};
use crate::models::{MarketAggregate, PersistenceError, Side};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketDelta {
    pub aggregate: MarketAggregate,
    pub floored_from: Option<U256>,
}

/// Fields of one trade the aggregate needs.
#[derive(Debug, Clone, Copy)]
pub struct MarketTrade {
    pub is_yes: bool,
    pub side: Side,
    pub shares_amount: U256,
    pub cost_amount: U256,
    pub price_bps: u16,
    pub block_number: u64,
    pub transaction_hash: H256,
}

/// Share totals follow the position rule (floored on sell), volume always
/// grows by the cost, and only the traded side's price is refreshed.
///
/// Fails without touching `aggregate` if a total would overflow.
pub fn apply_trade(
    aggregate: &mut MarketAggregate,
    trade: &MarketTrade,
) -> Result<Option<U256>, PersistenceError> {
    let market_id = aggregate.market_id;
    let volume = aggregate
        .total_volume
        .checked_add(trade.cost_amount)
        .ok_or(PersistenceError::Overflow { field: "total_volume", market_id })?;

    let (total, field) = if trade.is_yes {
        (&mut aggregate.total_yes_shares, "total_yes_shares")
    } else {
        (&mut aggregate.total_no_shares, "total_no_shares")
    };

    let floored_from = match trade.side {
        Side::Buy => {
            *total = total
                .checked_add(trade.shares_amount)
                .ok_or(PersistenceError::Overflow { field, market_id })?;
            None
        }
        Side::Sell => {
            let before = *total;
            *total = before.saturating_sub(trade.shares_amount);
            (trade.shares_amount > before).then_some(before)
        }
    };

    aggregate.total_volume = volume;

    if trade.is_yes {
        aggregate.last_yes_price_bps = Some(trade.price_bps);
    } else {
        aggregate.last_no_price_bps = Some(trade.price_bps);
    }

    // last writer wins
    aggregate.last_trade_block = trade.block_number;
    aggregate.last_trade_tx_hash = Some(trade.transaction_hash);

    Ok(floored_from)
}

pub struct MarketAggregateStore {
    tree: Tree,
}

impl MarketAggregateStore {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn apply_delta(
        markets: &TransactionalTree,
        market_id: u64,
        trade: &MarketTrade,
    ) -> TxResult<MarketDelta> {
        let key = keys::market_key(market_id);
        let mut aggregate = match markets.get(&key)? {
            Some(bytes) => tx_decode(&bytes)?,
            None => MarketAggregate::empty(market_id),
        };

        let floored_from =
            apply_trade(&mut aggregate, trade).map_err(ConflictableTransactionError::Abort)?;
        markets.insert(key, tx_encode(&aggregate)?)?;

        Ok(MarketDelta { aggregate, floored_from })
    }

    pub fn get(&self, market_id: u64) -> Result<Option<MarketAggregate>, PersistenceError> {
        match self.tree.get(keys::market_key(market_id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}
