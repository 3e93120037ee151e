//! Per-(trader, market) holdings and cost basis.

use ethers::types::{Address, U256};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use sled::Tree;

use super::{decode, keys, scan_prefix, tx_decode, tx_encode, TxResult};
use crate::models::{PersistenceError, Position, Side};

/// Result of applying one trade to a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionDelta {
    pub position: Position,
    /// Balance held before a sell that asked for more than that; the new
    /// balance was floored at zero.
    pub floored_from: Option<U256>,
}

/// Apply the delta rule in place.
///
/// Buy: traded-side shares += amount, invested += cost.
/// Sell: traded-side shares -= amount floored at zero, invested untouched.
///
/// A buy that would overflow leaves `position` unchanged and fails.
pub fn apply_trade(
    position: &mut Position,
    is_yes: bool,
    side: Side,
    shares_amount: U256,
    cost_amount: U256,
) -> Result<Option<U256>, PersistenceError> {
    let market_id = position.market_id;
    let (balance, field) = if is_yes {
        (&mut position.yes_shares, "yes_shares")
    } else {
        (&mut position.no_shares, "no_shares")
    };
    match side {
        Side::Buy => {
            let shares = balance
                .checked_add(shares_amount)
                .ok_or(PersistenceError::Overflow { field, market_id })?;
            let invested = position
                .total_invested
                .checked_add(cost_amount)
                .ok_or(PersistenceError::Overflow { field: "total_invested", market_id })?;
            *balance = shares;
            position.total_invested = invested;
            Ok(None)
        }
        Side::Sell => {
            let before = *balance;
            *balance = before.saturating_sub(shares_amount);
            Ok((shares_amount > before).then_some(before))
        }
    }
}

pub struct PositionLedger {
    tree: Tree,
}

impl PositionLedger {
    pub fn new(tree: Tree) -> Self {
        Self { tree }
    }

    pub(crate) fn tree(&self) -> &Tree {
        &self.tree
    }

    /// Read-modify-write of one position inside the caller's unit of work.
    /// A missing position starts from all zeros.
    pub fn apply_delta(
        positions: &TransactionalTree,
        trader: &Address,
        market_id: u64,
        is_yes: bool,
        side: Side,
        shares_amount: U256,
        cost_amount: U256,
    ) -> TxResult<PositionDelta> {
        let key = keys::position_key(trader, market_id);
        let mut position = match positions.get(&key)? {
            Some(bytes) => tx_decode(&bytes)?,
            None => Position::empty(*trader, market_id),
        };

        let floored_from = apply_trade(&mut position, is_yes, side, shares_amount, cost_amount)
            .map_err(ConflictableTransactionError::Abort)?;
        positions.insert(key, tx_encode(&position)?)?;

        Ok(PositionDelta { position, floored_from })
    }

    pub fn get(&self, trader: &Address, market_id: u64) -> Result<Option<Position>, PersistenceError> {
        match self.tree.get(keys::position_key(trader, market_id))? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every position ever opened in `market_id`, including emptied ones.
    pub fn for_market(&self, market_id: u64) -> Result<Vec<Position>, PersistenceError> {
        scan_prefix(&self.tree, &keys::market_key(market_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(n: u64) -> U256 {
        U256::from(n) * U256::exp10(18)
    }

    #[test]
    fn test_buy_adds_shares_and_invested() {
        let mut p = Position::empty(Address::repeat_byte(1), 7);
        let floored = apply_trade(&mut p, true, Side::Buy, units(2), units(1)).unwrap();
        assert_eq!(floored, None);
        assert_eq!(p.yes_shares, units(2));
        assert_eq!(p.no_shares, U256::zero());
        assert_eq!(p.total_invested, units(1));
    }

    #[test]
    fn test_sell_keeps_invested() {
        let mut p = Position::empty(Address::repeat_byte(1), 7);
        apply_trade(&mut p, false, Side::Buy, units(5), units(2)).unwrap();
        let floored = apply_trade(&mut p, false, Side::Sell, units(3), units(4)).unwrap();
        assert_eq!(floored, None);
        assert_eq!(p.no_shares, units(2));
        assert_eq!(p.total_invested, units(2));
    }

    #[test]
    fn test_sell_floors_at_zero() {
        let mut p = Position::empty(Address::repeat_byte(1), 7);
        apply_trade(&mut p, true, Side::Buy, units(1), units(1)).unwrap();
        let floored = apply_trade(&mut p, true, Side::Sell, units(3), units(1)).unwrap();
        assert_eq!(floored, Some(units(1)));
        assert_eq!(p.yes_shares, U256::zero());
    }

    #[test]
    fn test_exact_sell_is_not_an_anomaly() {
        let mut p = Position::empty(Address::repeat_byte(1), 7);
        apply_trade(&mut p, true, Side::Buy, units(2), units(1)).unwrap();
        assert_eq!(apply_trade(&mut p, true, Side::Sell, units(2), units(1)).unwrap(), None);
        assert!(p.yes_shares.is_zero());
    }

    #[test]
    fn test_buy_overflow_leaves_position_untouched() {
        let mut p = Position::empty(Address::repeat_byte(1), 7);
        apply_trade(&mut p, true, Side::Buy, U256::MAX - U256::one(), units(1)).unwrap();
        let err = apply_trade(&mut p, true, Side::Buy, U256::from(2u64), units(1)).unwrap_err();
        assert_eq!(err, PersistenceError::Overflow { field: "yes_shares", market_id: 7 });
        assert_eq!(p.yes_shares, U256::MAX - U256::one());
        assert_eq!(p.total_invested, units(1));

        let mut q = Position::empty(Address::repeat_byte(1), 7);
        apply_trade(&mut q, false, Side::Buy, units(1), U256::MAX).unwrap();
        let err = apply_trade(&mut q, false, Side::Buy, units(1), U256::one()).unwrap_err();
        assert_eq!(err, PersistenceError::Overflow { field: "total_invested", market_id: 7 });
        assert_eq!(q.no_shares, units(1));
    }

    #[test]
    fn test_for_market_scans_only_that_market() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let ledger = PositionLedger::new(db.open_tree("positions").unwrap());
        for (trader, market) in [(1u8, 7u64), (2, 7), (1, 8)] {
            ledger
                .tree()
                .transaction(|tx| {
                    PositionLedger::apply_delta(
                        tx,
                        &Address::repeat_byte(trader),
                        market,
                        true,
                        Side::Buy,
                        units(1),
                        units(1),
                    )
                })
                .unwrap();
        }
        assert_eq!(ledger.for_market(7).unwrap().len(), 2);
        assert_eq!(ledger.for_market(8).unwrap().len(), 1);
        assert!(ledger.get(&Address::repeat_byte(2), 8).unwrap().is_none());
    }
}
