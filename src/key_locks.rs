//! Striped single-writer locks per market.
//!
//! A position key is always (trader, market), so holding the market's stripe
//! serializes every position and aggregate an event touches. sled's
//! optimistic transactions already prevent lost updates; the lock adds the
//! bounded wait: an event that cannot get its market within the timeout
//! fails with `PersistenceError::Busy` instead of spinning on conflicts.

use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::models::PersistenceError;

pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
    timeout: Duration,
}

/// Held stripe; released on drop.
pub struct KeyGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

impl KeyLocks {
    pub fn new(stripes: usize, timeout: Duration) -> Self {
        let stripes = (0..stripes.max(1)).map(|_| Mutex::new(())).collect();
        Self { stripes, timeout }
    }

    fn stripe_of(&self, market_id: u64) -> usize {
        (market_id % self.stripes.len() as u64) as usize
    }

    /// Lock the stripe covering `market_id`, waiting at most the configured timeout.
    pub fn acquire(&self, market_id: u64) -> Result<KeyGuard<'_>, PersistenceError> {
        match self.stripes[self.stripe_of(market_id)].try_lock_for(self.timeout) {
            Some(guard) => Ok(KeyGuard { _guard: guard }),
            None => Err(PersistenceError::Busy { key: format!("market:{}", market_id) }),
        }
    }
}
