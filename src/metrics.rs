//! Counters for the reconciliation engine.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Default)]
pub struct EngineStats {
    pub applied: AtomicU64,
    pub duplicates: AtomicU64,
    pub invalid: AtomicU64,
    pub busy: AtomicU64,
    pub storage_failures: AtomicU64,
    pub anomalies: AtomicU64,
}

/// Plain copy of the counters at one point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub applied: u64,
    pub duplicates: u64,
    pub invalid: u64,
    pub busy: u64,
    pub storage_failures: u64,
    pub anomalies: u64,
}

impl StatsSnapshot {
    pub fn processed(&self) -> u64 {
        self.applied + self.duplicates
    }
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_applied(&self, anomalies: usize) {
        self.applied.fetch_add(1, Ordering::Relaxed);
        self.anomalies.fetch_add(anomalies as u64, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.duplicates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid(&self) {
        self.invalid.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_busy(&self) {
        self.busy.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_storage_failure(&self) {
        self.storage_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            applied: self.applied.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            busy: self.busy.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
        }
    }
}
