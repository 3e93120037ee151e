// Error types for trade-event reconciliation
use std::fmt;

/// A trade event that cannot be reconciled because a field is malformed.
/// Never persisted; callers should drop or dead-letter the event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidEventError {
    pub field: &'static str,
    pub reason: String,
}

impl InvalidEventError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self { field, reason: reason.into() }
    }
}

impl fmt::Display for InvalidEventError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid event field {}: {}", self.field, self.reason)
    }
}

impl std::error::Error for InvalidEventError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// Per-key lock not acquired within the configured wait
    Busy { key: String },
    /// Underlying store failure (I/O, sled internals)
    Storage(String),
    /// A stored value could not be decoded
    Corrupt(String),
    /// Applying the event would push a running total past `U256::MAX`
    Overflow { field: &'static str, market_id: u64 },
    /// Deliberate failure raised by a test fail point
    Injected(&'static str),
}

impl PersistenceError {
    /// Retrying is always safe since reconciliation is idempotent, but only
    /// these variants have a chance of succeeding on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Busy { .. } | Self::Storage(_))
    }
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Busy { key } => write!(f, "Ledger busy: lock on {} not acquired in time", key),
            Self::Storage(msg) => write!(f, "Storage error: {}", msg),
            Self::Corrupt(msg) => write!(f, "Corrupt ledger record: {}", msg),
            Self::Overflow { field, market_id } => {
                write!(f, "Amount overflow on {} in market {}", field, market_id)
            }
            Self::Injected(point) => write!(f, "Injected failure at {}", point),
        }
    }
}

impl std::error::Error for PersistenceError {}

impl From<sled::Error> for PersistenceError {
    fn from(err: sled::Error) -> Self {
        PersistenceError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        PersistenceError::Corrupt(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    InvalidEvent(InvalidEventError),
    Persistence(PersistenceError),
}

impl fmt::Display for LedgerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidEvent(e) => write!(f, "{}", e),
            Self::Persistence(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidEvent(e) => Some(e),
            Self::Persistence(e) => Some(e),
        }
    }
}

impl From<InvalidEventError> for LedgerError {
    fn from(err: InvalidEventError) -> Self {
        LedgerError::InvalidEvent(err)
    }
}

impl From<PersistenceError> for LedgerError {
    fn from(err: PersistenceError) -> Self {
        LedgerError::Persistence(err)
    }
}

// Error code mapping for dead-letter queues and logs
impl LedgerError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidEvent(_) => "INVALID_EVENT",
            Self::Persistence(PersistenceError::Busy { .. }) => "LEDGER_BUSY",
            Self::Persistence(PersistenceError::Storage(_)) => "STORAGE_ERROR",
            Self::Persistence(PersistenceError::Corrupt(_)) => "CORRUPT_RECORD",
            Self::Persistence(PersistenceError::Overflow { .. }) => "AMOUNT_OVERFLOW",
            Self::Persistence(PersistenceError::Injected(_)) => "INJECTED_FAILURE",
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidEvent(_) => false,
            Self::Persistence(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let invalid: LedgerError = InvalidEventError::new("trader", "not an address").into();
        assert_eq!(invalid.error_code(), "INVALID_EVENT");
        assert!(!invalid.is_retryable());
        assert_eq!(invalid.to_string(), "Invalid event field trader: not an address");

        let busy: LedgerError = PersistenceError::Busy { key: "market:7".into() }.into();
        assert_eq!(busy.error_code(), "LEDGER_BUSY");
        assert!(busy.is_retryable());
    }

    #[test]
    fn test_corrupt_is_not_retryable() {
        let err = PersistenceError::Corrupt("bad json".into());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_overflow_is_not_retryable() {
        let err: LedgerError = PersistenceError::Overflow { field: "yes_shares", market_id: 7 }.into();
        assert_eq!(err.error_code(), "AMOUNT_OVERFLOW");
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "Amount overflow on yes_shares in market 7");
    }
}
