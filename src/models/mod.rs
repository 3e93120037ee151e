pub use ledger_errors::*;
pub use records::*;
pub use trade_event::*;

pub mod ledger_errors;
pub mod records;
pub mod serde_utils;
pub mod trade_event;
