use std::time::Duration;

use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: String,
    pub db_path: String,
    pub lock_timeout_ms: u64,
    pub lock_stripes: usize,
    pub flush_on_commit: bool,
}

impl AppConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            lock_timeout: Duration::from_millis(self.lock_timeout_ms),
            lock_stripes: self.lock_stripes.max(1),
            flush_on_commit: self.flush_on_commit,
        }
    }
}

/// Knobs the reconciliation engine reads at construction time.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on waiting for a per-key lock before giving up with `Busy`.
    pub lock_timeout: Duration,
    pub lock_stripes: usize,
    /// Flush sled to disk after every committed event.
    pub flush_on_commit: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self { lock_timeout: Duration::from_millis(2_000), lock_stripes: 1024, flush_on_commit: false }
    }
}

pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from("config/ledger")
}

pub fn load_config_from(file_stem: &str) -> Result<AppConfig, ConfigError> {
    let s = Config::builder()
        // Set defaults
        .set_default("log_level", "info")?
        .set_default("log_to_file", false)?
        .set_default("log_file", "log/amm_ledger.log")?
        .set_default("db_path", "data/ledger")?
        .set_default("lock_timeout_ms", 2_000)?
        .set_default("lock_stripes", 1024)?
        .set_default("flush_on_commit", false)?
        // Add configuration from a file, if present
        .add_source(File::with_name(file_stem).required(false))
        // Add configuration from environment variables
        .add_source(config::Environment::with_prefix("APP"))
        .build()?;

    s.try_deserialize()
}
