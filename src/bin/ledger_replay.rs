use std::fs::File;
use std::io::{BufRead, BufReader};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use amm_ledger::configure::load_config;
use amm_ledger::logger;
use amm_ledger::{LedgerEngine, LedgerError, RawTradeEvent};
use clap::{Parser, Subcommand};
use dotenv::dotenv;
use ethers::types::{Address, H256};
use eyre::{eyre, Result, WrapErr};
use log::{info, warn};
use serde::Serialize;

const MAX_RETRIES: u32 = 3;
const INITIAL_RETRY_DELAY_MS: u64 = 50;

#[derive(Parser)]
#[clap(author, version, about = "Replay AMM trade events into the ledger and query it", long_about = None)]
struct Args {
    /// Overrides `db_path` from the configuration
    #[clap(long)]
    db_path: Option<String>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Process a JSON-lines file of raw trade events
    Ingest {
        #[clap(long)]
        file: String,
        #[clap(long, default_value_t = 4)]
        workers: usize,
    },
    Position {
        #[clap(long)]
        trader: String,
        #[clap(long)]
        market: u64,
    },
    Market {
        #[clap(long)]
        market: u64,
    },
    Trade {
        #[clap(long)]
        tx: String,
        #[clap(long)]
        log_index: u64,
    },
    History {
        #[clap(long)]
        market: u64,
    },
    Anomalies,
}

#[derive(Debug, Default, Serialize)]
struct IngestSummary {
    lines: u64,
    unparseable: u64,
    applied: u64,
    duplicates: u64,
    rejected: u64,
    failed: u64,
}

impl IngestSummary {
    fn merge(&mut self, other: IngestSummary) {
        self.lines += other.lines;
        self.unparseable += other.unparseable;
        self.applied += other.applied;
        self.duplicates += other.duplicates;
        self.rejected += other.rejected;
        self.failed += other.failed;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();

    let args = Args::parse();
    let config = load_config().wrap_err("failed to load configuration")?;
    logger::setup_logger(&config).map_err(|e| eyre!("failed to set up logger: {e:#}"))?;

    let db_path = args.db_path.unwrap_or_else(|| config.db_path.clone());
    let engine = Arc::new(
        LedgerEngine::open(&db_path, config.engine_config())
            .wrap_err_with(|| format!("failed to open ledger at {db_path}"))?,
    );
    info!("ledger opened at {db_path}");

    match args.command {
        Command::Ingest { file, workers } => {
            let summary = ingest(engine.clone(), &file, workers.max(1)).await?;
            engine.store().flush()?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            println!("{}", serde_json::to_string_pretty(&engine.stats())?);
        }
        Command::Position { trader, market } => {
            let trader = Address::from_str(&trader).map_err(|e| eyre!("bad trader address: {e}"))?;
            print_json(&engine.get_position(&trader, market)?)?;
        }
        Command::Market { market } => print_json(&engine.get_market_aggregate(market)?)?,
        Command::Trade { tx, log_index } => {
            let tx = H256::from_str(&tx).map_err(|e| eyre!("bad transaction hash: {e}"))?;
            print_json(&engine.get_trade_record(tx, log_index)?)?;
        }
        Command::History { market } => print_json(&engine.price_history(market)?)?,
        Command::Anomalies => print_json(&engine.anomalies()?)?,
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Shard events by market so each market's delivery order is preserved while
/// different markets are reconciled in parallel.
async fn ingest(engine: Arc<LedgerEngine>, path: &str, workers: usize) -> Result<IngestSummary> {
    let reader = BufReader::new(File::open(path).wrap_err_with(|| format!("cannot open {path}"))?);

    let mut summary = IngestSummary::default();
    let mut shards: Vec<Vec<(usize, RawTradeEvent)>> = vec![Vec::new(); workers];

    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;
        match serde_json::from_str::<RawTradeEvent>(&line) {
            Ok(raw) => {
                let shard = raw.market_id.rem_euclid(workers as i64) as usize;
                shards[shard].push((line_no + 1, raw));
            }
            Err(e) => {
                warn!("line {}: unparseable event: {}", line_no + 1, e);
                summary.unparseable += 1;
            }
        }
    }

    let handles: Vec<_> = shards
        .into_iter()
        .map(|events| {
            let engine = engine.clone();
            tokio::task::spawn_blocking(move || process_shard(&engine, events))
        })
        .collect();

    for handle in handles {
        summary.merge(handle.await?);
    }
    Ok(summary)
}

fn process_shard(engine: &LedgerEngine, events: Vec<(usize, RawTradeEvent)>) -> IngestSummary {
    let mut summary = IngestSummary::default();
    for (line_no, raw) in events {
        match process_with_retry(engine, &raw) {
            Ok(outcome) if outcome.is_duplicate() => summary.duplicates += 1,
            Ok(_) => summary.applied += 1,
            Err(LedgerError::InvalidEvent(e)) => {
                warn!("line {line_no}: dead-lettered: {e}");
                summary.rejected += 1;
            }
            Err(e) => {
                warn!("line {line_no}: giving up [{}]: {e}", e.error_code());
                summary.failed += 1;
            }
        }
    }
    summary
}

/// Retry retryable failures with exponential backoff. Safe because
/// reconciliation is idempotent.
fn process_with_retry(
    engine: &LedgerEngine,
    raw: &RawTradeEvent,
) -> std::result::Result<amm_ledger::ProcessingOutcome, LedgerError> {
    let mut attempt = 0;
    let mut delay = INITIAL_RETRY_DELAY_MS;
    loop {
        attempt += 1;
        match engine.process_raw(raw) {
            Err(e) if e.is_retryable() && attempt <= MAX_RETRIES => {
                std::thread::sleep(Duration::from_millis(delay));
                delay *= 2;
            }
            result => return result,
        }
    }
}
