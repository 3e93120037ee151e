use anyhow::{Context, Result};
use log::LevelFilter;
use log4rs::append::file::FileAppender;
use log4rs::{
    append::console::ConsoleAppender,
    config::{Appender, Config as LogConfig, Root},
    encode::pattern::PatternEncoder,
};

use crate::configure::AppConfig;

const LOG_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} [{l}] - {m}{n}";

pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info, // Default to Info
    }
}

pub fn setup_logger(config: &AppConfig) -> Result<()> {
    let log_level = parse_level(&config.log_level);

    // Create a stdout appender
    let stdout =
        ConsoleAppender::builder().encoder(Box::new(PatternEncoder::new(LOG_PATTERN))).build();

    let mut log_config_builder =
        LogConfig::builder().appender(Appender::builder().build("stdout", Box::new(stdout)));

    let mut root_builder = Root::builder().appender("stdout");

    // Conditionally add file appender
    if config.log_to_file {
        let file = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(LOG_PATTERN)))
            .build(&config.log_file)
            .with_context(|| format!("failed to open log file {}", config.log_file))?;

        log_config_builder =
            log_config_builder.appender(Appender::builder().build("file", Box::new(file)));

        root_builder = root_builder.appender("file");
    }

    let log_config = log_config_builder
        .build(root_builder.build(log_level))
        .context("invalid log4rs configuration")?;

    log4rs::init_config(log_config).context("logger already initialized")?;

    Ok(())
}
