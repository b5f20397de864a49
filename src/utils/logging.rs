// src/utils/logging.rs
//! Logging configuration and utilities
//!
//! This module handles logging setup for the engine front end, including:
//! - Standard logging configuration
//! - Benchmark-specific logging
//! - Custom log formatting
//!
//! Uses `env_logger` under the hood with custom formatting and filtering.

use env_logger::{Builder, Target};
use log::LevelFilter;
use std::env;

/// Initializes the logging subsystem with sensible defaults
///
/// # Configuration
/// - Logs to stdout
/// - Default log level: Info
/// - Custom timestamp and source location formatting
/// - Respects `RUST_LOG` environment variable if set
pub fn init_logging() {
    let mut builder = common_log_config();
    builder.filter_level(LevelFilter::Info);
    if let Ok(spec) = env::var("RUST_LOG") {
        builder.parse_filters(&spec);
    }
    // A second init (tests, embedding) keeps the first logger.
    let _ = builder.try_init();
}

/// Configures benchmark-specific logging
///
/// # Differences from Standard Logging
/// - Default log level: Debug (if RUST_LOG not set)
/// - Shows per-batch dispatch timings from the engine
/// - Same custom formatting as standard logging
pub fn init_bench_logging() {
    let mut builder = common_log_config();

    // Set default to debug level if RUST_LOG not configured
    if env::var("RUST_LOG").is_err() {
        builder.filter_level(LevelFilter::Debug);
    } else {
        builder.parse_env("RUST_LOG");
    }

    let _ = builder.try_init();
}

/// Creates and configures a base logger builder with common settings
///
/// # Features
/// - Custom log format including:
///   - Timestamp (seconds since epoch)
///   - Log level
///   - Module path
///   - Line number
///   - Message
/// - Output to stdout
///
/// # Returns
/// Partially configured `env_logger::Builder` instance
fn common_log_config() -> Builder {
    let mut builder = Builder::new();

    builder
        .format(|buf, record| {
            use std::io::Write;
            let ts = buf.timestamp_seconds();
            let level = record.level();
            let module = record.module_path().unwrap_or_default();
            let line = record.line().unwrap_or(0);

            writeln!(
                buf,
                "[{} {} {}:{}] {}",
                ts,
                level,
                module,
                line,
                record.args()
            )
        })
        .target(Target::Stdout);

    builder
}
