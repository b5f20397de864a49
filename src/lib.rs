// src/lib.rs
//! Ethash GPU - data-parallel Ethash/Hashimoto compute engine in Rust
//!
//! This crate evaluates the Ethash proof-of-work function as flat grids of
//! independent tasks, with:
//! - Bit-exact host reference algorithms (Keccak, cache, DAG items, Hashimoto)
//! - A DAG split across several device buffers when one allocation cannot hold it
//! - A rayon host backend and an optional OpenCL backend (`opencl` feature)
//! - On-device difficulty filtering with atomic compaction
//! - Cross-validation of device output against the host reference

#![warn(missing_docs)]
#![cfg_attr(not(feature = "opencl"), forbid(unsafe_code))]
#![cfg_attr(feature = "opencl", deny(unsafe_code))]

/// Reference Ethash algorithms
pub mod ethash;

/// Compute engine, devices and dataset handles
pub mod engine;

/// Nonce search scheduling on top of the engine
pub mod miner;

/// Statistics collection and reporting functionality
pub mod stats;

/// Utility functions and error handling
pub mod utils;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Shared type definitions
pub mod types;

// Core exports
pub use cli::Commands;
pub use config::Config;
pub use engine::{BatchResult, DatasetHandle, Engine, EngineOptions, VerifyReport, Winners};
pub use ethash::{DatasetParams, HashimotoTrace, Threshold};
pub use miner::{Scheduler, SearchJob, Share};
pub use stats::{HardwareStats, SearchStats, StatsReporter};
pub use types::{BackendKind, CacheRecipe};
pub use utils::{MinerError, init_logging};
