// src/cli/mod.rs
//! Command-line definitions
//!
//! Subcommands share [`EngineArgs`] (which device, how to split the DAG) and
//! [`DatasetArgs`] (which epoch or explicit sizes), flattened into each.

/// Argument structs for every subcommand
pub mod commands;

pub use commands::{
    Action, BenchOptions, Commands, ConfigOptions, DatasetArgs, EngineArgs, EpochOptions,
    HashOptions, SearchOptions, TargetArgs, TraceOptions, VerifyOptions,
};
