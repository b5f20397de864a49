// src/stats/mod.rs
//! Statistics collection and reporting module
//!
//! This module provides functionality for tracking and reporting search
//! statistics, including:
//! - Hashrate calculations
//! - Winner counts
//! - Hardware monitoring (CPU, memory, temperature)
//!
//! The main component is [`StatsReporter`] which collects data and can periodically
//! report statistics to logs.
//!

/// Submodule containing the statistics reporter implementation
///
/// The reporter handles:
/// - Atomic collection of search statistics
/// - Hardware monitoring
/// - Periodic reporting of stats
/// - Thread-safe communication channels for receiving data
pub mod reporter;

// Re-export main components
pub use reporter::{HardwareStats, SearchStats, StatsReporter};
