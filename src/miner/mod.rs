// src/miner/mod.rs
//! Nonce search on top of the engine
//!
//! The engine evaluates one batch at a time; this module turns a header and
//! threshold into a stream of batches and collects winning shares.

/// Search job scheduler
///
/// Hands nonce ranges of the current job to the engine and forwards
/// winners over a channel.
pub mod scheduler;

// Re-export main components for cleaner imports
pub use self::scheduler::{Scheduler, SearchJob, Share};
