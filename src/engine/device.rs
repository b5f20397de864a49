// src/engine/device.rs
//! Compute device interface
//!
//! A backend turns a cache plus a [`PartitionLayout`] into a resident DAG and
//! runs the Hashimoto and filter kernels against it. Everything above this
//! seam (memory accounting, invalidation, persistence, verification) is
//! backend independent.

use crate::engine::partition::PartitionLayout;
use crate::ethash::{Cache, Node};
use crate::types::BackendKind;
use crate::utils::error::MinerError;
use serde::Serialize;
use std::sync::Arc;

/// What the engine needs to know about a device before allocating on it
#[derive(Debug, Clone, Serialize)]
pub struct DeviceCapabilities {
    /// Human readable device name
    pub name: String,
    /// Backend the device belongs to
    pub backend: BackendKind,
    /// Total memory usable for datasets, in bytes
    pub global_memory: u64,
    /// Largest single allocation, in bytes
    pub max_allocation: u64,
    /// Number of DAG buffers one kernel can bind
    pub max_buffers: usize,
    /// Parallel lanes (threads or compute units)
    pub compute_units: usize,
}

/// Compacted difficulty filter output
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Winners {
    /// Winning nonces in slot order (not batch order)
    pub nonces: Vec<u64>,
    /// Final value of the filter counter
    pub count: u32,
}

/// Result of one kernel dispatch over a batch of nonces
#[derive(Debug, Clone, Default)]
pub struct SearchOutput {
    /// One result hash per input nonce, in input order
    pub hashes: Vec<[u8; 32]>,
    /// Filter output when a threshold was supplied
    pub winners: Option<Winners>,
}

/// Fills one partition's words; used when restoring a persisted DAG
pub type PartitionFill<'a> = dyn FnMut(usize, &mut [u32]) -> Result<(), MinerError> + 'a;

/// A compute backend able to host DAGs
pub trait ComputeDevice: Send + Sync {
    /// Static description of the device
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Allocates the partitions and runs the DAG kernel over every item
    ///
    /// Returns only after every item has been written.
    fn build_dag(
        &self,
        cache: &Arc<Cache>,
        layout: &PartitionLayout,
    ) -> Result<Box<dyn DeviceDag>, MinerError>;

    /// Allocates the partitions and fills them from host memory
    ///
    /// `fill` is called once per partition, in order, with a zeroed staging
    /// slice of exactly that partition's words.
    fn upload_dag(
        &self,
        layout: &PartitionLayout,
        fill: &mut PartitionFill<'_>,
    ) -> Result<Box<dyn DeviceDag>, MinerError>;
}

/// A DAG resident on a device
pub trait DeviceDag: Send + Sync {
    /// Partitioning the DAG was built with
    fn layout(&self) -> &PartitionLayout;

    /// Runs Hashimoto for every nonce and, if given, the difficulty filter
    ///
    /// # Arguments
    /// * `header` - 32-byte header hash
    /// * `nonces` - Batch of candidate nonces (duplicates allowed)
    /// * `threshold` - Threshold words, least significant first
    fn search(
        &self,
        header: &[u8; 32],
        nonces: &[u64],
        threshold: Option<&[u32; 8]>,
    ) -> Result<SearchOutput, MinerError>;

    /// Reads one item back through the partition routing
    fn read_item(&self, index: u64) -> Result<Node, MinerError>;

    /// Copies one whole partition back to the host
    fn read_partition(&self, partition: usize) -> Result<Vec<u32>, MinerError>;
}
