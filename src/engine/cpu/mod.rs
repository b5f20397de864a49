// src/engine/cpu/mod.rs
//! Host compute backend
//!
//! A dedicated rayon pool plays the role of the device grid and plain host
//! vectors play the role of device buffers. The allocation ceiling defaults to
//! a quarter of physical memory, mirroring the minimum OpenCL guarantees for
//! `CL_DEVICE_MAX_MEM_ALLOC_SIZE`, so the partitioned path is exercised the
//! same way it is on a GPU.

/// Kernel bodies run on the pool
pub mod kernels;

use crate::engine::device::{
    ComputeDevice, DeviceCapabilities, DeviceDag, PartitionFill, SearchOutput,
};
use crate::engine::partition::PartitionLayout;
use crate::ethash::{Cache, NODE_WORDS, Node};
use crate::types::BackendKind;
use crate::utils::error::MinerError;
use kernels::{PartitionedDag, dag_kernel, filter_kernel, hashimoto_kernel};
use log::info;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use std::time::Instant;
use sysinfo::System;

/// Buffers one host "kernel" may bind
pub const CPU_MAX_BUFFERS: usize = 64;

/// Rayon-backed compute device
pub struct CpuDevice {
    pool: Arc<ThreadPool>,
    capabilities: DeviceCapabilities,
}

impl CpuDevice {
    /// Creates a host device
    ///
    /// # Arguments
    /// * `threads` - Grid width (0 = one per logical CPU)
    /// * `max_allocation` - Optional override of the per-buffer ceiling
    pub fn new(threads: usize, max_allocation: Option<u64>) -> Result<Self, MinerError> {
        let threads = if threads == 0 { num_cpus::get() } else { threads };

        let mut system = System::new();
        system.refresh_memory();
        let global_memory = system.total_memory();
        let max_allocation = max_allocation.unwrap_or(global_memory / 4);

        Self::with_capabilities(DeviceCapabilities {
            name: format!("host ({} threads)", threads),
            backend: BackendKind::Cpu,
            global_memory,
            max_allocation,
            max_buffers: CPU_MAX_BUFFERS,
            compute_units: threads,
        })
    }

    /// Creates a host device with explicit limits
    ///
    /// Used to emulate small devices, e.g. to force several partitions or
    /// to exhaust device memory in tests.
    pub fn with_capabilities(capabilities: DeviceCapabilities) -> Result<Self, MinerError> {
        if capabilities.max_allocation == 0 || capabilities.max_buffers == 0 {
            return Err(MinerError::UnsupportedDevice(
                "allocation ceiling and buffer limit must be non-zero".to_string(),
            ));
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(capabilities.compute_units)
            .thread_name(|i| format!("ethash-grid-{}", i))
            .build()
            .map_err(|e| MinerError::UnsupportedDevice(format!("thread pool: {}", e)))?;

        Ok(CpuDevice {
            pool: Arc::new(pool),
            capabilities,
        })
    }

    fn allocate(layout: &PartitionLayout) -> Result<Vec<Vec<u32>>, MinerError> {
        let mut partitions = Vec::new();
        partitions.try_reserve_exact(layout.partitions())?;
        for p in 0..layout.partitions() {
            let words = layout.partition_items(p) as usize * NODE_WORDS;
            let mut buffer: Vec<u32> = Vec::new();
            buffer.try_reserve_exact(words)?;
            buffer.resize(words, 0);
            partitions.push(buffer);
        }
        Ok(partitions)
    }
}

impl ComputeDevice for CpuDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn build_dag(
        &self,
        cache: &Arc<Cache>,
        layout: &PartitionLayout,
    ) -> Result<Box<dyn DeviceDag>, MinerError> {
        let mut partitions = Self::allocate(layout)?;
        let started = Instant::now();
        self.pool
            .install(|| dag_kernel(cache, layout, &mut partitions));
        info!(
            "Generated {} DAG items on {} in {:.2?}",
            layout.total_items(),
            self.capabilities.name,
            started.elapsed()
        );

        Ok(Box::new(CpuDag {
            pool: self.pool.clone(),
            layout: *layout,
            partitions,
        }))
    }

    fn upload_dag(
        &self,
        layout: &PartitionLayout,
        fill: &mut PartitionFill<'_>,
    ) -> Result<Box<dyn DeviceDag>, MinerError> {
        let mut partitions = Self::allocate(layout)?;
        for (p, words) in partitions.iter_mut().enumerate() {
            fill(p, words)?;
        }
        Ok(Box::new(CpuDag {
            pool: self.pool.clone(),
            layout: *layout,
            partitions,
        }))
    }
}

/// DAG resident in host partitions
struct CpuDag {
    pool: Arc<ThreadPool>,
    layout: PartitionLayout,
    partitions: Vec<Vec<u32>>,
}

impl DeviceDag for CpuDag {
    fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    fn search(
        &self,
        header: &[u8; 32],
        nonces: &[u64],
        threshold: Option<&[u32; 8]>,
    ) -> Result<SearchOutput, MinerError> {
        let view = PartitionedDag::new(&self.layout, &self.partitions);
        Ok(self.pool.install(|| {
            let hashes = hashimoto_kernel(&view, header, nonces);
            let winners = threshold.map(|t| filter_kernel(&hashes, nonces, t));
            SearchOutput { hashes, winners }
        }))
    }

    fn read_item(&self, index: u64) -> Result<Node, MinerError> {
        if index >= self.layout.total_items() {
            return Err(MinerError::InputError(format!(
                "item {} outside a {} item DAG",
                index,
                self.layout.total_items()
            )));
        }
        Ok(PartitionedDag::new(&self.layout, &self.partitions).load(index as u32))
    }

    fn read_partition(&self, partition: usize) -> Result<Vec<u32>, MinerError> {
        let source = self.partitions.get(partition).ok_or_else(|| {
            MinerError::InputError(format!("no partition {}", partition))
        })?;
        let mut copy = Vec::new();
        copy.try_reserve_exact(source.len())?;
        copy.extend_from_slice(source);
        Ok(copy)
    }
}
