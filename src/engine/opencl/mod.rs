// src/engine/opencl/mod.rs
//! OpenCL compute backend
//!
//! DAG partitions are separate device buffers; the program is compiled once
//! per partition count and cached. All dispatches go through one in-order
//! queue, and every public operation ends with `queue.finish()`.
#![allow(unsafe_code)]

/// Generated program source
pub mod kernels;

/// Platform/device discovery
pub mod platform;

use crate::config::OpenClConfig;
use crate::engine::device::{
    ComputeDevice, DeviceCapabilities, DeviceDag, PartitionFill, SearchOutput, Winners,
};
use crate::engine::partition::PartitionLayout;
use crate::ethash::{Cache, NODE_WORDS, Node};
use crate::utils::error::MinerError;
use kernels::{DAG_KERNEL, FILTER_KERNEL, HASH_KERNEL, program_source};
use log::{debug, info};
use ocl::flags::MemFlags;
use ocl::{Buffer, Kernel, Program, Queue};
use platform::ClContext;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// DAG items generated per dispatch, keeping each launch short
const DAG_ITEMS_PER_DISPATCH: u32 = 1 << 18;

fn round_up(n: usize, multiple: Option<usize>) -> usize {
    match multiple {
        Some(m) if m > 0 => n.div_ceil(m) * m,
        _ => n,
    }
}

/// OpenCL compute device
pub struct OpenClDevice {
    cl: Arc<ClContext>,
    capabilities: DeviceCapabilities,
    work_group_size: Option<usize>,
    programs: Mutex<HashMap<usize, Program>>,
}

impl OpenClDevice {
    /// Opens the device selected by `config`
    pub fn select(config: &OpenClConfig, max_allocation: Option<u64>) -> Result<Self, MinerError> {
        let (cl, capabilities) = platform::select(config, max_allocation)?;
        Ok(OpenClDevice {
            cl: Arc::new(cl),
            capabilities,
            work_group_size: config.work_group_size,
            programs: Mutex::new(HashMap::new()),
        })
    }

    fn program(&self, partitions: usize) -> Result<Program, MinerError> {
        let mut programs = self
            .programs
            .lock()
            .map_err(|_| MinerError::DeviceError("program cache poisoned".to_string()))?;
        if let Some(program) = programs.get(&partitions) {
            return Ok(program.clone());
        }
        let started = Instant::now();
        let program = Program::builder()
            .devices(self.cl.device)
            .src(program_source(partitions))
            .build(&self.cl.context)
            .map_err(|e| MinerError::UnsupportedDevice(format!("compiling kernels: {}", e)))?;
        debug!(
            "Compiled Ethash program for {} partition(s) in {:.2?}",
            partitions,
            started.elapsed()
        );
        programs.insert(partitions, program.clone());
        Ok(program)
    }

    fn allocate(&self, layout: &PartitionLayout) -> Result<Vec<Buffer<u32>>, MinerError> {
        (0..layout.partitions())
            .map(|p| {
                Buffer::<u32>::builder()
                    .queue(self.cl.queue.clone())
                    .flags(MemFlags::new().read_write())
                    .len(layout.partition_items(p) as usize * NODE_WORDS)
                    .build()
                    .map_err(|e| {
                        MinerError::AllocationError(format!(
                            "partition {} ({} bytes): {}",
                            p,
                            layout.partition_bytes(p),
                            e
                        ))
                    })
            })
            .collect()
    }

    fn dag(
        &self,
        layout: &PartitionLayout,
        program: Program,
        partitions: Vec<Buffer<u32>>,
    ) -> Box<dyn DeviceDag> {
        Box::new(OpenClDag {
            queue: self.cl.queue.clone(),
            program,
            layout: *layout,
            partitions,
            work_group_size: self.work_group_size,
        })
    }
}

impl ComputeDevice for OpenClDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn build_dag(
        &self,
        cache: &Arc<Cache>,
        layout: &PartitionLayout,
    ) -> Result<Box<dyn DeviceDag>, MinerError> {
        let program = self.program(layout.partitions())?;
        let partitions = self.allocate(layout)?;
        let queue = &self.cl.queue;

        let cache_words: Vec<u32> = cache.items().iter().flat_map(|n| n.iter().copied()).collect();
        let cache_buffer = Buffer::<u32>::builder()
            .queue(queue.clone())
            .flags(MemFlags::new().read_only())
            .len(cache_words.len())
            .copy_host_slice(&cache_words)
            .build()
            .map_err(|e| MinerError::AllocationError(format!("cache buffer: {}", e)))?;

        let total = layout.total_items() as u32;
        let chunk = round_up(DAG_ITEMS_PER_DISPATCH as usize, self.work_group_size);
        let mut builder = Kernel::builder();
        builder
            .program(&program)
            .name(DAG_KERNEL)
            .queue(queue.clone())
            .global_work_size(chunk)
            .arg(&cache_buffer)
            .arg(cache.len() as u32)
            .arg(layout.items_per_partition() as u32)
            .arg_named("start", 0u32)
            .arg(total);
        for buffer in &partitions {
            builder.arg(buffer);
        }
        if let Some(wgs) = self.work_group_size {
            builder.local_work_size(wgs);
        }
        let kernel = builder.build()?;

        let started = Instant::now();
        let mut start = 0u32;
        while start < total {
            kernel.set_arg("start", start)?;
            unsafe {
                kernel.enq()?;
            }
            start = start.saturating_add(DAG_ITEMS_PER_DISPATCH);
        }
        queue.finish()?;
        info!(
            "Generated {} DAG items on {} in {:.2?}",
            total,
            self.capabilities.name,
            started.elapsed()
        );

        Ok(self.dag(layout, program, partitions))
    }

    fn upload_dag(
        &self,
        layout: &PartitionLayout,
        fill: &mut PartitionFill<'_>,
    ) -> Result<Box<dyn DeviceDag>, MinerError> {
        let program = self.program(layout.partitions())?;
        let partitions = self.allocate(layout)?;
        for (p, buffer) in partitions.iter().enumerate() {
            let mut staging = vec![0u32; buffer.len()];
            fill(p, &mut staging)?;
            buffer.write(&staging).enq()?;
        }
        self.cl.queue.finish()?;
        Ok(self.dag(layout, program, partitions))
    }
}

/// DAG resident in OpenCL buffers
struct OpenClDag {
    queue: Queue,
    program: Program,
    layout: PartitionLayout,
    partitions: Vec<Buffer<u32>>,
    work_group_size: Option<usize>,
}

impl OpenClDag {
    fn kernel(&self, name: &str, global: usize) -> ocl::builders::KernelBuilder<'_> {
        let mut builder = Kernel::builder();
        builder
            .program(&self.program)
            .name(name)
            .queue(self.queue.clone())
            .global_work_size(round_up(global, self.work_group_size));
        if let Some(wgs) = self.work_group_size {
            builder.local_work_size(wgs);
        }
        builder
    }
}

impl DeviceDag for OpenClDag {
    fn layout(&self) -> &PartitionLayout {
        &self.layout
    }

    fn search(
        &self,
        header: &[u8; 32],
        nonces: &[u64],
        threshold: Option<&[u32; 8]>,
    ) -> Result<SearchOutput, MinerError> {
        let count = nonces.len();
        if count == 0 {
            return Ok(SearchOutput {
                hashes: Vec::new(),
                winners: threshold.map(|_| Winners::default()),
            });
        }
        let header_words: Vec<u32> = header
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let header_buffer = Buffer::<u32>::builder()
            .queue(self.queue.clone())
            .flags(MemFlags::new().read_only())
            .len(8)
            .copy_host_slice(&header_words)
            .build()?;
        let nonce_buffer = Buffer::<u64>::builder()
            .queue(self.queue.clone())
            .flags(MemFlags::new().read_only())
            .len(count)
            .copy_host_slice(nonces)
            .build()?;
        let hash_buffer = Buffer::<u32>::builder()
            .queue(self.queue.clone())
            .flags(MemFlags::new().read_write())
            .len(count * 8)
            .build()?;

        let mut builder = self.kernel(HASH_KERNEL, count);
        builder
            .arg(&header_buffer)
            .arg(&nonce_buffer)
            .arg(count as u32)
            .arg(self.layout.total_items() as u32)
            .arg(self.layout.items_per_partition() as u32)
            .arg(&hash_buffer);
        for buffer in &self.partitions {
            builder.arg(buffer);
        }
        let hash_kernel = builder.build()?;
        unsafe {
            hash_kernel.enq()?;
        }

        let winners = match threshold {
            Some(words) => {
                let threshold_buffer = Buffer::<u32>::builder()
                    .queue(self.queue.clone())
                    .flags(MemFlags::new().read_only())
                    .len(8)
                    .copy_host_slice(&words[..])
                    .build()?;
                let counter = Buffer::<u32>::builder()
                    .queue(self.queue.clone())
                    .flags(MemFlags::new().read_write())
                    .len(1)
                    .copy_host_slice(&[0u32])
                    .build()?;
                let slots = Buffer::<u64>::builder()
                    .queue(self.queue.clone())
                    .flags(MemFlags::new().write_only())
                    .len(count)
                    .build()?;

                let filter_kernel = self
                    .kernel(FILTER_KERNEL, count)
                    .arg(&hash_buffer)
                    .arg(&nonce_buffer)
                    .arg(count as u32)
                    .arg(&threshold_buffer)
                    .arg(&counter)
                    .arg(&slots)
                    .build()?;
                unsafe {
                    filter_kernel.enq()?;
                }

                let mut found = vec![0u32; 1];
                counter.read(&mut found).enq()?;
                let found = found[0];
                let mut nonces = vec![0u64; found as usize];
                if found > 0 {
                    slots.cmd().read(&mut nonces).enq()?;
                }
                Some(Winners {
                    nonces,
                    count: found,
                })
            }
            None => None,
        };

        let mut words = vec![0u32; count * 8];
        hash_buffer.read(&mut words).enq()?;
        self.queue.finish()?;

        let hashes = words
            .chunks_exact(8)
            .map(|chunk| {
                let mut hash = [0u8; 32];
                for (out, word) in hash.chunks_exact_mut(4).zip(chunk.iter()) {
                    out.copy_from_slice(&word.to_le_bytes());
                }
                hash
            })
            .collect();
        Ok(SearchOutput { hashes, winners })
    }

    fn read_item(&self, index: u64) -> Result<Node, MinerError> {
        if index >= self.layout.total_items() {
            return Err(MinerError::InputError(format!(
                "item {} outside a {} item DAG",
                index,
                self.layout.total_items()
            )));
        }
        let (partition, local) = self.layout.route(index);
        let mut words = vec![0u32; NODE_WORDS];
        self.partitions[partition]
            .cmd()
            .offset(local as usize * NODE_WORDS)
            .read(&mut words)
            .enq()?;
        let mut node = [0u32; NODE_WORDS];
        node.copy_from_slice(&words);
        Ok(node)
    }

    fn read_partition(&self, partition: usize) -> Result<Vec<u32>, MinerError> {
        let buffer = self.partitions.get(partition).ok_or_else(|| {
            MinerError::InputError(format!("no partition {}", partition))
        })?;
        let mut words = vec![0u32; buffer.len()];
        buffer.read(&mut words).enq()?;
        Ok(words)
    }
}
