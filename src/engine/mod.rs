// src/engine/mod.rs
//! Ethash compute engine
//!
//! The engine owns one compute device and hands out [`DatasetHandle`]s. A
//! handle bundles the host cache with the device-resident, partitioned DAG
//! built from it; batches of nonces are then evaluated against a handle with
//! [`Engine::mine_batch`].
//!
//! ```no_run
//! use ethash_gpu_rs::engine::Engine;
//! use ethash_gpu_rs::ethash::Threshold;
//!
//! # fn main() -> Result<(), ethash_gpu_rs::MinerError> {
//! let engine = Engine::cpu(0)?;
//! let dataset = engine.build_dataset(0)?;
//! let threshold = Threshold::from_difficulty(1 << 20)?;
//! let batch = engine.mine_batch(&dataset, &[0u8; 32], &[0, 1, 2, 3], Some(&threshold))?;
//! println!("{} winners", batch.winners.map(|w| w.count).unwrap_or(0));
//! engine.destroy_dataset(dataset);
//! # Ok(())
//! # }
//! ```

/// Compute device interface shared by all backends
pub mod device;

/// DAG buffer partitioning and index routing
pub mod partition;

/// Host (rayon) backend
pub mod cpu;

/// OpenCL backend
#[cfg(feature = "opencl")]
pub mod opencl;

/// Optional on-disk dataset persistence
pub mod store;

pub use device::{ComputeDevice, DeviceCapabilities, DeviceDag, SearchOutput, Winners};
pub use partition::PartitionLayout;
pub use store::DatasetStore;

use crate::config::Config;
use crate::ethash::{
    Cache, CacheRecipe, DatasetParams, HASH_BYTES, HashimotoTrace, Node, Threshold,
    calc_dataset_item, hashimoto, hashimoto_light,
};
use crate::types::BackendKind;
use crate::utils::error::MinerError;
use cpu::CpuDevice;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Bytes charged against an engine's memory budget until dropped
#[derive(Debug)]
struct Reservation {
    live: Arc<Mutex<u64>>,
    bytes: u64,
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if let Ok(mut live) = self.live.lock() {
            *live = live.saturating_sub(self.bytes);
        }
    }
}

/// Cache and device DAG for one epoch
///
/// Owned by the caller. Dropping the handle frees its device memory and
/// returns its bytes to the engine that built it; [`Engine::destroy_dataset`]
/// does the same explicitly.
pub struct DatasetHandle {
    id: u64,
    params: DatasetParams,
    cache: Arc<Cache>,
    dag: Box<dyn DeviceDag>,
    invalidated: AtomicBool,
    // Declared after `dag` so the buffers are gone before the bytes return
    reservation: Reservation,
}

impl DatasetHandle {
    /// Engine-unique identifier
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Epoch, sizes and recipe
    pub fn params(&self) -> &DatasetParams {
        &self.params
    }

    /// Epoch the dataset was built for
    pub fn epoch(&self) -> u64 {
        self.params.epoch
    }

    /// Host cache the DAG was derived from
    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Partitioning of the device DAG
    pub fn layout(&self) -> &PartitionLayout {
        self.dag.layout()
    }

    /// Whether a device failure has invalidated the DAG buffers
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for DatasetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatasetHandle")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("layout", self.dag.layout())
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

/// Output of [`Engine::mine_batch`]
#[derive(Debug, Clone, Default)]
pub struct BatchResult {
    /// One result hash per input nonce, in input order
    pub hashes: Vec<[u8; 32]>,
    /// Winning set, present when a threshold was supplied
    pub winners: Option<Winners>,
}

/// A device hash that disagrees with the light reference
#[derive(Debug, Clone, Serialize)]
pub struct Mismatch {
    /// Offending nonce
    pub nonce: u64,
    /// Hash the device produced
    #[serde(serialize_with = "as_hex")]
    pub device: [u8; 32],
    /// Full reference evaluation
    pub reference: HashimotoTrace,
}

/// Output of [`Engine::verify_batch`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct VerifyReport {
    /// Nonces compared
    pub checked: usize,
    /// Disagreements, in batch order
    pub mismatches: Vec<Mismatch>,
}

impl VerifyReport {
    /// True when every device hash matched
    pub fn is_clean(&self) -> bool {
        self.mismatches.is_empty()
    }
}

fn as_hex<S: serde::Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}

/// Options applied to every dataset an engine builds
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Recipe used by [`Engine::build_dataset`]
    pub recipe: CacheRecipe,
    /// Upper bound on DAG buffers, further capped by the device
    pub max_partitions: usize,
    /// Store consulted before building and written after
    pub store: Option<DatasetStore>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            recipe: CacheRecipe::Canonical,
            max_partitions: 8,
            store: None,
        }
    }
}

/// Data-parallel Ethash engine bound to one compute device
pub struct Engine {
    device: Box<dyn ComputeDevice>,
    options: EngineOptions,
    live_bytes: Arc<Mutex<u64>>,
    next_id: AtomicU64,
}

impl Engine {
    /// Wraps a device
    pub fn new(device: Box<dyn ComputeDevice>, options: EngineOptions) -> Self {
        info!(
            "Compute device: {} [{}], {} MiB memory, {} MiB per allocation",
            device.capabilities().name,
            device.capabilities().backend,
            device.capabilities().global_memory >> 20,
            device.capabilities().max_allocation >> 20
        );
        Engine {
            device,
            options,
            live_bytes: Arc::new(Mutex::new(0)),
            next_id: AtomicU64::new(1),
        }
    }

    /// Host engine with default options
    ///
    /// # Arguments
    /// * `threads` - Grid width (0 = one per logical CPU)
    pub fn cpu(threads: usize) -> Result<Self, MinerError> {
        Ok(Self::new(
            Box::new(CpuDevice::new(threads, None)?),
            EngineOptions::default(),
        ))
    }

    /// Builds the engine a configuration describes
    ///
    /// # Returns
    /// `UnsupportedDevice` if the configured backend was not compiled in or no
    /// matching device exists
    pub fn from_config(config: &Config) -> Result<Self, MinerError> {
        config.validate()?;
        let device: Box<dyn ComputeDevice> = match config.backend {
            BackendKind::Cpu => Box::new(CpuDevice::new(
                config.effective_threads(),
                config.max_allocation_bytes,
            )?),
            #[cfg(feature = "opencl")]
            BackendKind::OpenCl => Box::new(opencl::OpenClDevice::select(
                &config.opencl,
                config.max_allocation_bytes,
            )?),
            #[cfg(not(feature = "opencl"))]
            BackendKind::OpenCl => {
                return Err(MinerError::UnsupportedDevice(
                    "this build has no OpenCL support (enable the `opencl` feature)".to_string(),
                ));
            }
        };

        let store = match &config.dataset_dir {
            Some(dir) => Some(DatasetStore::new(dir)?),
            None => None,
        };
        Ok(Self::new(
            device,
            EngineOptions {
                recipe: config.cache_recipe,
                max_partitions: config.max_partitions,
                store,
            },
        ))
    }

    /// Device description
    pub fn capabilities(&self) -> &DeviceCapabilities {
        self.device.capabilities()
    }

    /// Bytes held by live datasets
    pub fn live_dataset_bytes(&self) -> u64 {
        self.live_bytes.lock().map(|b| *b).unwrap_or_default()
    }

    /// Builds the dataset for `epoch` with canonical sizing
    pub fn build_dataset(&self, epoch: u64) -> Result<DatasetHandle, MinerError> {
        self.build_dataset_with(DatasetParams::for_epoch(epoch, self.options.recipe)?, None)
    }

    /// Builds a dataset with explicit parameters
    ///
    /// # Arguments
    /// * `params` - Epoch, sizes and recipe
    /// * `partitions` - Forces a partition count instead of the minimal plan
    ///
    /// # Returns
    /// A handle whose DAG is completely written. Configuration errors
    /// (`InsufficientMemory`, `PartitionError`), allocation failures and
    /// device failures are fatal and leave existing handles untouched.
    pub fn build_dataset_with(
        &self,
        params: DatasetParams,
        partitions: Option<usize>,
    ) -> Result<DatasetHandle, MinerError> {
        params.validate()?;
        let caps = self.device.capabilities();
        let max_buffers = self.options.max_partitions.min(caps.max_buffers).max(1);
        let layout = match partitions {
            Some(n) => PartitionLayout::with_partitions(
                params.dataset_items(),
                HASH_BYTES as u64,
                n,
                caps.max_allocation,
                max_buffers,
            )?,
            None => PartitionLayout::plan(
                params.dataset_items(),
                HASH_BYTES as u64,
                caps.max_allocation,
                max_buffers,
            )?,
        };

        let reservation = self.reserve(layout.total_bytes())?;
        self.build_reserved(params, layout, reservation)
    }

    fn build_reserved(
        &self,
        params: DatasetParams,
        layout: PartitionLayout,
        reservation: Reservation,
    ) -> Result<DatasetHandle, MinerError> {
        let started = Instant::now();
        info!(
            "Building {} dataset for epoch {}: {} MiB cache, {} MiB DAG in {} partition(s)",
            params.recipe,
            params.epoch,
            params.cache_bytes >> 20,
            params.dataset_bytes >> 20,
            layout.partitions()
        );
        let cache = Arc::new(Cache::build(&params)?);

        let dag = match self.restore(&params, &layout, &cache) {
            Some(dag) => dag,
            None => {
                let dag = self.device.build_dag(&cache, &layout)?;
                if let Some(store) = &self.options.store {
                    if let Err(e) = store.save(&params, dag.as_ref()) {
                        warn!("Could not persist dataset: {}", e);
                    }
                }
                dag
            }
        };

        info!("Dataset for epoch {} ready in {:.2?}", params.epoch, started.elapsed());
        Ok(DatasetHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            params,
            cache,
            dag,
            invalidated: AtomicBool::new(false),
            reservation,
        })
    }

    /// Loads a stored DAG and spot-checks it against the cache
    fn restore(
        &self,
        params: &DatasetParams,
        layout: &PartitionLayout,
        cache: &Cache,
    ) -> Option<Box<dyn DeviceDag>> {
        let store = self.options.store.as_ref()?;
        match store.load(params, self.device.as_ref(), layout) {
            Ok(Some(dag)) => {
                let last = layout.total_items() - 1;
                let sound = [0, last / 2, last].iter().all(|&i| {
                    dag.read_item(i)
                        .map(|item| item == calc_dataset_item(cache, i as u32))
                        .unwrap_or(false)
                });
                if sound {
                    Some(dag)
                } else {
                    warn!("Stored dataset disagrees with the cache, rebuilding");
                    None
                }
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring stored dataset: {}", e);
                None
            }
        }
    }

    fn reserve(&self, bytes: u64) -> Result<Reservation, MinerError> {
        let mut live = self
            .live_bytes
            .lock()
            .map_err(|_| MinerError::DeviceError("memory accounting poisoned".to_string()))?;
        let available = self.device.capabilities().global_memory.saturating_sub(*live);
        if bytes > available {
            return Err(MinerError::InsufficientMemory {
                required: bytes,
                available,
            });
        }
        *live += bytes;
        Ok(Reservation {
            live: Arc::clone(&self.live_bytes),
            bytes,
        })
    }

    /// Evaluates a batch of nonces against a dataset
    ///
    /// # Arguments
    /// * `dataset` - Handle from [`Engine::build_dataset`]
    /// * `header` - 32-byte header hash
    /// * `nonces` - Candidate nonces; duplicates are evaluated independently
    /// * `threshold` - When present, also returns the winning set
    ///
    /// # Returns
    /// Hashes in input order. A device failure fails the whole batch and
    /// invalidates the handle; later calls return `DatasetInvalidated`.
    pub fn mine_batch(
        &self,
        dataset: &DatasetHandle,
        header: &[u8; 32],
        nonces: &[u64],
        threshold: Option<&Threshold>,
    ) -> Result<BatchResult, MinerError> {
        if dataset.is_invalidated() {
            return Err(MinerError::DatasetInvalidated(dataset.epoch()));
        }
        if nonces.is_empty() {
            return Ok(BatchResult {
                hashes: Vec::new(),
                winners: threshold.map(|_| Winners::default()),
            });
        }

        let words = threshold.map(Threshold::words);
        match dataset.dag.search(header, nonces, words.as_ref()) {
            Ok(output) => {
                debug!(
                    "Batch of {} nonces on dataset {}: {} winner(s)",
                    nonces.len(),
                    dataset.id,
                    output.winners.as_ref().map(|w| w.count).unwrap_or(0)
                );
                Ok(BatchResult {
                    hashes: output.hashes,
                    winners: output.winners,
                })
            }
            Err(e @ MinerError::DeviceError(_)) => {
                dataset.invalidated.store(true, Ordering::Release);
                warn!("Dataset {} invalidated: {}", dataset.id, e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Releases a dataset's device memory
    ///
    /// The bytes go back to the engine that built the handle, which need not
    /// be `self`.
    pub fn destroy_dataset(&self, dataset: DatasetHandle) {
        debug!(
            "Destroying dataset {} (epoch {}, {} bytes)",
            dataset.id,
            dataset.epoch(),
            dataset.reservation.bytes
        );
        drop(dataset);
    }

    /// Re-runs one nonce on the host, reading DAG items back from the device
    ///
    /// Debug hook: every intermediate is returned, and every item read goes
    /// through the same partition routing the kernels use.
    pub fn trace_nonce(
        &self,
        dataset: &DatasetHandle,
        header: &[u8; 32],
        nonce: u64,
    ) -> Result<HashimotoTrace, MinerError> {
        if dataset.is_invalidated() {
            return Err(MinerError::DatasetInvalidated(dataset.epoch()));
        }
        let mut failure = None;
        let trace = hashimoto(header, nonce, dataset.params.dataset_items(), |i| {
            match dataset.dag.read_item(u64::from(i)) {
                Ok(node) => node,
                Err(e) => {
                    failure.get_or_insert(e);
                    Node::default()
                }
            }
        });
        match failure {
            Some(e) => Err(e),
            None => Ok(trace),
        }
    }

    /// Reads one DAG item back from the device
    pub fn read_item(&self, dataset: &DatasetHandle, index: u64) -> Result<Node, MinerError> {
        if dataset.is_invalidated() {
            return Err(MinerError::DatasetInvalidated(dataset.epoch()));
        }
        dataset.dag.read_item(index)
    }

    /// Cross-checks device hashes against the light evaluation from the cache
    ///
    /// Mismatches are data, not errors: the report carries a full reference
    /// trace for each disagreeing nonce.
    pub fn verify_batch(
        &self,
        dataset: &DatasetHandle,
        header: &[u8; 32],
        nonces: &[u64],
    ) -> Result<VerifyReport, MinerError> {
        let batch = self.mine_batch(dataset, header, nonces, None)?;
        let cache = dataset.cache.as_ref();
        let mismatches: Vec<Mismatch> = nonces
            .par_iter()
            .zip(batch.hashes.par_iter())
            .filter_map(|(&nonce, device)| {
                let reference = hashimoto_light(cache, header, nonce);
                (reference.result != *device).then(|| Mismatch {
                    nonce,
                    device: *device,
                    reference,
                })
            })
            .collect();
        if !mismatches.is_empty() {
            warn!("{} of {} nonces disagree with the reference", mismatches.len(), nonces.len());
        }
        Ok(VerifyReport {
            checked: nonces.len(),
            mismatches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn small_params() -> DatasetParams {
        DatasetParams::custom(0, 1024, 32 * 1024, CacheRecipe::Canonical).unwrap()
    }

    fn tiny_device(global_memory: u64) -> Box<dyn ComputeDevice> {
        Box::new(
            CpuDevice::with_capabilities(DeviceCapabilities {
                name: "test".to_string(),
                backend: BackendKind::Cpu,
                global_memory,
                max_allocation: 12 * 1024,
                max_buffers: 8,
                compute_units: 2,
            })
            .unwrap(),
        )
    }

    #[test]
    fn ceiling_drives_partition_plan() {
        let engine = Engine::new(tiny_device(1 << 20), EngineOptions::default());
        let handle = engine.build_dataset_with(small_params(), None).unwrap();
        assert_eq!(handle.layout().partitions(), 3);
        assert_eq!(engine.live_dataset_bytes(), 32 * 1024);
        engine.destroy_dataset(handle);
        assert_eq!(engine.live_dataset_bytes(), 0);
    }

    #[test]
    fn memory_accounting_refuses_oversubscription() {
        let engine = Engine::new(tiny_device(48 * 1024), EngineOptions::default());
        let first = engine.build_dataset_with(small_params(), None).unwrap();
        match engine.build_dataset_with(small_params(), None) {
            Err(MinerError::InsufficientMemory { required, available }) => {
                assert_eq!(required, 32 * 1024);
                assert_eq!(available, 16 * 1024);
            }
            other => panic!("expected InsufficientMemory, got {:?}", other.map(|h| h.id())),
        }
        // The failed build left the first dataset usable
        let header = [1u8; 32];
        assert!(engine.mine_batch(&first, &header, &[1], None).is_ok());
        engine.destroy_dataset(first);
        assert!(engine.build_dataset_with(small_params(), None).is_ok());
    }

    #[test]
    fn dropped_handles_return_their_memory() {
        let engine = Engine::new(tiny_device(48 * 1024), EngineOptions::default());
        let handle = engine.build_dataset_with(small_params(), None).unwrap();
        assert_eq!(engine.live_dataset_bytes(), 32 * 1024);
        drop(handle);
        assert_eq!(engine.live_dataset_bytes(), 0);

        let rebuilt = engine.build_dataset_with(small_params(), None).unwrap();
        assert_eq!(engine.live_dataset_bytes(), 32 * 1024);

        // Destroying through another engine credits the one that built it
        let other = Engine::new(tiny_device(48 * 1024), EngineOptions::default());
        let foreign = other.build_dataset_with(small_params(), None).unwrap();
        engine.destroy_dataset(foreign);
        assert_eq!(other.live_dataset_bytes(), 0);
        assert_eq!(engine.live_dataset_bytes(), 32 * 1024);
        drop(rebuilt);
        assert_eq!(engine.live_dataset_bytes(), 0);
    }

    #[test]
    fn oversized_epochs_are_rejected() {
        let engine = Engine::new(tiny_device(1 << 20), EngineOptions::default());
        assert!(matches!(
            engine.build_dataset(1 << 41),
            Err(MinerError::InputError(_))
        ));
        assert!(matches!(
            engine.build_dataset(u64::MAX),
            Err(MinerError::InputError(_))
        ));
        assert_eq!(engine.live_dataset_bytes(), 0);
    }

    #[test]
    fn reference_vector_through_engine() {
        let engine = Engine::new(tiny_device(1 << 20), EngineOptions::default());
        let handle = engine.build_dataset_with(small_params(), Some(3)).unwrap();
        let header = hex!("c9149cc0386e689d789a1c2f3d5d169a61a6218ed30e74414dc736e442ef3d1f");
        let batch = engine.mine_batch(&handle, &header, &[0], None).unwrap();
        assert_eq!(
            batch.hashes[0],
            hex!("d3539235ee2e6f8db665c0a72169f55b7f6c605712330b778ec3944f0eb5a557")
        );
        assert!(batch.winners.is_none());

        let last = handle.layout().total_items() - 1;
        for index in [0, 170, 171, 342, last] {
            assert_eq!(
                engine.read_item(&handle, index).unwrap(),
                calc_dataset_item(handle.cache(), index as u32)
            );
        }
        assert!(engine.read_item(&handle, last + 1).is_err());

        let trace = engine.trace_nonce(&handle, &header, 0).unwrap();
        assert_eq!(
            trace.digest,
            hex!("e4073cffaef931d37117cefd9afd27ea0f1cad6a981dd2605c4a1ac97c519800")
        );
    }

    #[test]
    fn empty_batches_and_verification() {
        let engine = Engine::new(tiny_device(1 << 20), EngineOptions::default());
        let handle = engine.build_dataset_with(small_params(), None).unwrap();
        let header = [3u8; 32];

        let empty = engine
            .mine_batch(&handle, &header, &[], Some(&Threshold::MAX))
            .unwrap();
        assert!(empty.hashes.is_empty());
        assert_eq!(empty.winners.unwrap().count, 0);

        let report = engine.verify_batch(&handle, &header, &[0, 1, 2, 3, 4]).unwrap();
        assert_eq!(report.checked, 5);
        assert!(report.is_clean());
    }

    #[test]
    fn invalidated_handles_are_refused() {
        let engine = Engine::new(tiny_device(1 << 20), EngineOptions::default());
        let handle = engine.build_dataset_with(small_params(), None).unwrap();
        handle.invalidated.store(true, Ordering::Release);
        assert!(matches!(
            engine.mine_batch(&handle, &[0u8; 32], &[1], None),
            Err(MinerError::DatasetInvalidated(0))
        ));
        assert!(engine.trace_nonce(&handle, &[0u8; 32], 1).is_err());
    }
}
