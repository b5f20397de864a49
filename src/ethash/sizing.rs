// src/ethash/sizing.rs
//! Cache and dataset sizing
//!
//! Both sizes grow linearly per epoch and are then walked down until the item
//! (cache) or row (dataset, two items) count is prime. The dataset item count
//! is therefore always even, which the Hashimoto page pairing relies on.

use crate::ethash::cache::CacheRecipe;
use crate::ethash::{HASH_BYTES, MIX_BYTES};
use crate::utils::error::MinerError;
use serde::{Deserialize, Serialize};

/// Cache bytes at epoch 0
pub const CACHE_BYTES_INIT: u64 = 1 << 24;
/// Cache growth per epoch
pub const CACHE_BYTES_GROWTH: u64 = 1 << 17;
/// Dataset bytes at epoch 0
pub const DATASET_BYTES_INIT: u64 = 1 << 30;
/// Dataset growth per epoch
pub const DATASET_BYTES_GROWTH: u64 = 1 << 23;
/// Last epoch whose dataset item count fits the kernels' 32-bit indices
pub const MAX_EPOCH: u64 = ((1u64 << 32) - DATASET_BYTES_INIT / HASH_BYTES as u64)
    / (DATASET_BYTES_GROWTH / HASH_BYTES as u64);

/// Trial-division primality test, sufficient for counts below 2^32
pub fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3u64;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

fn walk_to_prime(init: u64, growth: u64, unit: u64, epoch: u64) -> Option<u64> {
    if epoch > MAX_EPOCH {
        return None;
    }
    let mut size = growth.checked_mul(epoch)?.checked_add(init)? - unit;
    while !is_prime(size / unit) {
        size -= 2 * unit;
    }
    Some(size)
}

/// Cache size in bytes for `epoch`, `None` past [`MAX_EPOCH`]
pub fn cache_size(epoch: u64) -> Option<u64> {
    walk_to_prime(CACHE_BYTES_INIT, CACHE_BYTES_GROWTH, HASH_BYTES as u64, epoch)
}

/// Dataset size in bytes for `epoch`, `None` past [`MAX_EPOCH`]
pub fn dataset_size(epoch: u64) -> Option<u64> {
    walk_to_prime(DATASET_BYTES_INIT, DATASET_BYTES_GROWTH, MIX_BYTES as u64, epoch)
}

/// Everything that determines one cache/DAG pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetParams {
    /// Epoch the seed is derived from
    pub epoch: u64,
    /// Cache size in bytes (multiple of 64)
    pub cache_bytes: u64,
    /// Dataset size in bytes (multiple of 128)
    pub dataset_bytes: u64,
    /// Cache construction recipe
    pub recipe: CacheRecipe,
}

impl DatasetParams {
    /// Canonical sizes for `epoch`
    ///
    /// # Errors
    /// `InputError` for epochs past [`MAX_EPOCH`]
    pub fn for_epoch(epoch: u64, recipe: CacheRecipe) -> Result<Self, MinerError> {
        let sizes = cache_size(epoch).zip(dataset_size(epoch));
        let (cache_bytes, dataset_bytes) = sizes.ok_or_else(|| {
            MinerError::InputError(format!(
                "epoch {} is past the last supported epoch {}",
                epoch, MAX_EPOCH
            ))
        })?;
        Ok(DatasetParams {
            epoch,
            cache_bytes,
            dataset_bytes,
            recipe,
        })
    }

    /// Explicit sizes, for small datasets in tests and diagnostics
    ///
    /// # Errors
    /// `InputError` if the cache is not a non-zero multiple of 64 bytes, the
    /// dataset is not a non-zero multiple of 128 bytes, or either count
    /// overflows the 32-bit indices the kernels use.
    pub fn custom(
        epoch: u64,
        cache_bytes: u64,
        dataset_bytes: u64,
        recipe: CacheRecipe,
    ) -> Result<Self, MinerError> {
        let params = DatasetParams {
            epoch,
            cache_bytes,
            dataset_bytes,
            recipe,
        };
        params.validate()?;
        Ok(params)
    }

    /// Checks the size invariants the kernels rely on
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.cache_bytes == 0 || self.cache_bytes % HASH_BYTES as u64 != 0 {
            return Err(MinerError::InputError(format!(
                "cache size {} is not a non-zero multiple of {}",
                self.cache_bytes, HASH_BYTES
            )));
        }
        if self.dataset_bytes == 0 || self.dataset_bytes % MIX_BYTES as u64 != 0 {
            return Err(MinerError::InputError(format!(
                "dataset size {} is not a non-zero multiple of {}",
                self.dataset_bytes, MIX_BYTES
            )));
        }
        if self.cache_items() > u64::from(u32::MAX) || self.dataset_items() > u64::from(u32::MAX) {
            return Err(MinerError::InputError(
                "item counts must fit in 32 bits".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of 64-byte cache items
    pub fn cache_items(&self) -> u64 {
        self.cache_bytes / HASH_BYTES as u64
    }

    /// Number of 64-byte DAG items (always even)
    pub fn dataset_items(&self) -> u64 {
        self.dataset_bytes / HASH_BYTES as u64
    }
}
