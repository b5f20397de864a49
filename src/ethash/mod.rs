// src/ethash/mod.rs
//! Ethash reference algorithms
//!
//! Host-side, bit-exact implementations of everything the compute kernels
//! evaluate. The engine uses them directly for cache construction and as the
//! trusted reference when cross-validating device output.

/// Keccak-f[1600] permutation and the 256/512-bit configurations
pub mod keccak;

/// Cache and dataset sizing per epoch
pub mod sizing;

/// Epoch <-> seed hash schedule
pub mod seed;

/// Cache construction from an epoch seed
pub mod cache;

/// Per-item DAG derivation from the cache
pub mod dataset;

/// Per-nonce Hashimoto evaluation
pub mod hashimoto;

/// Difficulty thresholds and the little-endian hash comparison
pub mod difficulty;

pub use cache::{Cache, CacheRecipe};
pub use dataset::calc_dataset_item;
pub use difficulty::Threshold;
pub use hashimoto::{HashimotoTrace, hashimoto, hashimoto_light};
pub use sizing::DatasetParams;

/// Blocks per epoch
pub const EPOCH_LENGTH: u64 = 30_000;
/// Bytes in one cache or DAG item
pub const HASH_BYTES: usize = 64;
/// 32-bit words in one cache or DAG item
pub const NODE_WORDS: usize = HASH_BYTES / 4;
/// Bytes in the Hashimoto mix
pub const MIX_BYTES: usize = 128;
/// 32-bit words in the Hashimoto mix
pub const MIX_WORDS: usize = MIX_BYTES / 4;
/// Cache parents folded into each DAG item
pub const DATASET_PARENTS: u32 = 256;
/// Sequential mixing rounds over the cache
pub const CACHE_ROUNDS: usize = 3;
/// DAG page reads per nonce
pub const ACCESSES: u32 = 64;

/// One 64-byte cache or DAG item as little-endian 32-bit words
pub type Node = [u32; NODE_WORDS];

const FNV_PRIME: u32 = 0x0100_0193;

/// Ethash FNV mix: full 32-bit multiply, then XOR (not byte-wise FNV-1a)
#[inline(always)]
pub fn fnv(x: u32, y: u32) -> u32 {
    x.wrapping_mul(FNV_PRIME) ^ y
}

/// Word-wise FNV of `other` into `mix`
#[inline(always)]
pub fn fnv_words(mix: &mut [u32], other: &[u32]) {
    for (m, o) in mix.iter_mut().zip(other.iter()) {
        *m = fnv(*m, *o);
    }
}
