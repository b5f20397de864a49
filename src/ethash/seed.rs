// src/ethash/seed.rs
//! Epoch seed schedule
//!
//! Work packages carry a 32-byte seed hash rather than an epoch number. The
//! seed for epoch `e` is Keccak-256 applied `e` times to 32 zero bytes.

use crate::ethash::keccak::keccak_256;

/// Upper bound used when resolving an unknown seed back to its epoch
pub const MAX_RESOLVED_EPOCH: u64 = 2048;

/// Seed hash of `epoch`
pub fn seedhash(epoch: u64) -> [u8; 32] {
    let mut seed = [0u8; 32];
    for _ in 0..epoch {
        seed = keccak_256(&seed);
    }
    seed
}

/// Resolves a seed hash to its epoch by walking the chain up to `max_epoch`
///
/// Returns `None` when the seed does not appear within the bound.
pub fn epoch_from_seed(seed: &[u8; 32], max_epoch: u64) -> Option<u64> {
    let mut current = [0u8; 32];
    for epoch in 0..=max_epoch {
        if &current == seed {
            return Some(epoch);
        }
        current = keccak_256(&current);
    }
    None
}
