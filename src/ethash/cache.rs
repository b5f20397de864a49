// src/ethash/cache.rs
//! Cache construction
//!
//! The cache is the small, sequentially built structure every DAG item is
//! derived from. Construction runs once per dataset on the host; the result is
//! uploaded to the device and kept for light verification.

use crate::ethash::keccak::{keccak_512, keccak_512_words, node_from_bytes, node_to_bytes};
use crate::ethash::seed::seedhash;
use crate::ethash::sizing::DatasetParams;
use crate::ethash::{CACHE_ROUNDS, HASH_BYTES, Node};
use crate::utils::error::MinerError;
use log::debug;
use std::time::Instant;

pub use crate::types::CacheRecipe;

/// Immutable Ethash cache for one [`DatasetParams`]
#[derive(Clone)]
pub struct Cache {
    params: DatasetParams,
    items: Vec<Node>,
}

impl Cache {
    /// Builds the cache described by `params`
    ///
    /// # Arguments
    /// * `params` - Epoch, sizes and recipe
    ///
    /// # Returns
    /// The finished cache, or `AllocationError` if the item buffer cannot be
    /// reserved and `InputError` for parameters the recipe cannot express.
    pub fn build(params: &DatasetParams) -> Result<Self, MinerError> {
        params.validate()?;
        let started = Instant::now();
        let n = params.cache_items() as usize;

        let mut items: Vec<Node> = Vec::new();
        items.try_reserve_exact(n)?;

        let first = match params.recipe {
            CacheRecipe::Canonical => keccak_512(&seedhash(params.epoch)),
            CacheRecipe::EpochKeyed => {
                let epoch = u32::try_from(params.epoch).map_err(|_| {
                    MinerError::InputError(format!(
                        "epoch {} does not fit the 32-bit epoch-keyed seed",
                        params.epoch
                    ))
                })?;
                keccak_512(&keccak_512(&epoch.to_le_bytes()))
            }
        };

        let mut node = node_from_bytes(&first);
        items.push(node);
        for _ in 1..n {
            node = keccak_512_words(&node);
            items.push(node);
        }

        match params.recipe {
            CacheRecipe::Canonical => canonical_rounds(&mut items),
            CacheRecipe::EpochKeyed => keyed_rounds(&mut items),
        }

        debug!(
            "Built {} cache for epoch {} ({} items) in {:.2?}",
            params.recipe,
            params.epoch,
            n,
            started.elapsed()
        );
        Ok(Cache {
            params: *params,
            items,
        })
    }

    /// Parameters the cache was built from
    pub fn params(&self) -> &DatasetParams {
        &self.params
    }

    /// Number of 64-byte items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always false for a built cache
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Item `index`, which must be below [`Cache::len`]
    #[inline(always)]
    pub fn item(&self, index: usize) -> &Node {
        &self.items[index]
    }

    /// All items in order
    pub fn items(&self) -> &[Node] {
        &self.items
    }

    /// Cache contents as little-endian bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.items.len() * HASH_BYTES);
        for node in &self.items {
            out.extend_from_slice(&node_to_bytes(node));
        }
        out
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("params", &self.params)
            .field("items", &self.items.len())
            .finish()
    }
}

/// Reference RandMemoHash rounds: `item[i] = K512(item[i-1] ^ item[v])`
fn canonical_rounds(items: &mut [Node]) {
    let n = items.len();
    for _ in 0..CACHE_ROUNDS {
        for i in 0..n {
            let v = items[i][0] as usize % n;
            let prev = items[(i + n - 1) % n];
            let mut mixed = items[v];
            for (m, p) in mixed.iter_mut().zip(prev.iter()) {
                *m ^= *p;
            }
            items[i] = keccak_512_words(&mixed);
        }
    }
}

/// Epoch-keyed rounds: `item[i] ^= item[v]` in place, sequentially
fn keyed_rounds(items: &mut [Node]) {
    let n = items.len();
    for _ in 0..CACHE_ROUNDS {
        for i in 0..n {
            let v = items[i][0] as usize % n;
            let other = items[v];
            for (m, o) in items[i].iter_mut().zip(other.iter()) {
                *m ^= *o;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    fn small(epoch: u64, recipe: CacheRecipe) -> Cache {
        let params = DatasetParams::custom(epoch, 1024, 32 * 1024, recipe).unwrap();
        Cache::build(&params).unwrap()
    }

    #[test]
    fn canonical_small_cache_first_item() {
        let cache = small(0, CacheRecipe::Canonical);
        assert_eq!(cache.len(), 16);
        assert_eq!(
            node_to_bytes(cache.item(0)),
            hex!(
                "7ce2991c951f7bf4c4c1bb119887ee07871eb5339d7b97b8588e85c742de90e5"
                "bafd5bbe6ce93a134fb6be9ad3e30db99d9528a2ea7846833f52e9ca119b6b54"
            )
        );
    }

    #[test]
    fn epoch_keyed_small_cache_first_item() {
        assert_eq!(
            node_to_bytes(small(0, CacheRecipe::EpochKeyed).item(0)),
            hex!(
                "5180aca53cac4674420f0b732ba74977c062494a31db38569ff8a76526cac09e"
                "36dd682d88e9f42c9d687f338ff1b7a1a3f6c10684fa0d86985802d36ef455b2"
            )
        );
        assert_eq!(
            node_to_bytes(small(1, CacheRecipe::EpochKeyed).item(0)),
            hex!(
                "1663db7341326d2a61559cf7eca8511550145a9a249539486dd61038092dfb7c"
                "a9c70ca54af1afdbbf1d65c6e1bb8ecaa78f68ffa985225065bcd634c0dff90e"
            )
        );
    }

    #[test]
    fn deterministic_and_epoch_sensitive() {
        for recipe in [CacheRecipe::Canonical, CacheRecipe::EpochKeyed] {
            let a = small(3, recipe);
            let b = small(3, recipe);
            assert_eq!(a.to_bytes(), b.to_bytes());
            assert_ne!(a.to_bytes(), small(4, recipe).to_bytes());
        }
        assert_ne!(
            small(0, CacheRecipe::Canonical).to_bytes(),
            small(0, CacheRecipe::EpochKeyed).to_bytes()
        );
    }

    #[test]
    fn epoch_keyed_rejects_wide_epochs() {
        let params =
            DatasetParams::custom(u64::from(u32::MAX) + 1, 1024, 32 * 1024, CacheRecipe::EpochKeyed)
                .unwrap();
        assert!(matches!(Cache::build(&params), Err(MinerError::InputError(_))));
    }

    #[test]
    fn byte_view_matches_item_count() {
        let cache = small(0, CacheRecipe::Canonical);
        let bytes = cache.to_bytes();
        assert_eq!(bytes.len(), 1024);
        assert_eq!(&bytes[..64], &node_to_bytes(cache.item(0)));
    }
}
