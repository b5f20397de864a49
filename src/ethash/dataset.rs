// src/ethash/dataset.rs
//! DAG item derivation
//!
//! Every DAG item is an independent function of the cache and its index, which
//! is what lets the DAG kernel run one task per item with no coordination.

use crate::ethash::cache::Cache;
use crate::ethash::keccak::keccak_512_words;
use crate::ethash::{DATASET_PARENTS, NODE_WORDS, Node, fnv, fnv_words};

/// Computes DAG item `index` from `cache`
///
/// # Arguments
/// * `cache` - Finished cache for the dataset's epoch
/// * `index` - Item index, below the dataset item count
///
/// # Returns
/// The 64-byte item as sixteen little-endian words
pub fn calc_dataset_item(cache: &Cache, index: u32) -> Node {
    let n = cache.len() as u32;
    let mut mix = *cache.item((index % n) as usize);
    mix[0] ^= index;
    mix = keccak_512_words(&mix);

    for j in 0..DATASET_PARENTS {
        let parent = fnv(index ^ j, mix[j as usize % NODE_WORDS]) % n;
        fnv_words(&mut mix, cache.item(parent as usize));
    }
    keccak_512_words(&mix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethash::keccak::node_to_bytes;
    use crate::ethash::{CacheRecipe, DatasetParams};
    use hex_literal::hex;

    fn small_cache(recipe: CacheRecipe) -> Cache {
        let params = DatasetParams::custom(0, 1024, 32 * 1024, recipe).unwrap();
        Cache::build(&params).unwrap()
    }

    #[test]
    fn canonical_small_dataset_items() {
        let cache = small_cache(CacheRecipe::Canonical);
        assert_eq!(
            node_to_bytes(&calc_dataset_item(&cache, 0)),
            hex!(
                "4bc09fbd530a041dd2ec296110a29e8f130f179c59d223f51ecce3126e8b0c74"
                "326abc2f32ccd9d7f976bd0944e3ccf8479db39343cbbffa467046ca97e2da63"
            )
        );
        assert_eq!(
            node_to_bytes(&calc_dataset_item(&cache, 511)),
            hex!(
                "55876f4d31330caa02aedd0b0c121c3c41e736853a08071f0dd4ddc7412db0bb"
                "e274a9ac2932552bb37c40e72c2ef1d7cca8236942e480d709d3ea9d5ae0a1b7"
            )
        );
    }

    #[test]
    fn epoch_keyed_small_dataset_first_item() {
        let cache = small_cache(CacheRecipe::EpochKeyed);
        assert_eq!(
            node_to_bytes(&calc_dataset_item(&cache, 0)),
            hex!(
                "7625ffee76cf0fe74d401e4542f5fd6b3171808d9272b17de71bd4c8066add02"
                "4bfd3c35dd625151409475e0be4a403e88be369e150b9d13c65e61b4499233a9"
            )
        );
    }

    #[test]
    fn items_depend_on_index() {
        let cache = small_cache(CacheRecipe::Canonical);
        // Indices 0 and 16 share a cache seed item but not the index XOR
        assert_ne!(calc_dataset_item(&cache, 0), calc_dataset_item(&cache, 16));
    }
}
