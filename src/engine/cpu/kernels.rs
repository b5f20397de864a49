// src/engine/cpu/kernels.rs
//! Host renditions of the three compute kernels
//!
//! Each kernel is a flat parallel loop with one task per item or nonce, run
//! inside the device's rayon pool. Tasks share nothing mutable except the
//! filter's slot counter.

use crate::engine::device::Winners;
use crate::engine::partition::PartitionLayout;
use crate::ethash::difficulty::hash_below;
use crate::ethash::{Cache, NODE_WORDS, Node, calc_dataset_item, hashimoto};
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Read-only view of a partitioned DAG
pub struct PartitionedDag<'a> {
    layout: &'a PartitionLayout,
    partitions: &'a [Vec<u32>],
}

impl<'a> PartitionedDag<'a> {
    /// Wraps partitions laid out according to `layout`
    pub fn new(layout: &'a PartitionLayout, partitions: &'a [Vec<u32>]) -> Self {
        PartitionedDag { layout, partitions }
    }

    /// Loads item `index` through the partition routing
    #[inline(always)]
    pub fn load(&self, index: u32) -> Node {
        let (partition, local) = self.layout.route(u64::from(index));
        let base = local as usize * NODE_WORDS;
        let mut node = [0u32; NODE_WORDS];
        node.copy_from_slice(&self.partitions[partition][base..base + NODE_WORDS]);
        node
    }
}

/// Writes every DAG item into the partition that owns it
///
/// One task per item; each task writes exactly one disjoint 64-byte slot.
pub fn dag_kernel(cache: &Cache, layout: &PartitionLayout, partitions: &mut [Vec<u32>]) {
    partitions
        .par_iter_mut()
        .enumerate()
        .for_each(|(partition, words)| {
            let start = layout.partition_range(partition).start;
            words
                .par_chunks_exact_mut(NODE_WORDS)
                .enumerate()
                .for_each(|(local, slot)| {
                    let index = (start + local as u64) as u32;
                    slot.copy_from_slice(&calc_dataset_item(cache, index));
                });
            log::debug!("DAG partition {} written", partition);
        });
}

/// Evaluates Hashimoto for every nonce, results in input order
pub fn hashimoto_kernel(dag: &PartitionedDag<'_>, header: &[u8; 32], nonces: &[u64]) -> Vec<[u8; 32]> {
    let items = dag.layout.total_items();
    nonces
        .par_iter()
        .map(|&nonce| hashimoto(header, nonce, items, |i| dag.load(i)).result)
        .collect()
}

/// Compacts the nonces whose hash is strictly below the threshold
///
/// Winners claim slots with an atomic increment, so slot order depends on
/// scheduling; the final counter value is the exact winner count.
pub fn filter_kernel(hashes: &[[u8; 32]], nonces: &[u64], threshold: &[u32; 8]) -> Winners {
    let counter = AtomicU32::new(0);
    let slots: Vec<AtomicU64> = nonces.iter().map(|_| AtomicU64::new(0)).collect();

    hashes
        .par_iter()
        .zip(nonces.par_iter())
        .for_each(|(hash, &nonce)| {
            if hash_below(hash, threshold) {
                let slot = counter.fetch_add(1, Ordering::Relaxed) as usize;
                slots[slot].store(nonce, Ordering::Relaxed);
            }
        });

    let count = counter.into_inner();
    let nonces = slots
        .into_iter()
        .take(count as usize)
        .map(AtomicU64::into_inner)
        .collect();
    Winners { nonces, count }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethash::{CacheRecipe, DatasetParams, Threshold, hashimoto_light};
    use std::collections::HashSet;

    fn small_cache() -> Cache {
        let params = DatasetParams::custom(0, 1024, 32 * 1024, CacheRecipe::Canonical).unwrap();
        Cache::build(&params).unwrap()
    }

    fn build(cache: &Cache, partitions: usize) -> (PartitionLayout, Vec<Vec<u32>>) {
        let layout = PartitionLayout::with_partitions(512, 64, partitions, 1 << 20, 8).unwrap();
        let mut parts: Vec<Vec<u32>> = (0..layout.partitions())
            .map(|p| vec![0u32; layout.partition_items(p) as usize * NODE_WORDS])
            .collect();
        dag_kernel(cache, &layout, &mut parts);
        (layout, parts)
    }

    #[test]
    fn dag_kernel_matches_item_function() {
        let cache = small_cache();
        for n in [1usize, 2, 3] {
            let (layout, parts) = build(&cache, n);
            let view = PartitionedDag::new(&layout, &parts);
            for i in [0u32, 170, 171, 255, 256, 341, 342, 511] {
                assert_eq!(view.load(i), calc_dataset_item(&cache, i), "item {i}, {n} partitions");
            }
        }
    }

    #[test]
    fn hashimoto_kernel_matches_light() {
        let cache = small_cache();
        let (layout, parts) = build(&cache, 3);
        let view = PartitionedDag::new(&layout, &parts);
        let header = [0x42u8; 32];
        let nonces = [0u64, 1, 77, 1 << 40];
        let hashes = hashimoto_kernel(&view, &header, &nonces);
        for (hash, &nonce) in hashes.iter().zip(nonces.iter()) {
            assert_eq!(*hash, hashimoto_light(&cache, &header, nonce).result);
        }
    }

    #[test]
    fn filter_is_sound_and_complete() {
        let hashes: Vec<[u8; 32]> = (0..64u8)
            .map(|i| {
                let mut h = [0u8; 32];
                h[31] = i.wrapping_mul(4);
                h
            })
            .collect();
        let nonces: Vec<u64> = (1000..1064).collect();
        let threshold = Threshold::from_hex(&format!("{:02x}{}", 0x80, "00".repeat(31))).unwrap();

        let winners = filter_kernel(&hashes, &nonces, &threshold.words());
        let got: HashSet<u64> = winners.nonces.iter().copied().collect();
        let expected: HashSet<u64> = (1000..1032).collect();
        assert_eq!(winners.count, 32);
        assert_eq!(got, expected);
    }

    #[test]
    fn filter_with_no_winners() {
        let winners = filter_kernel(&[[0xff; 32]; 4], &[1, 2, 3, 4], &[0u32; 8]);
        assert_eq!(winners, Winners::default());
    }
}
