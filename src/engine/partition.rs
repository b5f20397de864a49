// src/engine/partition.rs
//! DAG buffer partitioning
//!
//! A single device allocation is capped well below the DAG size, so the DAG
//! lives in `N` buffers of `items_per_partition` items each (the last one may
//! be shorter but never empty). DAG writes and Hashimoto reads both route a
//! global item index through [`PartitionLayout::route`].

use crate::utils::error::MinerError;
use log::debug;
use std::ops::Range;

/// How a DAG of `total_items` items is split across device buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLayout {
    total_items: u64,
    item_bytes: u64,
    items_per_partition: u64,
    partitions: usize,
}

impl PartitionLayout {
    /// Plans the smallest partition count that respects the allocation ceiling
    ///
    /// # Arguments
    /// * `total_items` - Items in the DAG
    /// * `item_bytes` - Bytes per item (64)
    /// * `max_allocation` - Largest single buffer the device accepts, in bytes
    /// * `max_partitions` - Number of buffers a kernel can bind
    ///
    /// # Returns
    /// The layout, or `PartitionError` when an item does not fit one
    /// allocation or more buffers than the binding limit would be needed
    pub fn plan(
        total_items: u64,
        item_bytes: u64,
        max_allocation: u64,
        max_partitions: usize,
    ) -> Result<Self, MinerError> {
        check_shape(total_items, item_bytes, max_allocation)?;

        let total_bytes = total_items * item_bytes;
        let mut n = total_bytes.div_ceil(max_allocation).max(1);
        let mut per = total_items.div_ceil(n);
        while per * item_bytes > max_allocation {
            n += 1;
            per = total_items.div_ceil(n);
        }
        let layout = Self::from_items_per_partition(total_items, item_bytes, per);

        if layout.partitions > max_partitions {
            return Err(MinerError::PartitionError(format!(
                "{} bytes need {} buffers of at most {} bytes, device binds {}",
                total_bytes, layout.partitions, max_allocation, max_partitions
            )));
        }
        debug!(
            "Partition plan: {} items in {} buffer(s) of {} items",
            total_items, layout.partitions, layout.items_per_partition
        );
        Ok(layout)
    }

    /// Splits into (up to) `partitions` buffers regardless of the ceiling's minimum
    ///
    /// The count is recomputed from the rounded-up partition size, so asking
    /// for more partitions than that size allows yields fewer, all non-empty.
    pub fn with_partitions(
        total_items: u64,
        item_bytes: u64,
        partitions: usize,
        max_allocation: u64,
        max_partitions: usize,
    ) -> Result<Self, MinerError> {
        check_shape(total_items, item_bytes, max_allocation)?;
        if partitions == 0 || partitions > max_partitions {
            return Err(MinerError::PartitionError(format!(
                "requested {} partitions, device binds 1..={}",
                partitions, max_partitions
            )));
        }
        let per = total_items.div_ceil(partitions as u64);
        if per * item_bytes > max_allocation {
            return Err(MinerError::PartitionError(format!(
                "{} partitions of {} bytes exceed the {} byte allocation limit",
                partitions,
                per * item_bytes,
                max_allocation
            )));
        }
        let layout = Self::from_items_per_partition(total_items, item_bytes, per);
        if layout.partitions != partitions {
            debug!(
                "Requested {} partitions, using {} so none is empty",
                partitions, layout.partitions
            );
        }
        Ok(layout)
    }

    fn from_items_per_partition(total_items: u64, item_bytes: u64, per: u64) -> Self {
        PartitionLayout {
            total_items,
            item_bytes,
            items_per_partition: per,
            partitions: total_items.div_ceil(per) as usize,
        }
    }

    /// Number of buffers
    pub fn partitions(&self) -> usize {
        self.partitions
    }

    /// Items in every partition but possibly the last
    pub fn items_per_partition(&self) -> u64 {
        self.items_per_partition
    }

    /// Items across all partitions
    pub fn total_items(&self) -> u64 {
        self.total_items
    }

    /// Bytes per item
    pub fn item_bytes(&self) -> u64 {
        self.item_bytes
    }

    /// Bytes across all partitions
    pub fn total_bytes(&self) -> u64 {
        self.total_items * self.item_bytes
    }

    /// Maps a global item index to `(partition, local item index)`
    #[inline(always)]
    pub fn route(&self, index: u64) -> (usize, u64) {
        (
            (index / self.items_per_partition) as usize,
            index % self.items_per_partition,
        )
    }

    /// Global item indices held by `partition`
    pub fn partition_range(&self, partition: usize) -> Range<u64> {
        let start = partition as u64 * self.items_per_partition;
        let end = (start + self.items_per_partition).min(self.total_items);
        start..end
    }

    /// Item count of `partition`
    pub fn partition_items(&self, partition: usize) -> u64 {
        let range = self.partition_range(partition);
        range.end - range.start
    }

    /// Byte size of `partition`
    pub fn partition_bytes(&self, partition: usize) -> u64 {
        self.partition_items(partition) * self.item_bytes
    }
}

fn check_shape(total_items: u64, item_bytes: u64, max_allocation: u64) -> Result<(), MinerError> {
    if total_items == 0 || item_bytes == 0 {
        return Err(MinerError::PartitionError("empty dataset".to_string()));
    }
    if item_bytes > max_allocation {
        return Err(MinerError::PartitionError(format!(
            "a {} byte item does not fit the {} byte allocation limit",
            item_bytes, max_allocation
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_partition_when_it_fits() {
        let layout = PartitionLayout::plan(512, 64, 1 << 20, 8).unwrap();
        assert_eq!(layout.partitions(), 1);
        assert_eq!(layout.items_per_partition(), 512);
        assert_eq!(layout.route(511), (0, 511));
    }

    #[test]
    fn epoch_zero_against_quarter_gib_ceiling() {
        let items = 1_073_739_904u64 / 64;
        let layout = PartitionLayout::plan(items, 64, 256 << 20, 8).unwrap();
        assert_eq!(layout.partitions(), 4);
        assert!(layout.items_per_partition() * 64 <= 256 << 20);
        let last = layout.partitions() - 1;
        assert!(layout.partition_items(last) > 0);
    }

    #[test]
    fn ceiling_forces_extra_partition() {
        // 10 items of 64 bytes under a 192 byte ceiling: ceil(640/192) = 4
        // partitions of 3 items would be 192 bytes each, the last holding one
        let layout = PartitionLayout::plan(10, 64, 192, 8).unwrap();
        assert_eq!(layout.items_per_partition(), 3);
        assert_eq!(layout.partitions(), 4);
        assert_eq!(layout.partition_items(3), 1);

        // 160 byte ceiling: 2 items per buffer
        let layout = PartitionLayout::plan(10, 64, 160, 8).unwrap();
        assert_eq!(layout.items_per_partition(), 2);
        assert_eq!(layout.partitions(), 5);
    }

    #[test]
    fn planning_errors() {
        assert!(matches!(
            PartitionLayout::plan(10, 64, 32, 8),
            Err(MinerError::PartitionError(_))
        ));
        assert!(matches!(
            PartitionLayout::plan(100, 64, 64, 8),
            Err(MinerError::PartitionError(_))
        ));
        assert!(PartitionLayout::plan(0, 64, 1024, 8).is_err());
        assert!(PartitionLayout::with_partitions(10, 64, 0, 1024, 8).is_err());
        assert!(PartitionLayout::with_partitions(10, 64, 9, 1024, 8).is_err());
        assert!(PartitionLayout::with_partitions(10, 64, 2, 256, 8).is_err());
    }

    #[test]
    fn forced_counts_never_leave_empty_partitions() {
        let layout = PartitionLayout::with_partitions(10, 64, 6, 1 << 20, 8).unwrap();
        assert_eq!(layout.items_per_partition(), 2);
        assert_eq!(layout.partitions(), 5);
        for p in 0..layout.partitions() {
            assert!(layout.partition_items(p) > 0);
        }
    }

    #[test]
    fn routing_covers_every_index_once() {
        for n in 1..=3usize {
            let layout = PartitionLayout::with_partitions(512, 64, n, 1 << 20, 8).unwrap();
            assert_eq!(layout.partitions(), n);
            let mut seen = vec![0u32; 512];
            for p in 0..layout.partitions() {
                for (local, global) in layout.partition_range(p).enumerate() {
                    assert_eq!(layout.route(global), (p, local as u64));
                    seen[global as usize] += 1;
                }
            }
            assert!(seen.iter().all(|&c| c == 1), "{n} partitions");
            let sizes: u64 = (0..n).map(|p| layout.partition_items(p)).sum();
            assert_eq!(sizes, 512);
        }
    }

    #[test]
    fn routing_at_boundaries() {
        let layout = PartitionLayout::with_partitions(512, 64, 3, 1 << 20, 8).unwrap();
        assert_eq!(layout.items_per_partition(), 171);
        assert_eq!(layout.route(170), (0, 170));
        assert_eq!(layout.route(171), (1, 0));
        assert_eq!(layout.route(341), (1, 170));
        assert_eq!(layout.route(342), (2, 0));
        assert_eq!(layout.route(511), (2, 169));
        assert_eq!(layout.partition_bytes(2), 170 * 64);
    }
}
