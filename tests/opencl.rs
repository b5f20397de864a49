//! OpenCL kernels against the host reference
//!
//! Needs an OpenCL device: `cargo test --features opencl -- --ignored`

#![cfg(feature = "opencl")]

use ethash_gpu_rs::config::OpenClConfig;
use ethash_gpu_rs::engine::opencl::OpenClDevice;
use ethash_gpu_rs::engine::EngineOptions;
use ethash_gpu_rs::ethash::keccak::keccak_256;
use ethash_gpu_rs::ethash::{calc_dataset_item, hashimoto_light, DatasetParams};
use ethash_gpu_rs::{CacheRecipe, Engine, Threshold};
use hex_literal::hex;
use ruint::aliases::U256;

const GETH_HEADER: [u8; 32] =
    hex!("c9149cc0386e689d789a1c2f3d5d169a61a6218ed30e74414dc736e442ef3d1f");

fn small_params() -> DatasetParams {
    DatasetParams::custom(0, 1024, 32 * 1024, CacheRecipe::Canonical).unwrap()
}

fn gpu_engine(max_allocation: Option<u64>) -> Engine {
    let device = OpenClDevice::select(&OpenClConfig::default(), max_allocation).unwrap();
    Engine::new(Box::new(device), EngineOptions::default())
}

#[test]
#[ignore = "needs an OpenCL device"]
fn kernels_match_reference_across_partition_counts() {
    let engine = gpu_engine(None);
    let header = keccak_256(b"test-block-header");
    let nonces: Vec<u64> = (0..300).chain([1 << 32, u64::MAX]).collect();

    for partitions in 1..=3 {
        let dataset = engine
            .build_dataset_with(small_params(), Some(partitions))
            .unwrap();
        assert_eq!(dataset.layout().partitions(), partitions);

        // DAG kernel output on both sides of every partition boundary
        let layout = *dataset.layout();
        let per = layout.items_per_partition();
        let mut indices = vec![0, layout.total_items() / 2, layout.total_items() - 1];
        for p in 1..layout.partitions() as u64 {
            indices.extend([p * per - 1, p * per]);
        }
        for index in indices {
            assert_eq!(
                engine.read_item(&dataset, index).unwrap(),
                calc_dataset_item(dataset.cache(), index as u32),
                "item {index} with {partitions} partition(s)"
            );
        }

        let trace = engine.trace_nonce(&dataset, &GETH_HEADER, 0).unwrap();
        assert_eq!(
            trace.digest,
            hex!("e4073cffaef931d37117cefd9afd27ea0f1cad6a981dd2605c4a1ac97c519800")
        );

        let batch = engine.mine_batch(&dataset, &GETH_HEADER, &[0], None).unwrap();
        assert_eq!(
            batch.hashes[0],
            hex!("d3539235ee2e6f8db665c0a72169f55b7f6c605712330b778ec3944f0eb5a557")
        );

        let batch = engine.mine_batch(&dataset, &header, &nonces, None).unwrap();
        for (nonce, hash) in nonces.iter().zip(&batch.hashes) {
            assert_eq!(
                *hash,
                hashimoto_light(dataset.cache(), &header, *nonce).result,
                "nonce {nonce} with {partitions} partition(s)"
            );
        }
        assert!(engine.verify_batch(&dataset, &header, &nonces).unwrap().is_clean());
    }
}

#[test]
#[ignore = "needs an OpenCL device"]
fn filter_kernel_matches_wide_integer_comparison() {
    // 12 KiB allocations force a three-buffer plan
    let engine = gpu_engine(Some(12 * 1024));
    let dataset = engine.build_dataset_with(small_params(), None).unwrap();
    assert_eq!(dataset.layout().partitions(), 3);

    let header = [0x5au8; 32];
    let nonces: Vec<u64> = (1000..1512).collect();
    let hashes = engine.mine_batch(&dataset, &header, &nonces, None).unwrap().hashes;

    let mut sorted: Vec<U256> = hashes.iter().map(|h| U256::from_le_bytes(*h)).collect();
    sorted.sort();
    let mut thresholds = vec![
        Threshold::MAX,
        Threshold::from_difficulty(2).unwrap(),
        Threshold::from_difficulty(64).unwrap(),
        Threshold::from_be_bytes([0u8; 32]),
    ];
    for value in [sorted[0], sorted[255], sorted[511]] {
        thresholds.push(Threshold::from_be_bytes(value.to_be_bytes::<32>()));
    }

    for threshold in thresholds {
        let batch = engine
            .mine_batch(&dataset, &header, &nonces, Some(&threshold))
            .unwrap();
        assert_eq!(batch.hashes, hashes);

        let winners = batch.winners.unwrap();
        let mut found = winners.nonces.clone();
        found.sort_unstable();
        let expected: Vec<u64> = nonces
            .iter()
            .zip(&hashes)
            .filter(|(_, h)| U256::from_le_bytes(**h) < threshold.value())
            .map(|(n, _)| *n)
            .collect();
        assert_eq!(found, expected, "threshold {}", threshold);
        assert_eq!(winners.count as usize, expected.len());
    }
}
