//! Epoch-0 reference vectors evaluated on the host path
//!
//! The epoch-0 cache (16 MiB) is built once and shared by every test here.

use ethash_gpu_rs::ethash::keccak::{keccak_256, node_to_bytes};
use ethash_gpu_rs::ethash::seed::{epoch_from_seed, seedhash};
use ethash_gpu_rs::ethash::{Cache, DatasetParams, calc_dataset_item, hashimoto_light};
use ethash_gpu_rs::CacheRecipe;
use hex_literal::hex;
use std::sync::OnceLock;

fn epoch0_cache() -> &'static Cache {
    static CACHE: OnceLock<Cache> = OnceLock::new();
    CACHE.get_or_init(|| {
        Cache::build(&DatasetParams::for_epoch(0, CacheRecipe::Canonical).unwrap()).unwrap()
    })
}

#[test]
fn epoch0_sizes() {
    let params = DatasetParams::for_epoch(0, CacheRecipe::Canonical).unwrap();
    assert_eq!(params.cache_items(), 262_139);
    assert_eq!(params.dataset_bytes, 1_073_739_904);
    assert_eq!(epoch0_cache().len(), 262_139);
}

#[test]
fn epoch0_dataset_items() {
    let cache = epoch0_cache();
    let expected: [(u32, [u8; 64]); 5] = [
        (0, hex!("22db2229cc516c46d2210086f1ab417e0bd1c3827c5ecc6af7d3a33f8dae332bab5aa31fc58e71cff27666e81bf418775e74839743ca9d410fdf514d009bcec2")),
        (1, hex!("e5263184c4985ca0570d1ebdf507049e427dc86c7e96485739c0960a2ce4e6eb386d5aa39471876225c23c5b69443f6d5db8120fe3204cedcfefd0347f69ec1d")),
        (100, hex!("24439330984543e4a01084b9bedeac70b7785cd7016f406176bf84ddc792f50c48ed3de9a069981733f0bc19d0498128ad87536ada70334466b02ffa0a6c491b")),
        (1000, hex!("8e6094037ad186a0fde024e3ef505627e2aae8a6ffdcb8f2fd3b6a85b654db8fc3144afa2b98e5d8a45f94b0a3521cf04accaec4298b9274d4f0de7d802bed71")),
        (10000, hex!("c56b15fb809baa1aed3590f2e9e845288188246e78035f1e5bfb6e84ad3a95b011f7cf360405288985ed6a9a1c4a2ec5ce26663409eb2d187bba7b370c853e16")),
    ];
    for (index, bytes) in expected {
        assert_eq!(
            node_to_bytes(&calc_dataset_item(cache, index)),
            bytes,
            "item {index}"
        );
    }
}

#[test]
fn epoch0_hashimoto_light() {
    let cache = epoch0_cache();
    let header = keccak_256(b"test-block-header");
    assert_eq!(
        header,
        hex!("eb86189337f86720aa72a7cb4cd4dcfb2c2697bebfe3f415b8dd315174309c69")
    );
    let expected = [
        (
            hex!("26ecf95e3eace5225834b3fa45239f2b0452889e81de55129d5521f34b9db45a"),
            hex!("c87348fa7cdde8eaf514391b71c07a757198f25c9f821f0b34622d18ec1c5ba1"),
        ),
        (
            hex!("86e0628ada035a8e766c8a7e1b2b8a38eaf5d48c7f92c5271192c7bbcacb2d1f"),
            hex!("d91290b3befa73648da585adb285d2c29c0bf49bec70ff98528260f3840dabda"),
        ),
        (
            hex!("8a02ed14830a7f1dcef0b7b2398ce063d67f96eceb10892a63b1def6cc1a129f"),
            hex!("94de4d3ece8b21fe1dcd92dbf1ad741e041fed91115f1dd1afa8b01a578150e0"),
        ),
    ];
    for (nonce, (digest, result)) in expected.iter().enumerate() {
        let trace = hashimoto_light(cache, &header, nonce as u64);
        assert_eq!(&trace.digest, digest, "digest for nonce {nonce}");
        assert_eq!(&trace.result, result, "result for nonce {nonce}");
    }
}

#[test]
fn seed_schedule_round_trip() {
    assert_eq!(seedhash(0), [0u8; 32]);
    assert_eq!(seedhash(1), keccak_256(&[0u8; 32]));
    for epoch in [0, 1, 2, 17] {
        assert_eq!(epoch_from_seed(&seedhash(epoch), 32), Some(epoch));
    }
    assert_eq!(epoch_from_seed(&seedhash(40), 32), None);
}
