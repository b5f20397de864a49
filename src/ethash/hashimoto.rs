// src/ethash/hashimoto.rs
//! Per-nonce Hashimoto evaluation
//!
//! The walk is written against an item lookup closure so the same code serves
//! the light path (items recomputed from the cache), the CPU grid (items read
//! through the partition routing) and the debug trace hook.

use crate::ethash::cache::Cache;
use crate::ethash::dataset::calc_dataset_item;
use crate::ethash::keccak::{keccak_256, keccak_512, node_from_bytes};
use crate::ethash::{ACCESSES, MIX_WORDS, NODE_WORDS, Node, fnv, fnv_words};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Every intermediate of one Hashimoto evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashimotoTrace {
    /// Header hash the nonce was evaluated against
    #[serde(with = "hex32")]
    pub header: [u8; 32],
    /// Candidate nonce
    pub nonce: u64,
    /// `K512(header || nonce_le)`
    pub seed: Node,
    /// Mix after the 64 DAG accesses
    pub mix: [u32; MIX_WORDS],
    /// Compressed mix
    pub cmix: [u32; 8],
    /// Compressed mix as bytes (the "mix digest")
    #[serde(with = "hex32")]
    pub digest: [u8; 32],
    /// `K256(seed || cmix)`, the value compared against the threshold
    #[serde(with = "hex32")]
    pub result: [u8; 32],
}

/// Seeds the walk: Keccak-512 of the header followed by the nonce bytes
///
/// The nonce travels big-endian on the wire and is byte-reversed before
/// hashing, so the hashed bytes are its little-endian encoding.
pub fn seed_node(header: &[u8; 32], nonce: u64) -> Node {
    let mut input = [0u8; 40];
    input[..32].copy_from_slice(header);
    input[32..].copy_from_slice(&nonce.to_le_bytes());
    node_from_bytes(&keccak_512(&input))
}

/// Runs Hashimoto for one nonce
///
/// # Arguments
/// * `header` - 32-byte header hash
/// * `nonce` - Candidate nonce
/// * `dataset_items` - Number of 64-byte DAG items (even)
/// * `lookup` - Returns DAG item `i`
///
/// # Returns
/// The full trace; `result` is the proof-of-work output
pub fn hashimoto<F>(header: &[u8; 32], nonce: u64, dataset_items: u64, mut lookup: F) -> HashimotoTrace
where
    F: FnMut(u32) -> Node,
{
    let seed = seed_node(header, nonce);
    let rows = (dataset_items / 2) as u32;

    let mut mix = [0u32; MIX_WORDS];
    mix[..NODE_WORDS].copy_from_slice(&seed);
    mix[NODE_WORDS..].copy_from_slice(&seed);

    for a in 0..ACCESSES {
        let p = (fnv(a ^ seed[0], mix[a as usize % MIX_WORDS]) % rows) * 2;
        // Both halves of the page are fetched before the mix is touched
        let lo = lookup(p);
        let hi = lookup(p + 1);
        fnv_words(&mut mix[..NODE_WORDS], &lo);
        fnv_words(&mut mix[NODE_WORDS..], &hi);
    }

    let mut cmix = [0u32; 8];
    for (k, c) in cmix.iter_mut().enumerate() {
        let w = &mix[4 * k..4 * k + 4];
        *c = fnv(fnv(fnv(w[0], w[1]), w[2]), w[3]);
    }

    let mut digest = [0u8; 32];
    for (chunk, word) in digest.chunks_exact_mut(4).zip(cmix.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }

    let mut tail = [0u8; 96];
    for (chunk, word) in tail[..64].chunks_exact_mut(4).zip(seed.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    tail[64..].copy_from_slice(&digest);

    HashimotoTrace {
        header: *header,
        nonce,
        seed,
        mix,
        cmix,
        digest,
        result: keccak_256(&tail),
    }
}

/// Hashimoto with every DAG item recomputed from the cache
///
/// Slow (512 item derivations per nonce) but needs no DAG; used to verify
/// device output and single shares.
pub fn hashimoto_light(cache: &Cache, header: &[u8; 32], nonce: u64) -> HashimotoTrace {
    let items = cache.params().dataset_items();
    hashimoto(header, nonce, items, |i| calc_dataset_item(cache, i))
}

mod hex32 {
    use super::*;
    use serde::de::Error;

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 32], D::Error> {
        let text = String::deserialize(d)?;
        let raw = hex::decode(text.trim_start_matches("0x")).map_err(D::Error::custom)?;
        raw.try_into()
            .map_err(|_| D::Error::custom("expected 32 bytes of hex"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ethash::{CacheRecipe, DatasetParams};
    use hex_literal::hex;

    fn small_cache() -> Cache {
        let params = DatasetParams::custom(0, 1024, 32 * 1024, CacheRecipe::Canonical).unwrap();
        Cache::build(&params).unwrap()
    }

    #[test]
    fn reference_small_vector() {
        let cache = small_cache();
        let header = hex!("c9149cc0386e689d789a1c2f3d5d169a61a6218ed30e74414dc736e442ef3d1f");
        let trace = hashimoto_light(&cache, &header, 0);
        assert_eq!(
            trace.digest,
            hex!("e4073cffaef931d37117cefd9afd27ea0f1cad6a981dd2605c4a1ac97c519800")
        );
        assert_eq!(
            trace.result,
            hex!("d3539235ee2e6f8db665c0a72169f55b7f6c605712330b778ec3944f0eb5a557")
        );
    }

    #[test]
    fn small_dataset_nonce_sweep() {
        let cache = small_cache();
        let header = keccak_256(b"test-block-header");
        let expected = [
            (
                hex!("97d644172942bb63aacf3d2c28e0dad315811123a79220bebb0f808277adb9ad"),
                hex!("f936d5f5a19312b6d7e2931d5313570755413847fc6c11f10a8c1dcaf6f4494b"),
            ),
            (
                hex!("34718d0e6db94f8d5721ab07dc3fdb0eb1481f7f5a18b319a5007caa3489a9b5"),
                hex!("23aa60ec2648ac20e91927e2f7388f33285e1c2e00253904b814c7eedd1da8d1"),
            ),
            (
                hex!("0858237ce84f6d1faa8575dc43a1ea8e39b0238dd26706fe92568f0343b6508d"),
                hex!("64e17a86d0898e14858a8cfc733619e2af90aee8c1906a23e2738999dfb602a9"),
            ),
        ];
        for (nonce, (digest, result)) in expected.iter().enumerate() {
            let trace = hashimoto_light(&cache, &header, nonce as u64);
            assert_eq!(&trace.digest, digest, "digest for nonce {nonce}");
            assert_eq!(&trace.result, result, "result for nonce {nonce}");
        }
    }

    #[test]
    fn precomputed_lookup_matches_light() {
        let cache = small_cache();
        let items = cache.params().dataset_items();
        let dag: Vec<Node> = (0..items as u32).map(|i| calc_dataset_item(&cache, i)).collect();
        let header = [7u8; 32];
        for nonce in [0u64, 9, u64::MAX] {
            let full = hashimoto(&header, nonce, items, |i| dag[i as usize]);
            assert_eq!(full, hashimoto_light(&cache, &header, nonce));
        }
    }

    #[test]
    fn trace_serializes_hex_fields() {
        let trace = hashimoto_light(&small_cache(), &[0u8; 32], 5);
        let json = serde_json::to_string(&trace).unwrap();
        assert!(json.contains(&hex::encode(trace.result)));
        let back: HashimotoTrace = serde_json::from_str(&json).unwrap();
        assert_eq!(back, trace);
    }
}
