// src/ethash/keccak.rs
//! Keccak-f[1600] permutation and the two Ethash output configurations
//!
//! Ethash uses the original Keccak submission padding (`0x01 .. 0x80`), not the
//! NIST SHA-3 domain suffix (`0x06`). The two configurations differ only in rate:
//!
//! | output   | rate      | capacity |
//! |----------|-----------|----------|
//! | 256 bits | 136 bytes | 512 bits |
//! | 512 bits | 72 bytes  | 1024 bits|
//!
//! Every Ethash call site fits a single rate block after padding; the
//! word-level helpers below exploit that and skip the byte round trip.

use crate::ethash::{NODE_WORDS, Node};

/// Number of rounds in Keccak-f[1600]
pub const ROUNDS: usize = 24;

/// Rate in bytes of the 256-bit output configuration
pub const RATE_256: usize = 136;

/// Rate in bytes of the 512-bit output configuration
pub const RATE_512: usize = 72;

const ROUND_CONSTANTS: [u64; ROUNDS] = [
    0x0000000000000001,
    0x0000000000008082,
    0x800000000000808a,
    0x8000000080008000,
    0x000000000000808b,
    0x0000000080000001,
    0x8000000080008081,
    0x8000000000008009,
    0x000000000000008a,
    0x0000000000000088,
    0x0000000080008009,
    0x000000008000000a,
    0x000000008000808b,
    0x800000000000008b,
    0x8000000000008089,
    0x8000000000008003,
    0x8000000000008002,
    0x8000000000000080,
    0x000000000000800a,
    0x800000008000000a,
    0x8000000080008081,
    0x8000000000008080,
    0x0000000080000001,
    0x8000000080008008,
];

/// Rotation offsets indexed by lane `x + 5y`
const RHO_OFFSETS: [u32; 25] = [
    0, 1, 62, 28, 27, //
    36, 44, 6, 55, 20, //
    3, 10, 43, 25, 39, //
    41, 45, 15, 21, 8, //
    18, 2, 61, 56, 14,
];

/// Destination lane of the pi step: `(x, y) -> (y, 2x + 3y)`
const PI_DESTINATIONS: [usize; 25] = [
    0, 10, 20, 5, 15, //
    16, 1, 11, 21, 6, //
    7, 17, 2, 12, 22, //
    23, 8, 18, 3, 13, //
    14, 24, 9, 19, 4,
];

/// Keccak-f[1600] state: 25 lanes of 64 bits, lane `x + 5y`
pub type KeccakState = [u64; 25];

/// Applies the full 24-round Keccak-f[1600] permutation in place
pub fn keccak_f1600(state: &mut KeccakState) {
    for &rc in ROUND_CONSTANTS.iter() {
        // Theta
        let mut c = [0u64; 5];
        for x in 0..5 {
            c[x] = state[x] ^ state[x + 5] ^ state[x + 10] ^ state[x + 15] ^ state[x + 20];
        }
        for x in 0..5 {
            let d = c[(x + 4) % 5] ^ c[(x + 1) % 5].rotate_left(1);
            for y in 0..5 {
                state[x + 5 * y] ^= d;
            }
        }

        // Rho and pi
        let mut b = [0u64; 25];
        for i in 0..25 {
            b[PI_DESTINATIONS[i]] = state[i].rotate_left(RHO_OFFSETS[i]);
        }

        // Chi
        for y in 0..5 {
            let row = 5 * y;
            for x in 0..5 {
                state[row + x] = b[row + x] ^ (!b[row + (x + 1) % 5] & b[row + (x + 2) % 5]);
            }
        }

        // Iota
        state[0] ^= rc;
    }
}

/// Writes `message` into a fresh rate block with Keccak multi-rate padding
///
/// The message must be strictly shorter than the rate so that the `0x01`
/// marker fits; when `len == rate - 1` marker and final bit share a byte (`0x81`).
pub fn pad_block(rate: usize, message: &[u8]) -> [u8; RATE_256] {
    debug_assert!(rate <= RATE_256 && rate % 8 == 0);
    debug_assert!(message.len() < rate);
    let mut block = [0u8; RATE_256];
    block[..message.len()].copy_from_slice(message);
    block[message.len()] ^= 0x01;
    block[rate - 1] ^= 0x80;
    block
}

/// XOR-absorbs one rate-sized block into the state and permutes
fn absorb_block(state: &mut KeccakState, block: &[u8]) {
    for (lane, chunk) in state.iter_mut().zip(block.chunks_exact(8)) {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(chunk);
        *lane ^= u64::from_le_bytes(bytes);
    }
    keccak_f1600(state);
}

/// Absorbs `input` (any length), pads, and squeezes `OUT` bytes
fn sponge<const OUT: usize>(rate: usize, input: &[u8]) -> [u8; OUT] {
    let mut state = [0u64; 25];
    let mut blocks = input.chunks_exact(rate);
    for block in &mut blocks {
        absorb_block(&mut state, block);
    }
    let last = pad_block(rate, blocks.remainder());
    absorb_block(&mut state, &last[..rate]);

    let mut out = [0u8; OUT];
    for (chunk, lane) in out.chunks_mut(8).zip(state.iter()) {
        chunk.copy_from_slice(&lane.to_le_bytes()[..chunk.len()]);
    }
    out
}

/// Keccak-256 (original padding) of `input`
pub fn keccak_256(input: &[u8]) -> [u8; 32] {
    sponge::<32>(RATE_256, input)
}

/// Keccak-512 (original padding) of `input`
pub fn keccak_512(input: &[u8]) -> [u8; 64] {
    sponge::<64>(RATE_512, input)
}

/// Keccak-512 of a 64-byte node given as little-endian words
///
/// This is the inner loop of cache and DAG construction. The 64-byte message
/// occupies lanes 0..8 and the padding lands entirely in lane 8 of the 72-byte rate.
pub fn keccak_512_words(words: &Node) -> Node {
    let mut state = [0u64; 25];
    for (lane, pair) in state.iter_mut().zip(words.chunks_exact(2)) {
        *lane = u64::from(pair[0]) | (u64::from(pair[1]) << 32);
    }
    state[NODE_WORDS / 2] = 0x01 | (0x80 << 56);
    keccak_f1600(&mut state);

    let mut out = [0u32; NODE_WORDS];
    for (pair, lane) in out.chunks_exact_mut(2).zip(state.iter()) {
        pair[0] = *lane as u32;
        pair[1] = (*lane >> 32) as u32;
    }
    out
}

/// Converts little-endian bytes into a node
pub fn node_from_bytes(bytes: &[u8; 64]) -> Node {
    let mut node = [0u32; NODE_WORDS];
    for (word, chunk) in node.iter_mut().zip(bytes.chunks_exact(4)) {
        *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    node
}

/// Converts a node back into its 64 little-endian bytes
pub fn node_to_bytes(node: &Node) -> [u8; 64] {
    let mut bytes = [0u8; 64];
    for (chunk, word) in bytes.chunks_exact_mut(4).zip(node.iter()) {
        chunk.copy_from_slice(&word.to_le_bytes());
    }
    bytes
}
