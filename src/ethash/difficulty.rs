// src/ethash/difficulty.rs
//! Difficulty thresholds
//!
//! A result hash wins when, read as a little-endian 256-bit integer, it is
//! strictly below the batch threshold. The filter kernels compare eight
//! 32-bit words from the most significant (word 7) down and stop at the first
//! difference; [`Threshold::words`] is the layout they receive.

use crate::utils::error::MinerError;
use crate::utils::parse_hex_array;
use ruint::aliases::U256;
use std::fmt;

/// 256-bit target, constant for one batch
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Threshold(U256);

impl Threshold {
    /// Largest threshold: every hash except `2^256 - 1` wins
    pub const MAX: Threshold = Threshold(U256::MAX);

    /// `floor(2^256 / difficulty)`, saturating to `2^256 - 1` for difficulty 1
    ///
    /// # Errors
    /// `InputError` for difficulty 0
    pub fn from_difficulty(difficulty: u64) -> Result<Self, MinerError> {
        match difficulty {
            0 => Err(MinerError::InputError("difficulty must be non-zero".to_string())),
            1 => Ok(Self::MAX),
            d => {
                let d = U256::from(d);
                // 2^256 = MAX + 1, so add one when the remainder wraps
                let quotient = U256::MAX / d;
                let remainder = U256::MAX % d;
                let carry = if remainder + U256::from(1u8) == d {
                    U256::from(1u8)
                } else {
                    U256::ZERO
                };
                Ok(Threshold(quotient + carry))
            }
        }
    }

    /// Threshold from its documented big-endian byte form
    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        Threshold(U256::from_be_bytes(bytes))
    }

    /// Threshold from 64 big-endian hex digits, optionally `0x`-prefixed
    pub fn from_hex(text: &str) -> Result<Self, MinerError> {
        Ok(Self::from_be_bytes(parse_hex_array::<32>(text)?))
    }

    /// Big-endian byte form
    pub fn to_be_bytes(&self) -> [u8; 32] {
        self.0.to_be_bytes()
    }

    /// Underlying integer
    pub fn value(&self) -> U256 {
        self.0
    }

    /// Eight little-endian 32-bit words, word 0 least significant
    pub fn words(&self) -> [u32; 8] {
        let mut words = [0u32; 8];
        for (pair, limb) in words.chunks_exact_mut(2).zip(self.0.as_limbs().iter()) {
            pair[0] = *limb as u32;
            pair[1] = (*limb >> 32) as u32;
        }
        words
    }

    /// Word-wise filter test used by the kernels
    #[inline]
    pub fn is_met_by(&self, hash: &[u8; 32]) -> bool {
        hash_below(hash, &self.words())
    }
}

/// Compares a hash (little-endian words) against threshold words, top word first
///
/// Returns true only when the hash is strictly below the threshold.
#[inline]
pub fn hash_below(hash: &[u8; 32], threshold: &[u32; 8]) -> bool {
    for k in (0..8).rev() {
        let word = u32::from_le_bytes([
            hash[4 * k],
            hash[4 * k + 1],
            hash[4 * k + 2],
            hash[4 * k + 3],
        ]);
        if word != threshold[k] {
            return word < threshold[k];
        }
    }
    false
}

impl fmt::Debug for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Threshold(0x{})", hex::encode(self.to_be_bytes()))
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.to_be_bytes()))
    }
}
