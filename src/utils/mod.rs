// src/utils/mod.rs
//! Utilities module for common functionality
//!
//! This module contains shared utilities used throughout the engine,
//! including error handling, logging and hex helpers.

/// Error types and handling utilities
///
/// Contains the [`MinerError`] enum which defines all possible error conditions
/// for the engine, along with conversion implementations.
pub mod error;

/// Logging configuration and utilities
///
/// Provides logging initialization and configuration for the application,
/// including formatting and output destinations.
pub mod logging;

// Re-export for easier access
pub use error::MinerError;
pub use logging::init_logging;

/// Decodes a hex string (optionally `0x`-prefixed) into a fixed-size array
///
/// # Errors
/// Returns `MinerError::InputError` if the string is not valid hex or does
/// not decode to exactly `N` bytes.
pub fn parse_hex_array<const N: usize>(input: &str) -> Result<[u8; N], MinerError> {
    let trimmed = input.trim();
    let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = hex::decode(digits)?;
    bytes.as_slice().try_into().map_err(|_| {
        MinerError::InputError(format!("expected {} bytes, got {}", N, bytes.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefixed_and_bare_hex() {
        let a: [u8; 2] = parse_hex_array("0xbeef").unwrap();
        let b: [u8; 2] = parse_hex_array("BEEF").unwrap();
        assert_eq!(a, [0xbe, 0xef]);
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = parse_hex_array::<4>("beef").unwrap_err();
        assert!(matches!(err, MinerError::InputError(_)));
    }
}
