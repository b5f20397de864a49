// src/utils/error.rs
use crate::miner::scheduler;
use serde_json;
use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

/// Main error type for the Ethash engine
///
/// Every fatal condition below the `mine_batch` boundary is one of these
/// variants. None of them is recoverable mid-operation: a failed build
/// leaves previously built datasets untouched and a failed batch is never
/// partially valid.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Invalid configuration file or parameter combination
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The selected compute device cannot run the engine
    #[error("Unsupported device: {0}")]
    UnsupportedDevice(String),

    /// The dataset does not fit in what the device has left
    #[error("Insufficient device memory: need {required} bytes, {available} bytes available")]
    InsufficientMemory {
        /// Bytes the dataset would occupy
        required: u64,
        /// Bytes the device can still hand out
        available: u64,
    },

    /// The DAG cannot be split across device allocations
    #[error("Partition error: {0}")]
    PartitionError(String),

    /// Host or device allocation failed
    #[error("Allocation failed: {0}")]
    AllocationError(String),

    /// Kernel dispatch, upload or readback failed on the device
    #[error("Device error: {0}")]
    DeviceError(String),

    /// A previous device failure invalidated the dataset buffers
    #[error("Dataset for epoch {0} was invalidated by a device failure; rebuild it")]
    DatasetInvalidated(u64),

    /// Invalid user input or parameter errors
    #[error("Invalid input: {0}")]
    InputError(String),

    /// Persisted dataset is missing, stale or corrupt
    #[error("Dataset store error: {0}")]
    StoreError(String),

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Thread communication channel errors
    #[error("Thread communication error: {0}")]
    ChannelError(String),
}

/// Converts crossbeam channel send errors for Shares into MinerError
///
/// Used when the search loop cannot hand a winning nonce to its consumer.
impl From<crossbeam_channel::SendError<scheduler::Share>> for MinerError {
    fn from(e: crossbeam_channel::SendError<scheduler::Share>) -> Self {
        MinerError::ChannelError(format!("Share send failed: {}", e))
    }
}

/// Converts hex decoding errors into MinerError
///
/// Used when invalid hex data is encountered in header hashes,
/// thresholds and seeds given on the command line.
impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::InputError(format!("Hex conversion failed: {}", e))
    }
}

/// Converts failed `try_reserve` calls into MinerError
///
/// Cache and DAG buffers are reserved fallibly so that an oversized epoch
/// surfaces as an error instead of aborting the process.
impl From<TryReserveError> for MinerError {
    fn from(e: TryReserveError) -> Self {
        MinerError::AllocationError(e.to_string())
    }
}

#[cfg(feature = "opencl")]
impl From<ocl::Error> for MinerError {
    fn from(e: ocl::Error) -> Self {
        MinerError::DeviceError(format!("OpenCL operation failed: {}", e))
    }
}
