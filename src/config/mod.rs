// src/config/mod.rs
//! Configuration management for the engine
//!
//! This module handles all configuration-related functionality including:
//! - Loading and validating configuration files
//! - Generating configuration templates
//! - OpenCL device selection settings
//!
//! The configuration uses TOML format. Command-line flags override file values.

/// Core configuration implementation
///
/// Contains the [`Config`] struct and related types that define
/// the engine's configuration structure and behavior.
pub mod config;

// Re-export key items for easy access
pub use config::{Config, OpenClConfig};

use crate::utils::error::MinerError;
use std::path::PathBuf;

/// Loads engine configuration from a TOML file
///
/// # Arguments
/// * `path` - Path to the configuration file (anything convertible to PathBuf)
///
/// # Returns
/// * `Ok(Config)` - Successfully loaded configuration
/// * `Err(MinerError)` - If the file couldn't be read, parsed or validated
pub fn load(path: impl Into<PathBuf>) -> Result<Config, MinerError> {
    Config::load(path)
}

/// Generates a commented configuration template
///
/// # Arguments
/// * `opencl` - Whether to target the OpenCL backend and include its table
///
/// # Returns
/// String containing a ready-to-use TOML configuration template
pub fn generate_template(opencl: bool) -> String {
    Config::generate_template(opencl)
}
