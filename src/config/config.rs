// src/config/config.rs
use crate::{
    types::{BackendKind, CacheRecipe},
    utils::error::MinerError,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure for the engine and its front end
///
/// Every field has a default, so an empty file is a valid configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Compute backend ("cpu" or "opencl")
    #[serde(default)]
    pub backend: BackendKind,

    /// Host threads for the CPU grid
    /// (default: 0, one per logical CPU)
    #[serde(default)]
    pub threads: usize,

    /// Nonces evaluated per dispatch in `search` and `bench`
    /// (default: 4096)
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,

    /// Lowers the per-allocation ceiling reported by the device
    #[serde(default)]
    pub max_allocation_bytes: Option<u64>,

    /// Upper bound on DAG partitions (default: 8)
    #[serde(default = "default_max_partitions")]
    pub max_partitions: usize,

    /// Cache derivation ("canonical" or "epoch-keyed")
    #[serde(default)]
    pub cache_recipe: CacheRecipe,

    /// Directory for persisted datasets; unset disables persistence
    #[serde(default)]
    pub dataset_dir: Option<PathBuf>,

    /// Seconds between hashrate reports (default: 10)
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,

    /// OpenCL device selection
    #[serde(default)]
    pub opencl: OpenClConfig,
}

/// `[opencl]` table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpenClConfig {
    /// Case-insensitive substring of the platform name
    #[serde(default)]
    pub platform: Option<String>,

    /// Index among the devices of matching platforms
    #[serde(default)]
    pub device: usize,

    /// Local work size; unset lets the driver choose
    #[serde(default)]
    pub work_group_size: Option<usize>,
}

fn default_batch_size() -> u64 {
    4096
}

fn default_max_partitions() -> usize {
    8
}

fn default_report_interval() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Config {
            backend: BackendKind::default(),
            threads: 0,
            batch_size: default_batch_size(),
            max_allocation_bytes: None,
            max_partitions: default_max_partitions(),
            cache_recipe: CacheRecipe::default(),
            dataset_dir: None,
            report_interval_secs: default_report_interval(),
            opencl: OpenClConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded and validated configuration
    /// * `Err(MinerError)` - If file couldn't be read, parsed or validated
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let path = path.into();
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&config_str)
            .map_err(|e| MinerError::ConfigError(format!("Invalid config format: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values no engine can run with
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.batch_size == 0 {
            return Err(MinerError::ConfigError("batch_size must be at least 1".into()));
        }
        if self.max_partitions == 0 {
            return Err(MinerError::ConfigError(
                "max_partitions must be at least 1".into(),
            ));
        }
        if self.max_allocation_bytes == Some(0) {
            return Err(MinerError::ConfigError(
                "max_allocation_bytes must be positive".into(),
            ));
        }
        if self.report_interval_secs == 0 {
            return Err(MinerError::ConfigError(
                "report_interval_secs must be at least 1".into(),
            ));
        }
        if self.opencl.work_group_size == Some(0) {
            return Err(MinerError::ConfigError(
                "opencl.work_group_size must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Thread count with 0 resolved to the number of logical CPUs
    pub fn effective_threads(&self) -> usize {
        match self.threads {
            0 => num_cpus::get(),
            n => n,
        }
    }

    /// Generates a configuration template string
    ///
    /// # Arguments
    /// * `opencl` - Include the `[opencl]` device selection table
    ///
    /// # Returns
    /// String containing a commented TOML configuration template
    pub fn generate_template(opencl: bool) -> String {
        let mut template = String::new();
        template.push_str("# Ethash engine configuration\n\n");
        template.push_str("# Compute backend: cpu, opencl\n");
        template.push_str(if opencl {
            "backend = \"opencl\"\n"
        } else {
            "backend = \"cpu\"\n"
        });
        template.push_str("# Host threads for the CPU backend (0 = auto-detect)\n");
        template.push_str("threads = 0\n");
        template.push_str("# Nonces per dispatch\n");
        template.push_str("batch_size = 4096\n");
        template.push_str("# Cap on a single device allocation in bytes (omit to use the device limit)\n");
        template.push_str("# max_allocation_bytes = 268435456\n");
        template.push_str("# Maximum number of DAG buffers\n");
        template.push_str("max_partitions = 8\n");
        template.push_str("# Cache derivation: canonical, epoch-keyed\n");
        template.push_str("cache_recipe = \"canonical\"\n");
        template.push_str("# Persist generated datasets here (omit to disable)\n");
        template.push_str("# dataset_dir = \"/var/cache/ethash\"\n");
        template.push_str("# Seconds between hashrate reports\n");
        template.push_str("report_interval_secs = 10\n");

        if opencl {
            template.push_str("\n# OpenCL device selection\n");
            template.push_str("[opencl]\n");
            template.push_str("# Platform name filter, e.g. \"NVIDIA\" or \"AMD\"\n");
            template.push_str("# platform = \"NVIDIA\"\n");
            template.push_str("device = 0\n");
            template.push_str("# work_group_size = 128\n");
        }

        template
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.backend, BackendKind::Cpu);
        assert_eq!(config.batch_size, 4096);
        assert_eq!(config.max_partitions, 8);
        assert_eq!(config.cache_recipe, CacheRecipe::Canonical);
        assert!(config.dataset_dir.is_none());
        assert!(config.validate().is_ok());
        assert!(config.effective_threads() >= 1);
    }

    #[test]
    fn templates_parse() {
        for opencl in [false, true] {
            let config: Config = toml::from_str(&Config::generate_template(opencl)).unwrap();
            assert!(config.validate().is_ok());
            let expected = if opencl { BackendKind::OpenCl } else { BackendKind::Cpu };
            assert_eq!(config.backend, expected);
        }
    }

    #[test]
    fn full_file_round_trips() {
        let text = r#"
            backend = "opencl"
            threads = 3
            batch_size = 100
            max_allocation_bytes = 1048576
            max_partitions = 4
            cache_recipe = "epoch-keyed"
            dataset_dir = "/tmp/dags"

            [opencl]
            platform = "amd"
            device = 1
            work_group_size = 64
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.effective_threads(), 3);
        assert_eq!(config.max_allocation_bytes, Some(1 << 20));
        assert_eq!(config.cache_recipe, CacheRecipe::EpochKeyed);
        assert_eq!(config.opencl.platform.as_deref(), Some("amd"));
        assert_eq!(config.opencl.device, 1);
        assert_eq!(config.opencl.work_group_size, Some(64));

        let again: Config = toml::from_str(&toml::to_string(&config).unwrap()).unwrap();
        assert_eq!(again.dataset_dir, config.dataset_dir);
        assert_eq!(again.backend, config.backend);
    }

    #[test]
    fn zero_values_are_rejected() {
        let config = Config {
            batch_size: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(MinerError::ConfigError(_))));
        let config = Config {
            max_partitions: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
