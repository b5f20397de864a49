// src/cli/commands.rs
use crate::config::{self, Config};
use crate::ethash::seed::{MAX_RESOLVED_EPOCH, epoch_from_seed};
use crate::ethash::{DatasetParams, EPOCH_LENGTH, Threshold};
use crate::types::{BackendKind, CacheRecipe};
use crate::utils::{MinerError, parse_hex_array};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Ethash GPU engine CLI - data-parallel Ethash/Hashimoto evaluation
#[derive(Parser, Debug)]
#[command(name = "ethash-gpu-rs")]
#[command(version, about, long_about = None)]
pub struct Commands {
    /// The action to perform
    #[command(subcommand)]
    pub action: Action,
}

/// Top-level commands
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Measure hashrate on a freshly built dataset
    Bench(BenchOptions),

    /// Hash explicit nonces and print the results
    Hash(HashOptions),

    /// Print every intermediate of one nonce as JSON
    Trace(TraceOptions),

    /// Cross-check device hashes against the host reference
    Verify(VerifyOptions),

    /// Search a nonce range for results below a threshold
    Search(SearchOptions),

    /// Show sizes and seed hash of an epoch
    Epoch(EpochOptions),

    /// Generate configuration file template
    Config(ConfigOptions),
}

/// Engine selection, shared by every command that builds a dataset
#[derive(Args, Debug, Clone, Default)]
pub struct EngineArgs {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Compute backend (overrides config)
    #[arg(short, long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Host threads for the CPU backend (overrides config)
    #[arg(short, long)]
    pub threads: Option<usize>,

    /// Per-allocation ceiling in bytes (overrides config)
    #[arg(long)]
    pub max_allocation: Option<u64>,

    /// Upper bound on DAG partitions (overrides config)
    #[arg(long)]
    pub max_partitions: Option<usize>,

    /// Cache derivation (overrides config)
    #[arg(long, value_enum)]
    pub recipe: Option<CacheRecipe>,

    /// Directory for persisted datasets (overrides config)
    #[arg(long)]
    pub dataset_dir: Option<PathBuf>,
}

impl EngineArgs {
    /// Loads the config file (or defaults) and applies the flag overrides
    pub fn resolve(&self) -> Result<Config, MinerError> {
        let mut config = match &self.config {
            Some(path) => config::load(path)?,
            None => Config::default(),
        };
        // Apply CLI overrides
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(threads) = self.threads {
            config.threads = threads;
        }
        if let Some(max) = self.max_allocation {
            config.max_allocation_bytes = Some(max);
        }
        if let Some(max) = self.max_partitions {
            config.max_partitions = max;
        }
        if let Some(recipe) = self.recipe {
            config.cache_recipe = recipe;
        }
        if let Some(dir) = &self.dataset_dir {
            config.dataset_dir = Some(dir.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

/// Which dataset to build
#[derive(Args, Debug, Clone, Default)]
pub struct DatasetArgs {
    /// Epoch number (default: 0)
    #[arg(short, long, conflicts_with_all = ["block", "seed"])]
    pub epoch: Option<u64>,

    /// Block number, converted to its epoch
    #[arg(long, conflicts_with = "seed")]
    pub block: Option<u64>,

    /// Seed hash (hex), resolved to its epoch
    #[arg(long)]
    pub seed: Option<String>,

    /// Explicit cache size in bytes instead of the epoch's canonical size
    #[arg(long, requires = "dataset_bytes")]
    pub cache_bytes: Option<u64>,

    /// Explicit dataset size in bytes instead of the epoch's canonical size
    #[arg(long, requires = "cache_bytes")]
    pub dataset_bytes: Option<u64>,

    /// Force a partition count instead of the minimal plan
    #[arg(short, long)]
    pub partitions: Option<usize>,
}

impl DatasetArgs {
    /// Epoch selected by `--epoch`, `--block` or `--seed`
    pub fn epoch(&self) -> Result<u64, MinerError> {
        if let Some(epoch) = self.epoch {
            return Ok(epoch);
        }
        if let Some(block) = self.block {
            return Ok(block / EPOCH_LENGTH);
        }
        if let Some(seed) = &self.seed {
            let seed = parse_hex_array::<32>(seed)?;
            return epoch_from_seed(&seed, MAX_RESOLVED_EPOCH).ok_or_else(|| {
                MinerError::InputError(format!(
                    "seed is not among the first {} epochs",
                    MAX_RESOLVED_EPOCH
                ))
            });
        }
        Ok(0)
    }

    /// Dataset parameters for the selected epoch
    pub fn params(&self, recipe: CacheRecipe) -> Result<DatasetParams, MinerError> {
        let epoch = self.epoch()?;
        match (self.cache_bytes, self.dataset_bytes) {
            (Some(cache), Some(dataset)) => DatasetParams::custom(epoch, cache, dataset, recipe),
            _ => DatasetParams::for_epoch(epoch, recipe),
        }
    }
}

/// Target for commands that filter results
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// 256-bit threshold as big-endian hex
    #[arg(long, conflicts_with = "difficulty")]
    pub threshold: Option<String>,

    /// Difficulty, converted to threshold = 2^256 / difficulty
    #[arg(long)]
    pub difficulty: Option<u64>,
}

impl TargetArgs {
    /// Resolved threshold, if any was given
    pub fn threshold(&self) -> Result<Option<Threshold>, MinerError> {
        match (&self.threshold, self.difficulty) {
            (Some(hex), _) => Threshold::from_hex(hex).map(Some),
            (None, Some(difficulty)) => Threshold::from_difficulty(difficulty).map(Some),
            (None, None) => Ok(None),
        }
    }
}

/// Options for the hashrate benchmark
#[derive(Parser, Debug)]
pub struct BenchOptions {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub engine: EngineArgs,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub dataset: DatasetArgs,

    /// Duration of benchmark in seconds
    #[arg(short, long, default_value_t = 30)]
    pub duration: u64,

    /// Nonces per dispatch (overrides config)
    #[arg(long)]
    pub batch_size: Option<u64>,
}

/// Options for hashing explicit nonces
#[derive(Parser, Debug)]
pub struct HashOptions {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub engine: EngineArgs,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub dataset: DatasetArgs,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub target: TargetArgs,

    /// 32-byte header hash (hex)
    #[arg(long)]
    pub header: String,

    /// Nonces to evaluate (comma separated)
    #[arg(short, long, value_delimiter = ',', required = true)]
    pub nonces: Vec<u64>,

    /// Evaluate on the host from the cache only, without building a DAG
    #[arg(long)]
    pub light: bool,
}

/// Options for tracing one nonce
#[derive(Parser, Debug)]
pub struct TraceOptions {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub engine: EngineArgs,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub dataset: DatasetArgs,

    /// 32-byte header hash (hex)
    #[arg(long)]
    pub header: String,

    /// Nonce to trace
    #[arg(short, long)]
    pub nonce: u64,

    /// Read DAG items from the cache instead of the device
    #[arg(long)]
    pub light: bool,

    /// Write the trace to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Options for cross-validation
#[derive(Parser, Debug)]
pub struct VerifyOptions {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub engine: EngineArgs,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub dataset: DatasetArgs,

    /// 32-byte header hash (hex, default: all zeros)
    #[arg(long)]
    pub header: Option<String>,

    /// First nonce checked
    #[arg(long, default_value_t = 0)]
    pub start: u64,

    /// Number of consecutive nonces checked
    #[arg(long, default_value_t = 256)]
    pub count: u64,
}

/// Options for a threshold search
#[derive(Parser, Debug)]
pub struct SearchOptions {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub engine: EngineArgs,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub dataset: DatasetArgs,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub target: TargetArgs,

    /// 32-byte header hash (hex)
    #[arg(long)]
    pub header: String,

    /// First nonce searched
    #[arg(long, default_value_t = 0)]
    pub start: u64,

    /// Stop after this many nonces (default: run until killed)
    #[arg(long)]
    pub max_nonces: Option<u64>,

    /// Nonces per dispatch (overrides config)
    #[arg(long)]
    pub batch_size: Option<u64>,
}

/// Options for epoch information
#[derive(Parser, Debug)]
pub struct EpochOptions {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub dataset: DatasetArgs,

    /// Cache derivation
    #[arg(long, value_enum, default_value_t = CacheRecipe::Canonical)]
    pub recipe: CacheRecipe,
}

/// Options for generating configuration files
#[derive(Parser, Debug)]
pub struct ConfigOptions {
    /// Output file path
    #[arg(short, long, default_value = "config.toml")]
    pub output: PathBuf,

    /// Target the OpenCL backend and include its device table
    #[arg(long)]
    pub opencl: bool,
}
