//! Benchmark configuration, layered with the usual precedence:
//! defaults < TOML file < `KMERHASH_` env vars < CLI overrides.
//!
//! # Example config file (kmerhash.toml)
//! ```toml
//! ht_type = "tiered"
//! ht_size = 1048576
//! num_threads = 8
//! skew = 0.99
//! ```

use std::fmt;
use std::path::PathBuf;

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::hashing::HasherKind;
use crate::probe::ProbeStrategy;

/// Which table topology the benchmark drives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TableKind {
    /// One CAS table shared by all threads.
    #[default]
    Shared,
    /// One private table per thread.
    Partitioned,
    /// Shared primary region with an overflow region.
    Tiered,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TableKind::Shared => "shared",
            TableKind::Partitioned => "partitioned",
            TableKind::Tiered => "tiered",
        };
        f.write_str(name)
    }
}

/// Full benchmark configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Table topology.
    pub ht_type: TableKind,
    /// Requested slot capacity (rounded up to a power of two).
    pub ht_size: u64,
    /// Target fill percentage driving how many distinct keys are inserted.
    pub ht_fill: u32,
    /// Worker thread count.
    pub num_threads: u32,
    /// How many times the key set is inserted (aggregation rounds).
    pub insert_factor: u64,
    /// Zipfian skew; 0 selects the uniform counter workload.
    pub skew: f64,
    /// Seed for synthetic key generation.
    pub seed: u64,
    /// Hash strategy shared by all handles.
    pub hasher: HasherKind,
    /// Find-path probe strategy.
    pub probe: ProbeStrategy,
    /// Bypass batching and the prefetch pipeline (baseline mode).
    pub no_prefetch: bool,
    /// Sample per-request pipeline latency.
    pub collect_latency: bool,
    /// Thread placement policy, consumed by an upstream launcher. The
    /// table core carries it but does not interpret it.
    pub numa_split: u32,
    /// Dump the table contents here after the run.
    pub ht_file: Option<PathBuf>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            ht_type: TableKind::default(),
            ht_size: 1 << 20,
            ht_fill: 75,
            num_threads: 4,
            insert_factor: 1,
            skew: 0.0,
            seed: 0x6b6d_6572,
            hasher: HasherKind::default(),
            probe: ProbeStrategy::default(),
            no_prefetch: false,
            collect_latency: false,
            numa_split: 0,
            ht_file: None,
        }
    }
}

impl BenchConfig {
    /// Load configuration with precedence: CLI > env > file > defaults.
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(BenchConfig::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed("KMERHASH_"));
        figment = figment.merge(Serialized::defaults(overrides));
        figment.extract().map_err(ConfigError::from)
    }

    /// Load from environment and optional file only.
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    /// Distinct keys the run inserts, derived from capacity and fill.
    pub fn num_keys(&self) -> u64 {
        let capacity = self.ht_size.next_power_of_two();
        capacity * u64::from(self.ht_fill.min(100)) / 100
    }
}

/// CLI values layered on top of file and environment configuration. Only
/// present fields override.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ht_type: Option<TableKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ht_size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ht_fill: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_threads: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_factor: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skew: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hasher: Option<HasherKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeStrategy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_prefetch: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collect_latency: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ht_file: Option<PathBuf>,
}

/// Configuration loading failure.
#[derive(Debug)]
pub struct ConfigError(figment::Error);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self(err)
    }
}
