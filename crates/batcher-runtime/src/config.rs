//! # Runtime Configuration
//!
//! Resolution order, highest first:
//!
//! 1. Command-line flags
//! 2. `DA_*` environment variables (read by clap)
//! 3. The TOML file given with `--config`
//! 4. Built-in defaults
//!
//! Nothing is validated here; [`RuntimeConfig::validate`] runs before any
//! component is constructed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

use da_batcher::{BatcherConfig, ChainConfig, StorageNodeConfig, StoreBackend, StoreConfig};

/// Command-line interface of the `batcher` binary.
#[derive(Debug, Parser)]
#[command(name = "batcher", version, about = "Data-availability batcher")]
pub struct Args {
    /// TOML configuration file
    #[arg(long, env = "DA_CONFIG")]
    pub config: Option<PathBuf>,

    /// Address of the encoding service
    #[arg(long, env = "DA_ENCODER_SOCKET")]
    pub encoder_socket: Option<String>,

    /// Chain JSON-RPC endpoint
    #[arg(long, env = "DA_CHAIN_RPC_URL")]
    pub chain_rpc_url: Option<String>,

    /// Hex secp256k1 key of the batcher account
    #[arg(long, env = "DA_PRIVATE_KEY", hide_env_values = true)]
    pub private_key: Option<String>,

    /// Keep blobs in memory regardless of the configured backend
    #[arg(long, env = "DA_USE_MEMORY_DB")]
    pub use_memory_db: bool,

    /// Serve Prometheus metrics
    #[arg(long, env = "DA_ENABLE_METRICS")]
    pub enable_metrics: bool,

    /// Port of the metrics endpoint
    #[arg(long, env = "DA_METRICS_HTTP_PORT")]
    pub metrics_port: Option<u16>,

    /// Retry ceiling per blob, shared by every stage
    #[arg(long, env = "DA_MAX_NUM_RETRIES_PER_BLOB")]
    pub max_num_retries_per_blob: Option<u32>,

    /// Seconds between finalizer passes
    #[arg(long, env = "DA_FINALIZER_INTERVAL", value_name = "SECS")]
    pub finalizer_interval: Option<u64>,

    /// Encoder call timeout
    #[arg(long, env = "DA_ENCODING_TIMEOUT", value_name = "MS")]
    pub encoding_timeout: Option<u64>,

    /// Timeout of any chain read
    #[arg(long, env = "DA_CHAIN_READ_TIMEOUT", value_name = "MS")]
    pub chain_read_timeout: Option<u64>,

    /// Interval between batch cycles
    #[arg(long, env = "DA_PULL_INTERVAL", value_name = "MS")]
    pub pull_interval: Option<u64>,
}

/// Metrics endpoint settings
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub http_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            http_port: 9100,
        }
    }
}

/// Complete process configuration.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub batcher: BatcherConfig,
    pub chain: ChainConfig,
    pub nodes: StorageNodeConfig,
    pub store: StoreConfig,
    pub metrics: MetricsConfig,
}

impl RuntimeConfig {
    /// Parse a TOML document; missing tables and keys keep their defaults.
    pub fn from_toml(source: &str) -> Result<Self> {
        toml::from_str(source).context("invalid configuration file")
    }

    /// Read the file if one is given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                let source = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                Self::from_toml(&source)
                    .with_context(|| format!("failed to load {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Resolve the full configuration for `args`.
    pub fn resolve(args: &Args) -> Result<Self> {
        let mut config = Self::load(args.config.as_deref())?;
        config.apply(args);
        Ok(config)
    }

    /// Overlay flags and environment values that were actually given.
    pub fn apply(&mut self, args: &Args) {
        if let Some(socket) = &args.encoder_socket {
            self.batcher.encoder_socket = socket.clone();
        }
        if let Some(url) = &args.chain_rpc_url {
            self.chain.rpc_url = url.clone();
        }
        if let Some(key) = &args.private_key {
            self.chain.private_key = key.clone();
        }
        if args.use_memory_db {
            self.store.backend = StoreBackend::Memory;
        }
        if args.enable_metrics {
            self.metrics.enabled = true;
        }
        if let Some(port) = args.metrics_port {
            self.metrics.http_port = port;
        }
        if let Some(retries) = args.max_num_retries_per_blob {
            self.batcher.max_num_retries_per_blob = retries;
        }
        if let Some(secs) = args.finalizer_interval {
            self.batcher.finalizer_interval_secs = secs;
        }
        if let Some(ms) = args.encoding_timeout {
            self.batcher.timeouts.encoding_timeout_ms = ms;
        }
        if let Some(ms) = args.chain_read_timeout {
            self.batcher.timeouts.chain_read_timeout_ms = ms;
        }
        if let Some(ms) = args.pull_interval {
            self.batcher.pull_interval_ms = ms;
        }
    }

    /// Startup checks. The encoder socket is checked first so a bare
    /// invocation reports it rather than the chain settings.
    pub fn validate(&self) -> Result<()> {
        self.batcher
            .validate()
            .context("invalid batcher configuration")?;
        self.chain.validate().context("invalid chain configuration")?;
        if self.metrics.enabled && self.metrics.http_port == 0 {
            anyhow::bail!("metrics.http_port must be greater than zero");
        }
        Ok(())
    }
}
