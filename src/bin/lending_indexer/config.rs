//! Configuration for the lending indexer.
//!
//! Configuration comes from two sources:
//! - Environment variables (via .env file or shell): database, chains, limits
//! - CLI arguments: command to run and its options
//!
//! Chains are listed in `CHAIN_IDS`, each configured by variables prefixed
//! with `CHAIN_<id>_`, e.g. `CHAIN_1_RPC_URLS`.

use std::{net::SocketAddr, time::Duration};

use alloy::primitives::Address;
use clap::{Parser, Subcommand};
use lending_indexer::{
    Chain,
    sync::{DEFAULT_MAX_BLOCK_RANGE, DEFAULT_VAULT_CONCURRENCY, SyncConfig},
};
use url::Url;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

fn default_sync_enabled() -> bool {
    true
}

/// Environment configuration shared by all commands.
#[derive(Debug, serde::Deserialize)]
pub struct EnvConfig {
    /// Path of the SQLite database file
    pub database_path: String,

    /// Set to false to turn every sync pass into a no-op (default: true)
    #[serde(default = "default_sync_enabled")]
    pub sync_enabled: bool,

    /// IDs of the chains to index (comma-separated, e.g. "1,10")
    pub chain_ids: Vec<u64>,

    /// Timeout of a single RPC call in milliseconds (default: 10000)
    pub rpc_timeout_ms: Option<u64>,

    /// Timeout of a single storage transaction in milliseconds (default: 30000)
    pub tx_timeout_ms: Option<u64>,

    /// Maximal number of blocks per logs request (default: 2000)
    pub max_block_range: Option<u64>,

    /// Number of vaults synced in parallel per chain (default: 4)
    pub vault_concurrency: Option<usize>,

    /// Number of block timestamp requests per vault in flight (default: 8)
    pub timestamp_concurrency: Option<usize>,

    /// Address the HTTP API listens on (default: 0.0.0.0:8080)
    pub listen_addr: Option<String>,
}

/// Per-chain environment configuration, variables prefixed with `CHAIN_<id>_`.
#[derive(Debug, serde::Deserialize)]
pub struct ChainEnv {
    /// RPC endpoints in fallback order (comma-separated)
    pub rpc_urls: Vec<String>,

    /// First block to scan for vaults without a watermark
    pub start_block: u64,

    /// Protocol viewer contract address
    pub viewer_address: String,

    /// Human readable name (default: "chain-<id>")
    pub name: Option<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Load configuration from the given variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(vars)
    }

    /// Resolves every configured chain from the given variables.
    pub fn chains<I>(&self, vars: I) -> Result<Vec<Chain>, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if self.chain_ids.is_empty() {
            return Err(ConfigError::NoChains);
        }
        let vars = vars.into_iter().collect::<Vec<_>>();
        self.chain_ids
            .iter()
            .map(|&chain_id| {
                let env = envy::prefixed(format!("CHAIN_{chain_id}_"))
                    .from_iter::<_, ChainEnv>(vars.iter().cloned())
                    .map_err(|source| ConfigError::Chain { chain_id, source })?;
                env.into_chain(chain_id)
            })
            .collect()
    }

    pub fn sync_config(&self) -> Result<SyncConfig, ConfigError> {
        let defaults = SyncConfig::default();
        let max_block_range = self.max_block_range.unwrap_or(DEFAULT_MAX_BLOCK_RANGE);
        if max_block_range == 0 {
            return Err(ConfigError::Zero("MAX_BLOCK_RANGE"));
        }
        let vault_concurrency = self.vault_concurrency.unwrap_or(DEFAULT_VAULT_CONCURRENCY);
        if vault_concurrency == 0 {
            return Err(ConfigError::Zero("VAULT_CONCURRENCY"));
        }
        let timestamp_concurrency = self
            .timestamp_concurrency
            .unwrap_or(defaults.timestamp_concurrency);
        if timestamp_concurrency == 0 {
            return Err(ConfigError::Zero("TIMESTAMP_CONCURRENCY"));
        }
        Ok(SyncConfig {
            max_block_range,
            vault_concurrency,
            timestamp_concurrency,
            rpc_timeout: self
                .rpc_timeout_ms
                .map_or(defaults.rpc_timeout, Duration::from_millis),
            tx_timeout: self
                .tx_timeout_ms
                .map_or(defaults.tx_timeout, Duration::from_millis),
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let addr = self.listen_addr.as_deref().unwrap_or(DEFAULT_LISTEN_ADDR);
        addr.parse()
            .map_err(|_| ConfigError::InvalidListenAddr(addr.to_string()))
    }
}

impl ChainEnv {
    fn into_chain(self, chain_id: u64) -> Result<Chain, ConfigError> {
        let endpoints = self
            .rpc_urls
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(|s| {
                Url::parse(s).map_err(|source| ConfigError::InvalidRpcUrl { chain_id, source })
            })
            .collect::<Result<Vec<_>, _>>()?;
        if endpoints.is_empty() {
            return Err(ConfigError::NoRpcUrls(chain_id));
        }
        let viewer: Address = self
            .viewer_address
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidViewerAddress {
                chain_id,
                value: self.viewer_address.clone(),
            })?;
        Ok(Chain::new(
            chain_id,
            self.name.unwrap_or_else(|| format!("chain-{chain_id}")),
            viewer,
            self.start_block,
            endpoints,
        ))
    }
}

/// CLI arguments.
#[derive(Debug, Parser)]
#[command(name = "lending-indexer")]
#[command(about = "Indexer of lending protocol vaults and positions")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Apply pending database migrations and exit
    Migrate,

    /// Run a single sync pass over all chains and exit
    Sync,

    /// Serve the read API
    Serve {
        /// Run a sync pass every given number of seconds while serving
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        sync_interval_secs: Option<u64>,
    },
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No chains configured, set CHAIN_IDS")]
    NoChains,

    #[error("Chain {chain_id} configuration error: {source}")]
    Chain {
        chain_id: u64,
        source: envy::Error,
    },

    #[error("Chain {0} has no RPC URLs")]
    NoRpcUrls(u64),

    #[error("Chain {chain_id} has invalid RPC URL: {source}")]
    InvalidRpcUrl {
        chain_id: u64,
        source: url::ParseError,
    },

    #[error("Chain {chain_id} has invalid viewer address {value:?}")]
    InvalidViewerAddress { chain_id: u64, value: String },

    #[error("Invalid listen address {0:?}")]
    InvalidListenAddr(String),

    #[error("{0} cannot be zero")]
    Zero(&'static str),
}
