//! Error types for the indexer binary.

use lending_indexer::error::StoreError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Environment configuration error: {0}")]
    EnvConfig(#[from] envy::Error),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sync pass failed on {failed_chains} chain(s) and {failed_vaults} vault(s)")]
    SyncFailed {
        failed_chains: usize,
        failed_vaults: usize,
    },
}

pub type Result<T> = std::result::Result<T, Error>;
