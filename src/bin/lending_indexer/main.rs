//! Lending protocol indexer.
//!
//! Syncs vaults and positions of every configured chain into SQLite and
//! serves closed positions over HTTP.

mod config;
mod error;
mod service;

use std::{process::exit, sync::Arc, time::Duration};

use clap::Parser;
use lending_indexer::{chain::ChainRegistry, store::Store, sync::Syncer};
use tracing::{error, info};

use config::{Cli, Command, EnvConfig};
use error::Result;

#[tokio::main]
async fn main() {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Warning: Failed to load .env file: {}", e);
    }

    let cli = Cli::parse();

    // Set up logging
    if std::env::var("RUST_LOG").is_err() {
        unsafe {
            std::env::set_var("RUST_LOG", "info");
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let env_config = match EnvConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(%e, "Failed to parse environment configuration");
            exit(1);
        }
    };

    if let Err(e) = run(cli.command, env_config).await {
        error!(%e, "Indexer encountered an error, shutting down");
        exit(1);
    }
}

async fn run(command: Command, env_config: EnvConfig) -> Result<()> {
    let sync_config = env_config.sync_config()?;
    let store = Store::open(&env_config.database_path, sync_config.tx_timeout)?;
    store.migrate().await?;

    if let Command::Migrate = command {
        info!(version = store.schema_version().await?, "Migrations applied");
        return Ok(());
    }

    let chains = env_config.chains(std::env::vars())?;
    for chain in &chains {
        info!(
            chain_id = chain.chain_id(),
            name = chain.name(),
            viewer = %chain.viewer(),
            start_block = chain.start_block(),
            endpoints = chain.endpoints().len(),
            "Chain configured"
        );
    }
    let registry = Arc::new(ChainRegistry::connect(chains, sync_config.rpc_timeout));
    let syncer = Arc::new(Syncer::new(
        registry,
        store,
        sync_config,
        env_config.sync_enabled,
    ));

    match command {
        Command::Migrate => Ok(()),
        Command::Sync => service::sync_once(&syncer).await,
        Command::Serve { sync_interval_secs } => {
            service::serve(
                syncer,
                env_config.listen_addr()?,
                sync_interval_secs.map(Duration::from_secs),
            )
            .await
        }
    }
}
