//! Long running indexer service: HTTP API plus optional periodic sync.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use lending_indexer::{
    api::{ReadApi, routes},
    chain::LogSource,
    sync::{ChainOutcome, PassReport, Syncer},
    viewer::Viewer,
};
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::error::{Error, Result};

/// Runs a single pass, failing if any chain or vault could not be synced.
pub async fn sync_once<V: Viewer, L: LogSource>(syncer: &Syncer<V, L>) -> Result<()> {
    let report = syncer.run_pass().await;
    log_report(&report);
    match (report.failed_chains(), report.failed_vaults()) {
        (0, 0) => Ok(()),
        (failed_chains, failed_vaults) => Err(Error::SyncFailed {
            failed_chains,
            failed_vaults,
        }),
    }
}

/// Serves the read API until ctrl-c, syncing every `sync_interval` if given.
pub async fn serve<V, L>(
    syncer: Arc<Syncer<V, L>>,
    listen_addr: SocketAddr,
    sync_interval: Option<Duration>,
) -> Result<()>
where
    V: Viewer + 'static,
    L: LogSource + 'static,
{
    let api = ReadApi::new(syncer.registry().clone(), syncer.store().clone());
    let app = routes::router(api);
    let listener = TcpListener::bind(listen_addr).await?;
    info!(%listen_addr, "Read API listening");

    let sync_task = sync_interval.map(|period| tokio::spawn(sync_loop(syncer, period)));

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(task) = sync_task {
        task.abort();
    }
    served?;
    info!("Read API stopped");
    Ok(())
}

async fn sync_loop<V: Viewer, L: LogSource>(syncer: Arc<Syncer<V, L>>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    // A pass outlasting the period delays the next one instead of bursting
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        let report = syncer.run_pass().await;
        log_report(&report);
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

fn log_report(report: &PassReport) {
    for chain in &report.chains {
        match &chain.outcome {
            ChainOutcome::Failed(err) => {
                warn!(chain_id = chain.chain_id, %err, "Chain not synced")
            }
            ChainOutcome::Skipped => {
                info!(chain_id = chain.chain_id, "Chain skipped, pass already running")
            }
            _ => {}
        }
    }
}
