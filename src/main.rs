//! jhproxy: terminates an external SSH connection, authenticates it
//! against a JupyterHub Hub, and splices it into that user's per-user
//! back-end SSH server.

mod cli;
mod directory;
mod error;
mod health;
mod splice;
mod ssh;

use std::sync::Arc;

use clap::Parser;
use eyre::Result;
use tokio::signal::unix::{signal, SignalKind};
use tracing::info;
use warp::Filter;

use cli::Root;
use directory::jupyterhub::JupyterHub;

#[tokio::main]
async fn main() -> Result<()> {
    let root = Root::parse();
    root.init_logging()?;

    let directory = Arc::new(JupyterHub::new(root.hub_url.clone()));
    let frontend = ssh::Frontend::new(directory);

    let metrics = warp::path("metrics")
        .and_then(health::metrics)
        .or(warp::path("healthz").and_then(health::healthz));
    let metrics_addr = root.metrics_addr;

    info!(port = root.port, hub = %root.hub_url, "starting jhproxy");

    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
            Ok(())
        }
        result = frontend.run(root.port, root.host_key_dir) => result,
        () = warp::serve(metrics).run(metrics_addr) => {
            unreachable!("warp's serve future never resolves")
        }
    }
}
