// crates/server/src/main.rs
//! seqrelay server binary.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use seqrelay_broker::Broker;
use seqrelay_server::{create_app, init_metrics, AppState, Cli, FastaIntakeRunner, SearchConfigStore};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    seqrelay_observability::init_tracing(cli.log_json)?;
    init_metrics();

    tokio::fs::create_dir_all(&cli.results_dir)
        .await
        .with_context(|| format!("creating results dir {}", cli.results_dir.display()))?;

    let search_config = SearchConfigStore::new(cli.config_path.clone());
    let config = search_config
        .load()
        .await
        .with_context(|| format!("loading search config {}", cli.config_path.display()))?;
    info!(program = %config.program, database = %config.database, "search config loaded");

    let broker_config = cli.broker_config();
    info!(retention_secs = broker_config.retention.as_secs(), "broker configured");
    let state = AppState::new(
        Broker::new(broker_config),
        Arc::new(FastaIntakeRunner::new(cli.results_dir.clone())),
        search_config,
        cli.results_dir.clone(),
    );

    let static_dir = cli.static_dir();
    match &static_dir {
        Some(dir) => info!(dir = %dir.display(), "serving static files"),
        None => info!("no static dir, API only"),
    }
    let app = create_app(state, static_dir);

    let addr = cli.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("seqrelay v{} listening on {addr}", env!("CARGO_PKG_VERSION"));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
