//! Startup helpers for the DocOwl web demo.
//!
//! Parses flags, wires the worker client, moderation and log store, then serves
//! until Ctrl-C.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::Notify;

use crate::config::{Args, ServerConfig};
use crate::server::{self, AppState};

/// How often idle sessions are swept.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the server (used by the `docowl-web` binary).
///
/// # Returns
/// `ExitCode::SUCCESS` on graceful shutdown, `1` on any startup or serve failure.
#[must_use]
pub fn run() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting DocOwl web demo v{}", env!("CARGO_PKG_VERSION"));

    match start(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Validate flags, build state and serve until Ctrl-C.
fn start(args: Args) -> anyhow::Result<()> {
    let config = args.into_config().context("Invalid configuration")?;
    let state = initialize(&config).context("Failed to create state")?;
    let rt = tokio::runtime::Runtime::new().context("Failed to create runtime")?;
    rt.block_on(serve(state, &config))
}

/// Initialize application state without starting the server.
///
/// # Errors
/// Returns an error if state creation fails.
pub fn initialize(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    tracing::info!(
        model = %config.model.path,
        source = ?config.model.source,
        device = %config.model.device,
        quantization = ?config.model.quantization,
        worker = %config.worker_url,
        moderation = config.moderation.name(),
        "Configuration loaded"
    );

    std::fs::create_dir_all(&config.log_dir)
        .with_context(|| format!("Failed to create log dir {}", config.log_dir.display()))?;

    AppState::from_config(config)
}

/// Probe the worker, start the session sweeper and serve until Ctrl-C.
///
/// # Errors
/// Returns an error if the server fails.
pub async fn serve(state: Arc<AppState>, config: &ServerConfig) -> anyhow::Result<()> {
    state.probe_worker().await;

    let shutdown = Arc::new(Notify::new());
    let sweeper = Arc::clone(&state.sessions)
        .spawn_sweeper(SESSION_SWEEP_INTERVAL, Arc::clone(&shutdown));

    let result = server::run_server_with_shutdown(
        state,
        config.addr,
        &config.static_dir,
        shutdown_signal(),
    )
    .await;

    shutdown.notify_one();
    if let Err(e) = sweeper.await {
        tracing::warn!("Session sweeper ended abnormally: {e}");
    }

    result.with_context(|| format!("Failed to serve on {}", config.addr))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}
