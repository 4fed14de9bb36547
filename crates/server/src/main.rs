// crates/server/src/main.rs
//! Visiontrain server binary.
//!
//! Loads the persisted job table, serves the API and shuts down cleanly:
//! open streams receive `server_shutdown`, running jobs are cancelled and
//! the table is written one last time.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use visiontrain_server::jobs::{JobManager, JobStore};
use visiontrain_server::sse::{spawn_system_publisher, BroadcastHub};
use visiontrain_server::training::{SimulatedTrainer, Trainer, YoloTrainer};
use visiontrain_server::{create_app, init_metrics, AppState, RunnerKind, ServerConfig};

/// How long running jobs get to observe cancellation on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

fn build_trainer(config: &ServerConfig) -> Arc<dyn Trainer> {
    match config.runner {
        RunnerKind::Simulated => Arc::new(
            SimulatedTrainer::new(config.sim_epoch_delay).with_models_dir(config.models_dir()),
        ),
        RunnerKind::Yolo => Arc::new(YoloTrainer::new(
            config.python.clone(),
            config.outputs_dir(),
            config.models_dir(),
        )),
    }
}

/// Resolves on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl-C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,visiontrain_server=info,visiontrain=info")),
        )
        .compact()
        .init();

    let config = ServerConfig::from_env();
    config
        .ensure_dirs()
        .with_context(|| format!("creating data directories under {}", config.data_dir.display()))?;

    init_metrics();

    eprintln!("\nvisiontrain v{}\n", env!("CARGO_PKG_VERSION"));

    let hub = Arc::new(BroadcastHub::new());
    let trainer = build_trainer(&config);
    tracing::info!(runner = trainer.id(), data_dir = %config.data_dir.display(), "Using trainer");

    let jobs = JobManager::open(
        JobStore::new(config.jobs_file()),
        trainer,
        Arc::clone(&hub),
        config.max_concurrent_jobs,
    )
    .await
    .context("loading job table")?;

    let publisher_stop = CancellationToken::new();
    let publisher = spawn_system_publisher(
        Arc::clone(&jobs),
        Arc::clone(&hub),
        config.system_interval,
        publisher_stop.clone(),
    );

    let state = AppState::new(Arc::clone(&jobs), &config);
    let app = create_app(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    eprintln!("  \u{2192} http://{addr}\n");
    tracing::info!(%addr, max_concurrent_jobs = config.max_concurrent_jobs, "Server listening");

    // Open SSE responses only end once the hub is closed.
    let shutdown_hub = Arc::clone(&hub);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            shutdown_hub.close();
        })
        .await?;

    publisher_stop.cancel();
    if let Err(e) = publisher.await {
        tracing::warn!(error = %e, "System publisher task ended abnormally");
    }
    jobs.shutdown(SHUTDOWN_GRACE).await;
    tracing::info!("Shutdown complete");
    Ok(())
}
