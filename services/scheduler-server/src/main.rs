//! Job scheduler server.
//!
//! Serves job server polls over HTTP and runs the scheduling, liveness and
//! history compaction workers in the background.

use std::sync::Arc;

use anyhow::Result;
use sched_server::{
    api,
    compaction::{CompactionWorker, CompactionWorkerConfig},
    config,
    dispatch::JobDispatcher,
    liveness::{LivenessWorker, LivenessWorkerConfig, PingList},
    loader,
    repository::Repository,
    scheduler::{QueueScheduler, SchedulerWorker, SchedulerWorkerConfig},
    starter::QueueJobStarter,
    state::AppState,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to SCHED_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting scheduler server");
    info!(listen_addr = %config.listen_addr, "Configuration loaded");

    let repo = Repository::new()?;

    if let Some(path) = &config.snapshot_path {
        if let Err(e) = loader::load_snapshot(&repo, path) {
            error!(error = %e, path = %path.display(), "Failed to load snapshot");
            return Err(e);
        }
    }

    let scheduler = Arc::new(QueueScheduler::new());
    let ping_list = Arc::new(PingList::new());
    let dispatcher = Arc::new(JobDispatcher::new(
        repo.clone(),
        scheduler.clone(),
        Arc::new(QueueJobStarter::new()),
        ping_list.clone(),
    ));

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start scheduler worker in background
    let scheduler_worker = SchedulerWorker::new(
        repo.clone(),
        scheduler,
        SchedulerWorkerConfig {
            interval: config.scheduler_interval,
        },
    );
    let scheduler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            scheduler_worker.run(shutdown_rx).await;
        }
    });

    // Start liveness worker in background
    let liveness_worker = LivenessWorker::new(
        repo.clone(),
        ping_list.clone(),
        LivenessWorkerConfig {
            interval: config.liveness_interval,
        },
    );
    let liveness_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            liveness_worker.run(shutdown_rx).await;
        }
    });

    // Start compaction worker in background
    let compaction_worker = CompactionWorker::new(
        repo.db().clone(),
        CompactionWorkerConfig {
            interval: config.compaction_interval,
        },
    );
    let compaction_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move {
            compaction_worker.run(shutdown_rx).await;
        }
    });

    // Create application state
    let state = AppState::new(repo, dispatcher, ping_list);

    // Build and run the server
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    // Spawn the server with graceful shutdown
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    // Wait for shutdown signal (Ctrl+C)
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Err(e) = tokio::time::timeout(shutdown_timeout, scheduler_handle).await {
        warn!(error = %e, "Scheduler worker did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, liveness_handle).await {
        warn!(error = %e, "Liveness worker did not shut down in time");
    }

    if let Err(e) = tokio::time::timeout(shutdown_timeout, compaction_handle).await {
        warn!(error = %e, "Compaction worker did not shut down in time");
    }

    info!("Scheduler server shutdown complete");
    Ok(())
}
