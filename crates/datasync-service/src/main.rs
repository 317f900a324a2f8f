// SPDX-License-Identifier: AGPL-3.0
// DataSync Service - Main entry point
//
// Background file synchronization service controlled over local IPC.

mod state;

use clap::Parser;
use datasync_core::{AppError, IpcServer};
use state::ServiceState;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "datasync-service", version, about = "DataSync background service")]
struct Args {
    /// Configuration directory (service.json, connection.json, filters.json, logs/)
    #[arg(long, env = "DATASYNC_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("datasync_service=info,datasync_core=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Service failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let config_dir = match args.config_dir {
        Some(dir) => dir,
        None => datasync_core::config_dir()?,
    };
    let state = ServiceState::new(config_dir)?;
    let service = state.settings.get();

    state.start_schedule();

    let mut server = IpcServer::bind(
        &state.endpoint(),
        state.dispatcher.clone(),
        service.ipc_timeout(),
        service.max_message_bytes,
    )?;
    tracing::info!("DataSync service {} started", env!("CARGO_PKG_VERSION"));

    tokio::spawn(watch_signals(state.shutdown.clone()));
    server.run(state.shutdown.clone()).await;

    // Stop order: connections, scheduled jobs, log writes, endpoint
    let timeout = service.shutdown_timeout();
    if !server.drain(timeout).await {
        tracing::warn!("IPC connections still open after {:?}", timeout);
    }
    state.scheduler.shutdown(timeout).await;
    if let Err(e) = state.log_store.flush().await {
        tracing::error!("Failed to flush transfer log: {}", e);
    }
    drop(server);

    tracing::info!("DataSync service stopped");
    Ok(())
}

/// Cancel `shutdown` on Ctrl-C, or SIGTERM on Unix
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl-C received"),
                    _ = terminate.recv() => tracing::info!("SIGTERM received"),
                    _ = shutdown.cancelled() => return,
                }
            }
            Err(e) => {
                tracing::warn!("Cannot listen for SIGTERM: {}", e);
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl-C received"),
                    _ = shutdown.cancelled() => return,
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Ctrl-C received"),
            _ = shutdown.cancelled() => return,
        }
    }

    shutdown.cancel();
}
