//! Daemon mode

use anyhow::{Context, Result};
use nsexec_daemon::{ContainerDaemon, LoggingRunner, PasswdUsers, SystemRunner};
use nsexec_socket::{SocketConfig, UnixSocketListener};
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

use crate::cli::ServeArgs;

pub async fn execute(args: ServeArgs) -> Result<()> {
    let config = SocketConfig::new()
        .with_path(args.socket)
        .with_mode(args.mode);

    info!(
        socket = %config.path.display(),
        mode = %format_args!("{:o}", config.mode),
        "Starting nsexec daemon"
    );

    let daemon = Arc::new(ContainerDaemon::new(
        Arc::new(UnixSocketListener::new(config)),
        Arc::new(PasswdUsers::new()),
        Arc::new(LoggingRunner::new(SystemRunner::new())),
    ));

    let mut interrupt =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

    daemon.init().await.context("Failed to initialize daemon")?;

    let runner = Arc::clone(&daemon);
    let mut run = tokio::spawn(async move { runner.run().await });

    let finished = tokio::select! {
        joined = &mut run => Some(joined),
        _ = interrupt.recv() => None,
        _ = terminate.recv() => None,
    };

    let joined = if let Some(joined) = finished {
        warn!("Listener exited on its own");
        // Releases the socket even though the listener already returned.
        if let Err(e) = daemon.stop().await {
            warn!(error = %e, "Failed to release listener");
        }
        joined
    } else {
        info!("Shutdown signal received");
        daemon.stop().await.context("Failed to stop daemon")?;
        run.await
    };

    joined.context("Daemon task panicked")?.context("Daemon failed")?;

    info!("Daemon stopped");
    Ok(())
}
