//! Termination signal handling.

use tracing::info;

/// Completes when SIGINT or SIGTERM arrives. Handed to the ingress server
/// as its graceful-shutdown trigger: stop accepting, drain in-flight
/// handlers, close idle connections. Background loops run until process
/// exit; queued jobs are abandoned.
pub async fn signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint =
            signal(SignalKind::interrupt()).expect("failed to set up SIGINT handler");
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to set up SIGTERM handler");

        tokio::select! {
            _ = sigint.recv() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to set up Ctrl+C handler");
        info!("received Ctrl+C, shutting down");
    }
}
