//! HTTP server runner.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::problem::ApiError;
use crate::routes::create_router;
use crate::state::AppState;

/// Binds the ingress port and serves until the shutdown signal completes.
/// On shutdown the listener stops accepting, in-flight handlers drain and
/// idle connections close.
///
/// # Errors
///
/// Returns an error when the port cannot be bound or the server fails.
pub async fn serve(
    state: Arc<AppState>,
    port: u16,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), ApiError> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal(format!("failed to bind {addr}: {e}"), "/"))?;

    info!(port, "ingress listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| ApiError::internal(format!("server error: {e}"), "/"))?;

    warn!("ingress shut down");
    Ok(())
}
