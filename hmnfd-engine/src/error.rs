//! Pipeline error types.

use thiserror::Error;

/// Errors produced by the notification pipeline.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An outbound HTTP request failed at the transport level.
    #[error("http request to {url} failed: {reason}")]
    Http {
        /// Request target.
        url: String,
        /// Transport failure description.
        reason: String,
    },

    /// The State Manager answered with an unexpected status.
    #[error("state manager returned status {status}")]
    UpstreamStatus {
        /// The HTTP status code.
        status: u16,
    },
}
