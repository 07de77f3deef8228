//! Core error types.

use thiserror::Error;

/// Errors produced by core domain validation.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// A subscription payload failed validation.
    #[error("invalid subscription: {reason}")]
    InvalidSubscription {
        /// What was wrong with the payload.
        reason: String,
    },

    /// A component identifier is not schema-valid.
    #[error("invalid component identifier: {xname}")]
    InvalidXname {
        /// The offending identifier.
        xname: String,
    },

    /// A runtime parameter value was rejected.
    #[error("invalid parameter: {reason}")]
    InvalidParameter {
        /// What was wrong with the parameter.
        reason: String,
    },
}

impl CoreError {
    /// Convenience constructor for subscription validation failures.
    pub fn invalid_subscription(reason: impl Into<String>) -> Self {
        Self::InvalidSubscription {
            reason: reason.into(),
        }
    }
}
