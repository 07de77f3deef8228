//! RFC 7807 problem-details error responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// API error type; every variant renders as a problem-details body.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// Malformed payload, missing fields or an invalid identifier.
    #[error("invalid request: {detail}")]
    BadRequest {
        /// Human-readable failure description.
        detail: String,
        /// Request path for the `instance` member.
        instance: String,
    },

    /// No subscription matched a PATCH or DELETE.
    #[error("not found: {detail}")]
    NotFound {
        /// Human-readable failure description.
        detail: String,
        /// Request path for the `instance` member.
        instance: String,
    },

    /// KV, marshalling or upstream I/O failure.
    #[error("internal server error: {detail}")]
    Internal {
        /// Human-readable failure description.
        detail: String,
        /// Request path for the `instance` member.
        instance: String,
    },
}

impl ApiError {
    /// Builds a bad-request error.
    pub fn bad_request(detail: impl Into<String>, instance: impl Into<String>) -> Self {
        Self::BadRequest {
            detail: detail.into(),
            instance: instance.into(),
        }
    }

    /// Builds a not-found error.
    pub fn not_found(detail: impl Into<String>, instance: impl Into<String>) -> Self {
        Self::NotFound {
            detail: detail.into(),
            instance: instance.into(),
        }
    }

    /// Builds an internal error.
    pub fn internal(detail: impl Into<String>, instance: impl Into<String>) -> Self {
        Self::Internal {
            detail: detail.into(),
            instance: instance.into(),
        }
    }

    /// The HTTP status code of this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The problem-details `title` member.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => "Invalid Request",
            Self::NotFound { .. } => "Not Found",
            Self::Internal { .. } => "Internal Server Error",
        }
    }
}

/// Problem-details response body.
#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    /// Problem type URI; this service always uses `about:blank`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Short human-readable summary.
    pub title: &'static str,
    /// Occurrence-specific explanation.
    pub detail: String,
    /// Request path that produced the problem.
    pub instance: String,
    /// HTTP status code, repeated in the body.
    pub status: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let title = self.title();
        let (detail, instance) = match self {
            Self::BadRequest { detail, instance }
            | Self::NotFound { detail, instance }
            | Self::Internal { detail, instance } => (detail, instance),
        };
        let body = ProblemDetails {
            kind: "about:blank",
            title,
            detail,
            instance,
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result alias for handler functions.
pub type ApiResult<T> = Result<T, ApiError>;
