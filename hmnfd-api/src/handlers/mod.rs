//! Request handlers, grouped by surface.

pub mod health;
pub mod params;
pub mod scn;
pub mod subscribe;
pub mod subscriptions;

use hmnfd_core::Subscription;

use crate::problem::{ApiError, ApiResult};

/// Parses a subscribe payload after lowercasing it, so every stored value
/// and every downstream comparison is case-insensitive by construction.
pub(crate) fn parse_subscription(body: &str, instance: &str) -> ApiResult<Subscription> {
    serde_json::from_str(&body.to_lowercase())
        .map_err(|_| ApiError::bad_request("error unmarshalling JSON payload", instance))
}
