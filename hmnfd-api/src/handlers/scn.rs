//! SCN intake from the Hardware State Manager.

use std::sync::Arc;

use axum::extract::{OriginalUri, State};
use axum::http::StatusCode;
use tracing::debug;

use hmnfd_core::Scn;

use crate::problem::{ApiError, ApiResult};
use crate::state::AppState;

/// POST `/hmi/v{1,2}/scn`: feeds an inbound SCN into the aggregation
/// cache. The payload keeps its original case here; matching lowercases a
/// working copy later so subscribers receive what HSM sent.
pub async fn post_scn(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    body: String,
) -> ApiResult<StatusCode> {
    let scn: Scn = serde_json::from_str(&body)
        .map_err(|_| ApiError::bad_request("error unmarshalling SCN JSON", uri.path()))?;

    debug!(
        components = scn.components.len(),
        state = %scn.state,
        "received SCN from HSM"
    );
    state.cache.ingest(scn).await;
    Ok(StatusCode::OK)
}
