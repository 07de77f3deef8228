//! Runtime parameter endpoints.

use std::sync::Arc;

use axum::extract::{OriginalUri, State};
use axum::Json;
use tracing::info;

use hmnfd_core::params::{ParamsPatch, PARAMS_KEY};
use hmnfd_core::Params;

use crate::problem::{ApiError, ApiResult};
use crate::state::AppState;

/// GET `/hmi/v{1,2}/params`: the current parameter values.
pub async fn get_params(State(state): State<Arc<AppState>>) -> Json<Params> {
    Json(state.params.read().clone())
}

/// PATCH `/hmi/v{1,2}/params`: applies a partial update, persists the
/// result for other instances, and returns the new values. `Port` and
/// `Scn_in_url` cannot change after startup.
pub async fn patch_params(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    body: String,
) -> ApiResult<Json<Params>> {
    let instance = uri.path().to_string();
    let patch: ParamsPatch = serde_json::from_str(&body)
        .map_err(|e| ApiError::bad_request(format!("error parsing parameter JSON: {e}"), &instance))?;

    let updated = {
        let mut params = state.params.write();
        params
            .apply_patch(&patch)
            .map_err(|e| ApiError::bad_request(e.to_string(), &instance))?;
        params.clone()
    };
    info!("runtime parameters updated");

    // Persist so every instance converges on the same values.
    let json = serde_json::to_string(&updated)
        .map_err(|e| ApiError::internal(e.to_string(), &instance))?;
    state
        .registry
        .kv()
        .store(PARAMS_KEY, &json)
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &instance))?;

    Ok(Json(updated))
}
