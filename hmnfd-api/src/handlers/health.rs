//! Liveness, readiness and health reporting.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::warn;

use hmnfd_engine::upstream::HSM_SUBS_KEY;
use hmnfd_store::{HEALTH_KEY, HEALTH_VALUE};
use hmnfd_telemetry::BusStatus;

use crate::state::AppState;

/// Human-readable component status report, for administrators.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// KV store reachability.
    #[serde(rename = "KvStore")]
    pub kv_store: String,
    /// Telemetry bus connection state.
    #[serde(rename = "MsgBus")]
    pub msg_bus: String,
    /// Persisted upstream subscription coverage.
    #[serde(rename = "HsmSubscriptions")]
    pub hsm_subscriptions: String,
    /// Prune map occupancy.
    #[serde(rename = "PruneMap")]
    pub prune_map: String,
    /// Worker pool occupancy.
    #[serde(rename = "WorkerPool")]
    pub worker_pool: String,
}

/// GET `/hmi/v{1,2}/liveness`: the server is up and answering.
pub async fn liveness() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// GET `/hmi/v{1,2}/readiness`: fails while the KV store is unreachable or
/// a previously working bus connection has closed; a restart is then the
/// likely fix.
pub async fn readiness(State(state): State<Arc<AppState>>) -> StatusCode {
    let mut ready = true;

    match state.registry.kv().get(HEALTH_KEY).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            warn!("readiness: KV health key missing");
            ready = false;
        }
        Err(e) => {
            warn!(error = %e, "readiness: KV health key read failed");
            ready = false;
        }
    }

    // No bus at all is a valid state; a bus that went away is not.
    if state.telemetry.bus_status() == Some(BusStatus::Closed) {
        warn!("readiness: telemetry bus connection closed");
        ready = false;
    }

    if ready {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// GET `/hmi/v{1,2}/health`: a human-readable report of every component.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let kv_store = match state.registry.kv().get(HEALTH_KEY).await {
        Ok(Some(value)) => format!("Health key value:{value}"),
        Ok(None) => "Health key not present".to_string(),
        Err(e) => format!("Error retrieving key:{e}"),
    };

    let msg_bus = match state.telemetry.bus_status() {
        Some(BusStatus::Open) => "Connected and OPEN".to_string(),
        Some(BusStatus::Closed) => "Connected and CLOSED".to_string(),
        None => "Not Connected".to_string(),
    };

    let hsm_subscriptions = match state.registry.kv().get(HSM_SUBS_KEY).await {
        Ok(Some(value)) => format!("HSM Subscription: {value}"),
        Ok(None) => "HSM Subscription key not present".to_string(),
        Err(e) => format!("HSM Subscription key retrieval error:{e}"),
    };

    let prune_map = if state.prune_map.is_empty() {
        "No contents".to_string()
    } else {
        format!("Number of items:{}", state.prune_map.len())
    };

    let worker_pool = format!(
        "Workers:{}, Jobs:{}",
        state.pool.workers(),
        state.pool.queued()
    );

    Json(HealthResponse {
        kv_store,
        msg_bus,
        hsm_subscriptions,
        prune_map,
        worker_pool,
    })
}

/// Stores the KV health sentinel; called at startup once the store opens.
///
/// # Errors
///
/// Propagates the store failure so startup can retry.
pub async fn store_health_sentinel(
    kv: &Arc<dyn hmnfd_store::KvStore>,
) -> Result<(), hmnfd_store::StoreError> {
    kv.store(HEALTH_KEY, HEALTH_VALUE).await
}
