//! v1 `/subscribe` handlers: the subscriber identity rides in the body.

use std::sync::Arc;

use axum::extract::{OriginalUri, State};
use axum::http::StatusCode;
use tracing::{debug, info, warn};

use hmnfd_core::{Subscription, SubscriptionDelete, Xname};
use hmnfd_store::registry::{make_key_v1, parse_key};
use hmnfd_store::SubscriptionRecord;

use super::parse_subscription;
use crate::problem::{ApiError, ApiResult};
use crate::state::AppState;

/// POST `/hmi/v1/subscribe`: creates a new subscription. A subscription
/// with the same identity and selectors already on record is rejected.
pub async fn post_subscribe(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    body: String,
) -> ApiResult<StatusCode> {
    let instance = uri.path().to_string();
    let sub = parse_subscription(&body, &instance)?;
    sub.validate_v1()
        .map_err(|e| ApiError::bad_request(e.to_string(), &instance))?;

    let (owner, _) = Subscription::split_subscriber(&sub.subscriber);
    if !Xname::is_valid(&owner) {
        // An invalid owner could never be pruned when it goes away.
        warn!(owner = %owner, "rejecting subscription with invalid owner");
        return Err(ApiError::bad_request(
            "Subscriber field is not a valid XName",
            &instance,
        ));
    }

    let key = make_key_v1(&sub);
    let existing = state
        .registry
        .get(&key)
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &instance))?;
    if existing.is_some() {
        return Err(ApiError::bad_request(
            "subscription exists, cannot modify in POST operation",
            &instance,
        ));
    }

    state
        .registry
        .put(&key, &sub.url, &sub.components)
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &instance))?;
    info!(subscriber = %sub.subscriber, "subscription created");

    forward_upstream(&state, sub).await;
    Ok(StatusCode::OK)
}

/// PATCH `/hmi/v1/subscribe`: replaces the record matching the payload's
/// identity and URL. When the selector set changed, the old key is deleted
/// and a new one created.
pub async fn patch_subscribe(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    body: String,
) -> ApiResult<StatusCode> {
    let instance = uri.path().to_string();
    let sub = parse_subscription(&body, &instance)?;
    sub.validate_v1()
        .map_err(|e| ApiError::bad_request(e.to_string(), &instance))?;

    let (owner, _) = Subscription::split_subscriber(&sub.subscriber);
    let pairs = state
        .registry
        .scan_owner(&owner)
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &instance))?;

    let mut matched = false;
    for pair in pairs {
        let Some(parsed) = parse_key(&pair.key) else {
            continue;
        };
        let record: SubscriptionRecord = serde_json::from_str(&pair.value)
            .map_err(|e| ApiError::internal(e.to_string(), &instance))?;

        if parsed.subscriber_id() != sub.subscriber || record.url != sub.url {
            continue;
        }

        let new_key = make_key_v1(&sub);
        if new_key != pair.key {
            debug!(old = %pair.key, new = %new_key, "replacing subscription key");
            state
                .registry
                .delete(&pair.key)
                .await
                .map_err(|e| ApiError::internal(e.to_string(), &instance))?;
        }
        state
            .registry
            .put(&new_key, &sub.url, &sub.components)
            .await
            .map_err(|e| ApiError::internal(e.to_string(), &instance))?;
        matched = true;
        break;
    }

    if !matched {
        return Err(ApiError::not_found(
            "no matching subscription for PATCH",
            &instance,
        ));
    }

    forward_upstream(&state, sub).await;
    Ok(StatusCode::OK)
}

/// DELETE `/hmi/v1/subscribe`: removes every record whose identity and
/// delivery URL match the payload. Removed identities enter the prune map
/// so queued deliveries are dropped too.
pub async fn delete_subscribe(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    body: String,
) -> ApiResult<StatusCode> {
    let instance = uri.path().to_string();
    let del: SubscriptionDelete = serde_json::from_str(&body)
        .map_err(|_| ApiError::bad_request("error unmarshalling JSON payload", &instance))?;

    if del.subscriber.is_empty() {
        return Err(ApiError::bad_request(
            "missing Subscriber field in request",
            &instance,
        ));
    }
    if del.url.is_empty() {
        return Err(ApiError::bad_request(
            "missing Url field in request",
            &instance,
        ));
    }

    let want_id = del.subscriber.to_lowercase();
    let want_url = del.url.to_lowercase();

    let pairs = state
        .registry
        .scan_all()
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &instance))?;

    let mut matched = false;
    for pair in pairs {
        let Some(parsed) = parse_key(&pair.key) else {
            continue;
        };
        let id = parsed.subscriber_id();
        if id != want_id {
            continue;
        }
        let Ok(record) = serde_json::from_str::<SubscriptionRecord>(&pair.value) else {
            continue;
        };
        if record.url.to_lowercase() != want_url {
            continue;
        }

        match state.registry.delete(&pair.key).await {
            Ok(()) => {
                state.prune_map.insert(id.clone());
                matched = true;
                info!(subscriber = %id, "subscription deleted");
            }
            Err(e) => warn!(key = %pair.key, error = %e, "key not deleted"),
        }
    }

    if !matched {
        return Err(ApiError::not_found(
            "no matching subscription for DELETE",
            &instance,
        ));
    }
    Ok(StatusCode::OK)
}

/// Hands a new or changed subscription to the upstream coordinator so the
/// HSM registration can grow to cover it.
pub(crate) async fn forward_upstream(state: &Arc<AppState>, sub: Subscription) {
    if state.hsmsub_tx.send(sub).await.is_err() {
        warn!("upstream coordinator is gone, subscription not forwarded");
    }
}
