//! Subscription listing plus the v2 xname/agent-scoped handlers.

use std::sync::Arc;

use axum::extract::{OriginalUri, Path, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{debug, info, warn};

use hmnfd_core::{SubscriptionList, Xname};
use hmnfd_store::registry::{make_key, parse_key};
use hmnfd_store::SubscriptionRecord;

use super::parse_subscription;
use super::subscribe::forward_upstream;
use crate::problem::{ApiError, ApiResult};
use crate::state::AppState;

/// GET `/hmi/v{1,2}/subscriptions`: the full subscription list,
/// reconstructed from the registry keys and records.
pub async fn get_subscriptions(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
) -> ApiResult<Json<SubscriptionList>> {
    let list = state
        .registry
        .list()
        .await
        .map_err(|e| ApiError::internal(e.to_string(), uri.path()))?;
    Ok(Json(SubscriptionList {
        subscription_list: list,
    }))
}

/// GET `/hmi/v2/subscriptions/{xname}`: the subscriptions owned by one
/// component.
pub async fn get_subscriptions_xname(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Path(xname): Path<String>,
) -> ApiResult<Json<SubscriptionList>> {
    let instance = uri.path().to_string();
    let owner = normalize_xname(&xname, &instance)?;

    let list = state
        .registry
        .list_owner(owner.as_str())
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &instance))?;
    Ok(Json(SubscriptionList {
        subscription_list: list,
    }))
}

/// POST `/hmi/v2/subscriptions/{xname}/agents/{agent}`: creates a
/// subscription whose identity comes from the URL path.
pub async fn post_subscription_agent(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Path((xname, agent)): Path<(String, String)>,
    body: String,
) -> ApiResult<StatusCode> {
    let instance = uri.path().to_string();
    let owner = normalize_xname(&xname, &instance)?;
    let agent = agent.to_lowercase();

    let sub = parse_subscription(&body, &instance)?;
    sub.validate_v2()
        .map_err(|e| ApiError::bad_request(e.to_string(), &instance))?;

    let key = make_key(&sub, owner.as_str(), &agent);
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
    info!(owner = %owner, agent = %agent, "subscription created");

    forward_upstream(&state, sub).await;
    Ok(StatusCode::OK)
}

/// PATCH `/hmi/v2/subscriptions/{xname}/agents/{agent}`: replaces the
/// record of one (owner, agent) identity.
pub async fn patch_subscription_agent(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Path((xname, agent)): Path<(String, String)>,
    body: String,
) -> ApiResult<StatusCode> {
    let instance = uri.path().to_string();
    let owner = normalize_xname(&xname, &instance)?;
    let agent = agent.to_lowercase();

    let sub = parse_subscription(&body, &instance)?;
    sub.validate_v2()
        .map_err(|e| ApiError::bad_request(e.to_string(), &instance))?;

    let pairs = state
        .registry
        .scan_owner(owner.as_str())
        .await
        .map_err(|e| ApiError::internal(e.to_string(), &instance))?;

    let mut matched = false;
    for pair in pairs {
        let Some(parsed) = parse_key(&pair.key) else {
            continue;
        };
        if parsed.owner != owner.as_str() || parsed.agent != agent {
            continue;
        }

        let new_key = make_key(&sub, owner.as_str(), &agent);
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
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE `/hmi/v2/subscriptions/{xname}/agents/{agent}`: removes one
/// (owner, agent) subscription.
pub async fn delete_subscription_agent(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Path((xname, agent)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let instance = uri.path().to_string();
    let owner = normalize_xname(&xname, &instance)?;
    let agent = agent.to_lowercase();

    let deleted = delete_matching(&state, owner.as_str(), Some(&agent), &instance).await?;
    if !deleted {
        return Err(ApiError::not_found(
            "no matching subscription for DELETE",
            &instance,
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE `/hmi/v2/subscriptions/{xname}/agents`: removes every agent
/// subscription on one owner.
pub async fn delete_subscriptions_xname(
    State(state): State<Arc<AppState>>,
    OriginalUri(uri): OriginalUri,
    Path(xname): Path<String>,
) -> ApiResult<StatusCode> {
    let instance = uri.path().to_string();
    let owner = normalize_xname(&xname, &instance)?;

    delete_matching(&state, owner.as_str(), None, &instance).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Deletes every record of `owner`, optionally narrowed to one agent.
/// Returns whether anything matched.
async fn delete_matching(
    state: &Arc<AppState>,
    owner: &str,
    agent: Option<&str>,
    instance: &str,
) -> ApiResult<bool> {
    let pairs = state
        .registry
        .scan_all()
        .await
        .map_err(|e| ApiError::internal(e.to_string(), instance))?;

    let mut matched = false;
    for pair in pairs {
        let Some(parsed) = parse_key(&pair.key) else {
            continue;
        };
        if parsed.owner != owner {
            continue;
        }
        if let Some(agent) = agent {
            if parsed.agent != agent {
                continue;
            }
        }

        match state.registry.delete(&pair.key).await {
            Ok(()) => {
                let id = parsed.subscriber_id();
                info!(subscriber = %id, "subscription deleted");
                state.prune_map.insert(id);
                matched = true;
            }
            Err(e) => warn!(key = %pair.key, error = %e, "key not deleted"),
        }
    }
    Ok(matched)
}

fn normalize_xname(raw: &str, instance: &str) -> ApiResult<Xname> {
    Xname::new(raw).map_err(|_| ApiError::bad_request("invalid XName in URL path", instance))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::create_router;
    use crate::state::testing::harness;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn send(
        router: axum::Router,
        method: Method,
        path: &str,
        body: &str,
    ) -> axum::http::Response<Body> {
        router
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(path)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_json(rsp: axum::http::Response<Body>) -> serde_json::Value {
        let bytes = rsp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    const V2_BODY: &str = r#"{
        "Components": ["x1000c2s3b0n4"],
        "States": ["Ready"],
        "Url": "http://x0c1s2b0n3:8890/scn"
    }"#;

    #[tokio::test]
    async fn test_v2_post_creates_keyed_record() {
        let hx = harness();
        let router = create_router(hx.state.clone());

        let rsp = send(
            router,
            Method::POST,
            "/hmi/v2/subscriptions/x0c1s2b0n3/agents/handler",
            V2_BODY,
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::OK);

        let pairs = hx.state.registry.scan_all().await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].key, "sub#x0c1s2b0n3#hs.ready#svc.handler");
    }

    #[tokio::test]
    async fn test_v2_post_invalid_xname() {
        let hx = harness();
        let router = create_router(hx.state.clone());

        let rsp = send(
            router,
            Method::POST,
            "/hmi/v2/subscriptions/notanxname/agents/handler",
            V2_BODY,
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_v2_patch_moves_key_and_returns_204() {
        let hx = harness();
        let router = create_router(hx.state.clone());

        send(
            router.clone(),
            Method::POST,
            "/hmi/v2/subscriptions/x0c1s2b0n3/agents/handler",
            V2_BODY,
        )
        .await;

        let patched = r#"{
            "Components": ["x1000c2s3b0n9"],
            "States": ["Off"],
            "Url": "http://x0c1s2b0n3:8890/scn"
        }"#;
        let rsp = send(
            router,
            Method::PATCH,
            "/hmi/v2/subscriptions/x0c1s2b0n3/agents/handler",
            patched,
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::NO_CONTENT);

        let pairs = hx.state.registry.scan_all().await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].key, "sub#x0c1s2b0n3#hs.off#svc.handler");
        assert!(pairs[0].value.contains("x1000c2s3b0n9"));
    }

    #[tokio::test]
    async fn test_v2_delete_agent_returns_204() {
        let hx = harness();
        let router = create_router(hx.state.clone());

        send(
            router.clone(),
            Method::POST,
            "/hmi/v2/subscriptions/x0c1s2b0n3/agents/handler",
            V2_BODY,
        )
        .await;

        let rsp = send(
            router,
            Method::DELETE,
            "/hmi/v2/subscriptions/x0c1s2b0n3/agents/handler",
            "",
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::NO_CONTENT);
        assert!(hx.state.registry.scan_all().await.unwrap().is_empty());
        assert!(hx.state.prune_map.contains("handler@x0c1s2b0n3"));
    }

    #[tokio::test]
    async fn test_v2_delete_missing_agent_is_not_found() {
        let hx = harness();
        let router = create_router(hx.state.clone());

        let rsp = send(
            router,
            Method::DELETE,
            "/hmi/v2/subscriptions/x0c1s2b0n3/agents/ghost",
            "",
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_v2_delete_all_agents_on_owner() {
        let hx = harness();
        let router = create_router(hx.state.clone());

        hx.state
            .registry
            .put("sub#x0c1s2b0n3#hs.ready#svc.a", "http://a/scn", &[])
            .await
            .unwrap();
        hx.state
            .registry
            .put("sub#x0c1s2b0n3#hs.off#svc.b", "http://b/scn", &[])
            .await
            .unwrap();
        hx.state
            .registry
            .put("sub#x9c0s0b0n0#hs.ready", "http://keep/scn", &[])
            .await
            .unwrap();

        let rsp = send(
            router,
            Method::DELETE,
            "/hmi/v2/subscriptions/x0c1s2b0n3/agents",
            "",
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::NO_CONTENT);

        let pairs = hx.state.registry.scan_all().await.unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].key, "sub#x9c0s0b0n0#hs.ready");
    }

    #[tokio::test]
    async fn test_list_subscriptions() {
        let hx = harness();
        let router = create_router(hx.state.clone());

        hx.state
            .registry
            .put(
                "sub#x0c1s2b0n3#hs.ready#svc.handler",
                "http://x0c1s2b0n3:8888/scn",
                &["x1000c2s3b0n4".to_string()],
            )
            .await
            .unwrap();

        let rsp = send(router, Method::GET, "/hmi/v1/subscriptions", "").await;
        assert_eq!(rsp.status(), StatusCode::OK);

        let json = body_json(rsp).await;
        let list = json["SubscriptionList"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["Subscriber"], "handler@x0c1s2b0n3");
        assert_eq!(list[0]["SubscriberComponent"], "x0c1s2b0n3");
        assert_eq!(list[0]["SubscriberAgent"], "handler");
        assert_eq!(list[0]["States"], serde_json::json!(["ready"]));
    }

    #[tokio::test]
    async fn test_list_by_owner_filters() {
        let hx = harness();
        let router = create_router(hx.state.clone());

        hx.state
            .registry
            .put("sub#x0c1s2b0n3#hs.ready", "http://a/scn", &[])
            .await
            .unwrap();
        hx.state
            .registry
            .put("sub#x9c0s0b0n0#hs.ready", "http://b/scn", &[])
            .await
            .unwrap();

        let rsp = send(
            router,
            Method::GET,
            "/hmi/v2/subscriptions/x0c1s2b0n3",
            "",
        )
        .await;
        assert_eq!(rsp.status(), StatusCode::OK);

        let json = body_json(rsp).await;
        let list = json["SubscriptionList"].as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["Subscriber"], "x0c1s2b0n3");
    }
}
