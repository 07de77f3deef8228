//! Route tables for both schema versions.

use std::sync::Arc;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, params, scn, subscribe, subscriptions};
use crate::state::AppState;

/// Builds the full router: `/hmi/v1` and `/hmi/v2`, shared handlers where
/// semantics match, v2 xname routes behind the feature flag.
pub fn create_router(state: Arc<AppState>) -> Router {
    let common = Router::new()
        .route("/scn", post(scn::post_scn))
        .route("/subscriptions", get(subscriptions::get_subscriptions))
        .route(
            "/params",
            get(params::get_params).patch(params::patch_params),
        )
        .route("/liveness", get(health::liveness))
        .route("/readiness", get(health::readiness))
        .route("/health", get(health::health));

    let v1 = common.clone().route(
        "/subscribe",
        post(subscribe::post_subscribe)
            .patch(subscribe::patch_subscribe)
            .delete(subscribe::delete_subscribe),
    );

    let mut v2 = common;
    if state.feature_xname_api {
        v2 = v2
            .route(
                "/subscriptions/{xname}",
                get(subscriptions::get_subscriptions_xname),
            )
            .route(
                "/subscriptions/{xname}/agents",
                delete(subscriptions::delete_subscriptions_xname),
            )
            .route(
                "/subscriptions/{xname}/agents/{agent}",
                post(subscriptions::post_subscription_agent)
                    .patch(subscriptions::patch_subscription_agent)
                    .delete(subscriptions::delete_subscription_agent),
            );
    }

    Router::new()
        .nest("/hmi/v1", v1)
        .nest("/hmi/v2", v2)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
