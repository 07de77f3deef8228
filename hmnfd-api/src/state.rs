//! Shared application state for the ingress handlers.

use std::sync::Arc;

use tokio::sync::mpsc;

use hmnfd_core::params::SharedParams;
use hmnfd_core::Subscription;
use hmnfd_engine::{PruneMap, ScnCache, WorkerPool};
use hmnfd_store::Registry;
use hmnfd_telemetry::TelemetrySidecar;

/// Everything the handlers need, shared behind one `Arc`.
pub struct AppState {
    /// Subscription registry over the KV store.
    pub registry: Registry,
    /// Runtime parameters.
    pub params: SharedParams,
    /// Identities scheduled for subscription removal.
    pub prune_map: Arc<PruneMap>,
    /// Aggregation cache receiving inbound SCNs.
    pub cache: Arc<ScnCache>,
    /// Channel toward the upstream coordinator.
    pub hsmsub_tx: mpsc::Sender<Subscription>,
    /// Telemetry sidecar, consulted by the probes.
    pub telemetry: Arc<TelemetrySidecar>,
    /// Delivery worker pool, consulted by the health report.
    pub pool: Arc<WorkerPool>,
    /// Gates the v2 xname-scoped subscription routes.
    pub feature_xname_api: bool,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared wiring for handler tests: a fully assembled state over the
    //! in-memory KV backend plus the receiver ends of its channels.

    use super::*;
    use hmnfd_core::{params, Params, Scn};
    use hmnfd_engine::{build_http_client, Deliverer, Dispatcher};
    use hmnfd_store::MemKv;

    pub struct TestHarness {
        pub state: Arc<AppState>,
        pub hsmsub_rx: mpsc::Receiver<Subscription>,
        pub sealed_rx: Option<mpsc::Receiver<Scn>>,
        pub dispatcher: Arc<Dispatcher>,
    }

    pub fn harness() -> TestHarness {
        harness_with_params(Params::default())
    }

    pub fn harness_with_params(p: Params) -> TestHarness {
        let params = params::shared(p);
        let registry = Registry::new(Arc::new(MemKv::new()));
        let prune_map = Arc::new(PruneMap::new());
        let client = build_http_client(2, false, "hmnfd-test").unwrap();
        let deliverer = Arc::new(Deliverer::new(
            client,
            prune_map.clone(),
            params.clone(),
        ));
        let pool = WorkerPool::new(4, 64, deliverer);
        let (telemetry, _telemetry_rx) = TelemetrySidecar::new(params.clone());
        let (sealed_tx, sealed_rx) = mpsc::channel(64);
        let cache = ScnCache::new(params.clone(), sealed_tx);
        let (hsmsub_tx, hsmsub_rx) = mpsc::channel(64);
        let dispatcher = Dispatcher::new(
            registry.clone(),
            prune_map.clone(),
            pool.clone(),
            telemetry.clone(),
            true,
        );

        TestHarness {
            state: Arc::new(AppState {
                registry,
                params,
                prune_map,
                cache,
                hsmsub_tx,
                telemetry,
                pool,
                feature_xname_api: true,
            }),
            hsmsub_rx,
            sealed_rx: Some(sealed_rx),
            dispatcher,
        }
    }
}
