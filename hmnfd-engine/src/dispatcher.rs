//! Sealed-batch dispatch: matching and fan-out submission.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use hmnfd_core::Scn;
use hmnfd_store::registry::parse_key;
use hmnfd_store::{Registry, SubscriptionRecord};
use hmnfd_telemetry::TelemetrySidecar;

use crate::matcher;
use crate::pool::{ScnSendJob, WorkerPool};
use crate::prune::PruneMap;

/// Pause before retrying submission into a full worker-pool queue.
const FULL_QUEUE_PAUSE: Duration = Duration::from_millis(500);

/// Consumes sealed SCN batches and fans each one out to every matching
/// subscriber via the worker pool.
pub struct Dispatcher {
    registry: Registry,
    prune_map: Arc<PruneMap>,
    pool: Arc<WorkerPool>,
    telemetry: Arc<TelemetrySidecar>,
    fanout_sync: bool,
}

impl Dispatcher {
    /// Creates a dispatcher. With `fanout_sync` set, each job is awaited
    /// to its terminal status before the next is submitted (test hook for
    /// deterministic delivery order).
    #[must_use]
    pub fn new(
        registry: Registry,
        prune_map: Arc<PruneMap>,
        pool: Arc<WorkerPool>,
        telemetry: Arc<TelemetrySidecar>,
        fanout_sync: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            prune_map,
            pool,
            telemetry,
            fanout_sync,
        })
    }

    /// Consumer loop over sealed batches.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Scn>) {
        info!("dispatcher started");
        while let Some(scn) = rx.recv().await {
            self.telemetry.offer(&scn);
            self.dispatch(scn).await;
        }
    }

    /// Fans one sealed batch out to every matching subscriber.
    ///
    /// Unavailability transitions first seed the prune map with the
    /// affected components so no delivery is attempted toward a subscriber
    /// that is itself a subject of the outage — even while its registry
    /// record still exists.
    pub async fn dispatch(&self, scn: Scn) {
        let scn_lc = scn.lowercased();

        let prune_snapshot = if matcher::is_unavailable(&scn_lc) {
            for comp in &scn_lc.components {
                self.prune_map.insert(comp.clone());
            }
            Some(self.prune_map.snapshot())
        } else {
            None
        };

        let pairs = match self.registry.scan_all().await {
            Ok(pairs) => pairs,
            Err(e) => {
                error!(state = %scn_lc.state, error = %e, "cannot retrieve subscription keys");
                return;
            }
        };

        for pair in pairs {
            let Some(key) = parse_key(&pair.key) else {
                continue;
            };
            if !matcher::matches(&scn_lc, &key) {
                continue;
            }

            let subscriber = key.subscriber_id();
            if let Some(snapshot) = &prune_snapshot {
                if snapshot.contains(&key.owner) || snapshot.contains(&subscriber) {
                    debug!(subscriber = %subscriber, "skipping pruned subscriber");
                    continue;
                }
            }

            let record: SubscriptionRecord = match serde_json::from_str(&pair.value) {
                Ok(record) => record,
                Err(e) => {
                    error!(key = %pair.key, error = %e, "malformed subscription record");
                    continue;
                }
            };

            let components = matcher::intersect(&record.scn_nodes, &scn_lc.components);
            if components.is_empty() {
                debug!(subscriber = %subscriber, "nothing to send to subscriber");
                continue;
            }

            let job = ScnSendJob::new(
                matcher::notification_for(&scn, components),
                subscriber.clone(),
                record.url,
            );

            while !self.pool.try_submit(&job) {
                warn!(subscriber = %subscriber, "SCN send blocked on full queue");
                tokio::time::sleep(FULL_QUEUE_PAUSE).await;
            }

            if self.fanout_sync {
                job.wait_terminal().await;
            }
        }
    }
}
