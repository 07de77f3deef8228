//! Burst coalescing of inbound SCNs.
//!
//! HSM often emits many single-component SCNs for the same transition in
//! rapid succession. The cache holds one slot; compatible arrivals extend
//! its component list, anything else seals the batch. A periodic timer
//! flushes a partially filled slot so quiet periods never strand an SCN.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use hmnfd_core::params::SharedParams;
use hmnfd_core::Scn;

/// Capacity of the sealed-batch channel feeding the dispatcher.
pub const SEALED_CHANNEL_CAPACITY: usize = 10_000;

/// Returns true when `next` can be folded into the batch `cached`.
///
/// Compatibility compares state, flag, software status, role and the
/// effective enabled flag (present and true). Sub-role is intentionally
/// not compared: batches carry the sub-role of their first SCN.
#[must_use]
pub fn compatible(cached: &Scn, next: &Scn) -> bool {
    let enabled_cached = cached.enabled == Some(true);
    let enabled_next = next.enabled == Some(true);

    cached.state == next.state
        && cached.flag == next.flag
        && cached.software_status == next.software_status
        && cached.role == next.role
        && enabled_cached == enabled_next
}

struct Slot {
    scn: Option<Scn>,
    count: u32,
}

/// The single-slot aggregation cache.
pub struct ScnCache {
    slot: Mutex<Slot>,
    tx: mpsc::Sender<Scn>,
    params: SharedParams,
}

impl ScnCache {
    /// Creates the cache. Sealed batches go out on `tx`.
    #[must_use]
    pub fn new(params: SharedParams, tx: mpsc::Sender<Scn>) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot {
                scn: None,
                count: 0,
            }),
            tx,
            params,
        })
    }

    /// Ingests one inbound SCN.
    ///
    /// Fills the slot, extends it on compatible attributes, and seals on
    /// the configured size limit or on an incompatible arrival.
    pub async fn ingest(&self, scn: Scn) {
        let max = self.params.read().scn_max_cache;
        let mut slot = self.slot.lock().await;

        match slot.scn.take() {
            None => {
                slot.scn = Some(scn);
                slot.count = 1;
            }
            Some(mut cached) if compatible(&cached, &scn) => {
                cached.components.extend(scn.components);
                slot.count += 1;
                if slot.count >= max {
                    slot.count = 0;
                    self.seal(cached).await;
                } else {
                    slot.scn = Some(cached);
                }
            }
            Some(cached) => {
                self.seal(cached).await;
                slot.scn = Some(scn);
                slot.count = 1;
            }
        }
    }

    /// Seals and emits a partially filled slot, if any. Called by the
    /// timer; also useful to drain the cache deterministically in tests.
    pub async fn flush(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(cached) = slot.scn.take() {
            slot.count = 0;
            self.seal(cached).await;
        }
    }

    /// Periodic flush loop; the period re-reads `Scn_cache_delay` so PATCH
    /// updates take effect without a restart.
    pub async fn run_timer(self: Arc<Self>) {
        loop {
            let delay = self.params.read().scn_cache_delay.max(1);
            tokio::time::sleep(Duration::from_secs(u64::from(delay))).await;
            self.flush().await;
        }
    }

    async fn seal(&self, mut batch: Scn) {
        if batch.components.is_empty() {
            return;
        }
        batch.stamp();
        debug!(components = batch.components.len(), "sealing SCN batch");
        if self.tx.send(batch).await.is_err() {
            // Dispatcher is gone; shutting down.
            debug!("sealed-SCN channel closed, dropping batch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmnfd_core::{params, Params};

    fn cache_with(max: u32) -> (Arc<ScnCache>, mpsc::Receiver<Scn>) {
        let params = params::shared(Params {
            scn_max_cache: max,
            ..Default::default()
        });
        let (tx, rx) = mpsc::channel(16);
        (ScnCache::new(params, tx), rx)
    }

    fn ready(component: &str) -> Scn {
        Scn {
            components: vec![component.to_string()],
            state: "ready".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_compatible_ignores_sub_role() {
        let a = Scn {
            state: "ready".to_string(),
            sub_role: "ncn-m".to_string(),
            ..Default::default()
        };
        let b = Scn {
            state: "ready".to_string(),
            sub_role: "ncn-w".to_string(),
            ..Default::default()
        };
        assert!(compatible(&a, &b));
    }

    #[test]
    fn test_compatible_enabled_presence() {
        let plain = Scn::default();
        let enabled = Scn {
            enabled: Some(true),
            ..Default::default()
        };
        let disabled = Scn {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(!compatible(&plain, &enabled));
        // An explicit false compares equal to absent.
        assert!(compatible(&plain, &disabled));
    }

    #[test]
    fn test_compatible_differing_state() {
        assert!(!compatible(&ready("a"), &Scn {
            state: "on".to_string(),
            ..Default::default()
        }));
    }

    #[tokio::test]
    async fn test_size_limit_seals_batch() {
        // Five compatible SCNs with max 4: one batch of four, the fifth
        // stays cached until flushed.
        let (cache, mut rx) = cache_with(4);
        for comp in ["n1", "n2", "n3", "n4", "n5"] {
            cache.ingest(ready(comp)).await;
        }

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.components, vec!["n1", "n2", "n3", "n4"]);
        assert!(!batch.timestamp.is_empty());
        assert!(rx.try_recv().is_err());

        cache.flush().await;
        let rest = rx.try_recv().unwrap();
        assert_eq!(rest.components, vec!["n5"]);
    }

    #[tokio::test]
    async fn test_incompatible_seals_prior_batch() {
        let (cache, mut rx) = cache_with(100);
        cache.ingest(ready("n1")).await;
        cache.ingest(ready("n2")).await;
        cache
            .ingest(Scn {
                components: vec!["n3".to_string()],
                state: "on".to_string(),
                ..Default::default()
            })
            .await;

        let first = rx.try_recv().unwrap();
        assert_eq!(first.state, "ready");
        assert_eq!(first.components, vec!["n1", "n2"]);

        cache.flush().await;
        let second = rx.try_recv().unwrap();
        assert_eq!(second.state, "on");
        assert_eq!(second.components, vec!["n3"]);
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let (cache, mut rx) = cache_with(100);
        cache.flush().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_single_emission_for_compatible_run() {
        let (cache, mut rx) = cache_with(100);
        for comp in ["n1", "n2", "n3"] {
            cache.ingest(ready(comp)).await;
        }
        cache.flush().await;

        let batch = rx.try_recv().unwrap();
        assert_eq!(batch.components, vec!["n1", "n2", "n3"]);
        assert!(rx.try_recv().is_err());
    }
}
