//! Deferred removal of dead subscriptions.
//!
//! When a subscriber becomes unavailable or stops answering, its identity
//! goes into the [`PruneMap`]. The dispatcher consults the map so nothing
//! is queued toward a dead endpoint; the [`Pruner`] loop then deletes the
//! registry records and clears the entries. The map bridges the window
//! between "known dead" and "removed from the registry".

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use hmnfd_core::params::SharedParams;
use hmnfd_store::registry::parse_key;
use hmnfd_store::Registry;

use crate::upstream::SM_STATE_COMPONENTS_PATH;

/// Period of the prune sweep loop.
const SWEEP_PERIOD: Duration = Duration::from_secs(10);
/// Pause between startup-sweep attempts against the State Manager.
const STARTUP_RETRY: Duration = Duration::from_secs(2);

/// Identities (owner or `agent@owner`) scheduled for subscription removal.
#[derive(Debug, Default)]
pub struct PruneMap {
    map: DashMap<String, ()>,
}

impl PruneMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules an identity for removal.
    pub fn insert(&self, id: impl Into<String>) {
        self.map.insert(id.into(), ());
    }

    /// True when the identity is scheduled for removal.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.map.contains_key(id)
    }

    /// Removes one identity.
    pub fn remove(&self, id: &str) {
        self.map.remove(id);
    }

    /// True when nothing is scheduled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Number of scheduled identities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// A point-in-time copy of the scheduled identities.
    #[must_use]
    pub fn snapshot(&self) -> HashSet<String> {
        self.map.iter().map(|e| e.key().clone()).collect()
    }
}

/// Background removal of registry records named by the prune map.
pub struct Pruner {
    registry: Registry,
    prune_map: Arc<PruneMap>,
}

impl Pruner {
    /// Creates a pruner over the given registry and map.
    #[must_use]
    pub fn new(registry: Registry, prune_map: Arc<PruneMap>) -> Self {
        Self {
            registry,
            prune_map,
        }
    }

    /// Periodic loop: sweeps whenever the map is non-empty.
    pub async fn run(self) {
        loop {
            tokio::time::sleep(SWEEP_PERIOD).await;
            if !self.prune_map.is_empty() {
                self.sweep().await;
            }
        }
    }

    /// One sweep: deletes every record whose owner or `agent@owner`
    /// appears in the map, then clears the handled entries. An entry whose
    /// delete failed stays in the map so the next sweep retries it.
    pub async fn sweep(&self) {
        let scheduled = self.prune_map.snapshot();

        let pairs = match self.registry.scan_all().await {
            Ok(pairs) => pairs,
            Err(e) => {
                warn!(error = %e, "prune sweep: registry scan failed");
                return;
            }
        };

        let mut failed: HashSet<String> = HashSet::new();
        for pair in pairs {
            let Some(key) = parse_key(&pair.key) else {
                continue;
            };
            let id = key.subscriber_id();
            let owner_hit = scheduled.contains(&key.owner);
            let id_hit = scheduled.contains(&id);
            if !owner_hit && !id_hit {
                continue;
            }

            debug!(key = %pair.key, "pruning subscription");
            if let Err(e) = self.registry.delete(&pair.key).await {
                warn!(key = %pair.key, error = %e, "prune delete failed, keeping entry");
                if owner_hit {
                    failed.insert(key.owner.clone());
                }
                if id_hit {
                    failed.insert(id);
                }
            }
        }

        for id in &scheduled {
            if !failed.contains(id) {
                self.prune_map.remove(id);
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct StateComponent {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "State", default)]
    #[allow(dead_code)]
    state: String,
}

#[derive(Debug, Default, Deserialize)]
struct StateComponentList {
    #[serde(rename = "Components", default)]
    components: Vec<StateComponent>,
}

/// One-shot startup sweep: asks the State Manager for every node currently
/// in an unavailable state and seeds the prune map with matching
/// subscription owners, removing stale records inherited from a previous
/// lifetime. Retries the query until it succeeds.
pub async fn startup_sweep(
    client: Client,
    registry: Registry,
    prune_map: Arc<PruneMap>,
    params: SharedParams,
) {
    if params.read().nosm != 0 {
        return;
    }

    let url = {
        let sm_url = params.read().sm_url.clone();
        format!("{}/{SM_STATE_COMPONENTS_PATH}", sm_url.trim_end_matches('/'))
    };
    let query = [
        ("type", "Node"),
        ("state", "Off"),
        ("state", "Empty"),
        ("state", "Halt"),
        ("stateonly", "true"),
    ];

    let dead: HashSet<String> = loop {
        let rsp = match client.get(&url).query(&query).send().await {
            Ok(rsp) => rsp,
            Err(e) => {
                warn!(error = %e, "startup sweep: state query failed, retrying");
                tokio::time::sleep(STARTUP_RETRY).await;
                continue;
            }
        };
        match rsp.json::<StateComponentList>().await {
            Ok(list) => {
                break list
                    .components
                    .into_iter()
                    .map(|c| c.id.to_lowercase())
                    .collect();
            }
            Err(e) => {
                warn!(error = %e, "startup sweep: malformed state response, retrying");
                tokio::time::sleep(STARTUP_RETRY).await;
            }
        }
    };

    let pairs = match registry.scan_all().await {
        Ok(pairs) => pairs,
        Err(e) => {
            warn!(error = %e, "startup sweep: registry scan failed");
            return;
        }
    };

    let mut seeded = 0usize;
    for pair in pairs {
        let Some(key) = parse_key(&pair.key) else {
            continue;
        };
        if dead.contains(&key.owner) {
            info!(owner = %key.owner, "pruning dead node subscription");
            prune_map.insert(key.owner.clone());
            seeded += 1;
        }
    }
    if seeded > 0 {
        info!(count = seeded, "startup sweep seeded prune map");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmnfd_store::MemKv;

    fn registry() -> Registry {
        Registry::new(Arc::new(MemKv::new()))
    }

    #[test]
    fn test_prune_map_basics() {
        let map = PruneMap::new();
        assert!(map.is_empty());

        map.insert("x0c0s0b0n0");
        map.insert("bar@x100c0s0b0n0");
        assert!(map.contains("x0c0s0b0n0"));
        assert!(map.contains("bar@x100c0s0b0n0"));
        assert_eq!(map.len(), 2);

        let snap = map.snapshot();
        map.remove("x0c0s0b0n0");
        assert!(!map.contains("x0c0s0b0n0"));
        // The snapshot is unaffected by later removals.
        assert!(snap.contains("x0c0s0b0n0"));
    }

    #[tokio::test]
    async fn test_sweep_deletes_by_owner() {
        let registry = registry();
        registry
            .put("sub#x0c0s0b0n0#hs.ready", "http://a/scn", &[])
            .await
            .unwrap();
        registry
            .put("sub#x0c0s0b0n0#hs.off#svc.handler", "http://a/scn", &[])
            .await
            .unwrap();
        registry
            .put("sub#x1c0s0b0n0#hs.ready", "http://b/scn", &[])
            .await
            .unwrap();

        let map = Arc::new(PruneMap::new());
        map.insert("x0c0s0b0n0");

        let pruner = Pruner::new(registry.clone(), map.clone());
        pruner.sweep().await;

        // Both records of the dead owner are gone, the other survives,
        // and the handled entry is cleared.
        let remaining = registry.scan_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key, "sub#x1c0s0b0n0#hs.ready");
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_deletes_by_agent_identity() {
        let registry = registry();
        registry
            .put("sub#x100c0s0b0n0#hs.ready#svc.bar", "e.f.g.h", &[])
            .await
            .unwrap();
        registry
            .put("sub#x100c0s0b0n0#hs.ready#svc.baz", "http://keep/scn", &[])
            .await
            .unwrap();

        let map = Arc::new(PruneMap::new());
        map.insert("bar@x100c0s0b0n0");

        Pruner::new(registry.clone(), map.clone()).sweep().await;

        let remaining = registry.scan_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].key.ends_with("#svc.baz"));
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_clears_unmatched_entries() {
        let registry = registry();
        let map = Arc::new(PruneMap::new());
        map.insert("x9c9s9b9n9");

        Pruner::new(registry, map.clone()).sweep().await;
        // No matching record, but the sweep ran: entry is considered
        // handled and cleared.
        assert!(map.is_empty());
    }

    #[tokio::test]
    async fn test_startup_sweep_seeds_from_hsm() {
        use axum::{routing::get, Json, Router};
        use hmnfd_core::{params, Params};

        // Fake State Manager reporting one dead node.
        let router = Router::new().route(
            "/hsm/v2/State/Components",
            get(|| async {
                Json(serde_json::json!({
                    "Components": [
                        {"ID": "x0c0s0b0n0", "State": "Off", "Type": "Node", "Flag": "OK"}
                    ]
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let registry = registry();
        registry
            .put("sub#x0c0s0b0n0#hs.ready", "http://dead/scn", &[])
            .await
            .unwrap();
        registry
            .put("sub#x1c0s0b0n0#hs.ready", "http://alive/scn", &[])
            .await
            .unwrap();

        let map = Arc::new(PruneMap::new());
        let params = params::shared(Params {
            sm_url: format!("http://{addr}/hsm/v2"),
            ..Default::default()
        });
        let client = crate::delivery::build_http_client(2, false, "hmnfd-test").unwrap();

        startup_sweep(client, registry, map.clone(), params).await;

        assert!(map.contains("x0c0s0b0n0"));
        assert!(!map.contains("x1c0s0b0n0"));
    }

    #[tokio::test]
    async fn test_startup_sweep_nosm_is_noop() {
        use hmnfd_core::{params, Params};

        let map = Arc::new(PruneMap::new());
        let params = params::shared(Params {
            nosm: 1,
            ..Default::default()
        });
        let client = crate::delivery::build_http_client(1, false, "hmnfd-test").unwrap();

        startup_sweep(client, registry(), map.clone(), params).await;
        assert!(map.is_empty());
    }
}
