//! Upstream subscription coordination.
//!
//! Every subscriber registration feeds this coordinator, which maintains
//! the union of all subscribed attributes and keeps exactly one covering
//! subscription registered with the Hardware State Manager. The union only
//! grows within a process lifetime; HSM coalesces the overlapping
//! registrations on its side.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONNECTION;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use hmnfd_core::params::SharedParams;
use hmnfd_core::Subscription;
use hmnfd_store::KvStore;

use crate::error::EngineError;

/// KV key holding the persisted attribute-union snapshot.
pub const HSM_SUBS_KEY: &str = "hsmsubs";
/// State Manager path accepting SCN subscriptions.
pub const SM_SCN_SUBSCRIPTION_PATH: &str = "Subscriptions/SCN";
/// State Manager path serving component state queries.
pub const SM_STATE_COMPONENTS_PATH: &str = "State/Components";
/// Capacity of the inbound subscription channel.
pub const CHANNEL_CAPACITY: usize = 50_000;

/// Pause before re-enqueueing a subscription after an HSM failure.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Accumulated union of subscribed attributes, persisted under
/// [`HSM_SUBS_KEY`] so restarts can see the previous coverage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamTracker {
    /// Hardware states covered so far.
    #[serde(rename = "HWStates", default, skip_serializing_if = "BTreeSet::is_empty")]
    pub hw_states: BTreeSet<String>,
    /// Software statuses covered so far.
    #[serde(rename = "SWStatus", default, skip_serializing_if = "BTreeSet::is_empty")]
    pub sw_status: BTreeSet<String>,
    /// Roles covered so far.
    #[serde(rename = "Roles", default, skip_serializing_if = "BTreeSet::is_empty")]
    pub roles: BTreeSet<String>,
    /// Sub-roles covered so far.
    #[serde(rename = "SubRoles", default, skip_serializing_if = "BTreeSet::is_empty")]
    pub sub_roles: BTreeSet<String>,
    /// Whether enable/disable transitions are covered.
    #[serde(rename = "Enabled", default, skip_serializing_if = "std::ops::Not::not")]
    pub enabled: bool,
}

impl UpstreamTracker {
    /// Returns the tracker grown by the subscription's attributes, or
    /// `None` when the subscription adds no new coverage.
    #[must_use]
    pub fn merged(&self, sub: &Subscription) -> Option<Self> {
        let mut next = self.clone();
        let mut grew = false;

        for state in &sub.states {
            grew |= next.hw_states.insert(state.to_lowercase());
        }
        for sws in &sub.software_status {
            grew |= next.sw_status.insert(sws.to_lowercase());
        }
        for role in &sub.roles {
            grew |= next.roles.insert(role.to_lowercase());
        }
        for sub_role in &sub.sub_roles {
            grew |= next.sub_roles.insert(sub_role.to_lowercase());
        }
        if !next.enabled && sub.enabled == Some(true) {
            next.enabled = true;
            grew = true;
        }

        grew.then_some(next)
    }
}

/// Keeps the single covering subscription registered with HSM.
pub struct UpstreamCoordinator {
    kv: Arc<dyn KvStore>,
    client: Client,
    params: SharedParams,
    requeue_tx: mpsc::Sender<Subscription>,
    host: String,
}

impl UpstreamCoordinator {
    /// Creates the coordinator. `requeue_tx` must be the sender side of
    /// the channel whose receiver is passed to [`run`](Self::run), so
    /// failed registrations can be retried.
    #[must_use]
    pub fn new(
        kv: Arc<dyn KvStore>,
        client: Client,
        params: SharedParams,
        requeue_tx: mpsc::Sender<Subscription>,
        host: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kv,
            client,
            params,
            requeue_tx,
            host: host.into(),
        })
    }

    /// Consumer loop over inbound subscriptions.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Subscription>) {
        info!("upstream subscriber loop started");
        let mut tracker = UpstreamTracker::default();
        let mut counter: u64 = 1;

        while let Some(sub) = rx.recv().await {
            let Some(next) = tracker.merged(&sub) else {
                continue;
            };

            let nosm = self.params.read().nosm != 0;
            if !nosm {
                debug!(subscriber = %sub.subscriber, "sending SCN subscription to HSM");
                let ix = counter;
                counter += 1;
                if let Err(e) = self.send_subscription(&sub, ix).await {
                    warn!(error = %e, "HSM SCN subscription failed, retrying");
                    tokio::time::sleep(RETRY_PAUSE).await;
                    if self.requeue_tx.try_send(sub).is_err() {
                        error!("subscription channel full, dropping retry");
                    }
                    continue;
                }
                info!("HSM subscription sent");
            }

            tracker = next;
            self.persist(&tracker).await;
        }
    }

    /// Registers the subscription with HSM under this service's identity:
    /// components stripped, a unique `<host>_<counter>` subscriber name,
    /// and this service's SCN ingress URL.
    async fn send_subscription(&self, sub: &Subscription, ix: u64) -> Result<(), EngineError> {
        let (sm_url, scn_in_url) = {
            let params = self.params.read();
            (params.sm_url.clone(), params.scn_in_url.clone())
        };

        let mut body = sub.clone();
        body.components.clear();
        body.subscriber_component.clear();
        body.subscriber_agent.clear();
        body.subscriber = format!("{}_{}", self.host, ix);
        body.url = scn_in_url;

        let url = format!(
            "{}/{SM_SCN_SUBSCRIPTION_PATH}",
            sm_url.trim_end_matches('/')
        );
        let rsp = self
            .client
            .post(&url)
            .header(CONNECTION, "close")
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::Http {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        match rsp.status().as_u16() {
            200 | 202 | 204 => Ok(()),
            status => Err(EngineError::UpstreamStatus { status }),
        }
    }

    async fn persist(&self, tracker: &UpstreamTracker) {
        match serde_json::to_string(tracker) {
            Ok(json) => {
                if let Err(e) = self.kv.store(HSM_SUBS_KEY, &json).await {
                    error!(error = %e, "cannot store HSM subscription snapshot");
                }
            }
            Err(e) => error!(error = %e, "cannot marshal HSM subscription snapshot"),
        }
    }
}

/// The subscription the service itself needs: every state transition that
/// feeds pruning, plus role and enable changes. Enqueued once at startup.
#[must_use]
pub fn mandatory_subscription(service_name: &str, scn_in_url: &str) -> Subscription {
    Subscription {
        subscriber: service_name.to_string(),
        url: scn_in_url.to_string(),
        states: ["Empty", "Populated", "Off", "On", "Standby", "Halt", "Ready"]
            .iter()
            .map(ToString::to_string)
            .collect(),
        roles: vec!["compute".to_string(), "service".to_string()],
        enabled: Some(true),
        ..Default::default()
    }
}
