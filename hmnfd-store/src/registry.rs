//! Subscription registry and key codec.
//!
//! Every subscription is one record in the flat keyspace. The key embeds
//! the owner and all attribute selectors:
//!
//! ```text
//! sub#<owner>[#hs.<s>...][#ss.<ws>...][#enbl.enbl][#roles.<r>...][#subroles.<sr>...][#svc.<agent>]
//! ```
//!
//! so the fixed range `sub#a`..`sub#z` covers every record and one range
//! scan per SCN suffices. A hierarchical keyspace indexed by attribute
//! would instead cost one fetch per subscription per SCN.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use hmnfd_core::{Subscription, types::subscription::AGENT_DELIM};

use crate::kv::{KvPair, KvStore, StoreError};

/// Key prefix for subscription records.
pub const KEY_PREFIX: &str = "sub";
/// Separator between key fields.
pub const KEY_DELIM: char = '#';
/// Separator between values inside one key field.
pub const CAT_DELIM: char = '.';
/// Hardware-state selector field tag.
pub const FIELD_STATES: &str = "hs";
/// Software-status selector field tag.
pub const FIELD_SWSTATUS: &str = "ss";
/// Enabled-flag sentinel field tag (and its single value).
pub const FIELD_ENABLED: &str = "enbl";
/// Role selector field tag.
pub const FIELD_ROLES: &str = "roles";
/// Sub-role selector field tag.
pub const FIELD_SUBROLES: &str = "subroles";
/// Agent name field tag; always the last field when present.
pub const FIELD_AGENT: &str = "svc";
/// Start of the fixed scan range covering every subscription key.
pub const RANGE_START: &str = "sub#a";
/// End of the fixed scan range covering every subscription key.
pub const RANGE_END: &str = "sub#z";

/// Value stored under a subscription key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    /// Delivery URL for matched SCNs.
    #[serde(rename = "Url")]
    pub url: String,
    /// Components the subscriber is interested in (may be a wildcard).
    #[serde(rename = "ScnNodes")]
    pub scn_nodes: Vec<String>,
}

/// A subscription key decomposed into its fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedKey {
    /// Owner component identifier.
    pub owner: String,
    /// Agent name; empty when the subscription has no agent.
    pub agent: String,
    /// Hardware-state selectors.
    pub states: Vec<String>,
    /// Software-status selectors.
    pub software_status: Vec<String>,
    /// True when the subscription covers enable/disable transitions.
    pub enabled: bool,
    /// Role selectors.
    pub roles: Vec<String>,
    /// Sub-role selectors.
    pub sub_roles: Vec<String>,
}

impl ParsedKey {
    /// The subscriber identity: `owner` or `agent@owner`.
    #[must_use]
    pub fn subscriber_id(&self) -> String {
        if self.agent.is_empty() {
            self.owner.clone()
        } else {
            format!("{}{}{}", self.agent, AGENT_DELIM, self.owner)
        }
    }
}

/// Builds the registry key for a subscription owned by `owner` with an
/// optional `agent`. All inputs are expected lowercase; selector order is
/// preserved.
#[must_use]
pub fn make_key(sub: &Subscription, owner: &str, agent: &str) -> String {
    let mut key = format!("{KEY_PREFIX}{KEY_DELIM}{owner}");

    push_field(&mut key, FIELD_STATES, &sub.states);
    push_field(&mut key, FIELD_SWSTATUS, &sub.software_status);

    if sub.enabled.is_some() {
        key.push(KEY_DELIM);
        key.push_str(FIELD_ENABLED);
        key.push(CAT_DELIM);
        key.push_str(FIELD_ENABLED);
    }

    push_field(&mut key, FIELD_ROLES, &sub.roles);
    push_field(&mut key, FIELD_SUBROLES, &sub.sub_roles);

    if !agent.is_empty() {
        key.push(KEY_DELIM);
        key.push_str(FIELD_AGENT);
        key.push(CAT_DELIM);
        key.push_str(agent);
    }

    key
}

fn push_field(key: &mut String, tag: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    key.push(KEY_DELIM);
    key.push_str(tag);
    for value in values {
        key.push(CAT_DELIM);
        key.push_str(&value.to_lowercase());
    }
}

/// Builds the registry key for a v1 subscription, whose `[agent@]owner`
/// identity rides in the `Subscriber` field.
#[must_use]
pub fn make_key_v1(sub: &Subscription) -> String {
    let (owner, agent) = Subscription::split_subscriber(&sub.subscriber);
    make_key(sub, &owner, &agent)
}

/// Decomposes a registry key. Returns `None` for keys outside the
/// subscription keyspace.
#[must_use]
pub fn parse_key(key: &str) -> Option<ParsedKey> {
    let mut toks = key.split(KEY_DELIM);
    if toks.next() != Some(KEY_PREFIX) {
        return None;
    }
    let owner = toks.next()?;
    if owner.is_empty() {
        return None;
    }

    let mut parsed = ParsedKey {
        owner: owner.to_string(),
        ..Default::default()
    };

    for field in toks {
        let mut vals = field.split(CAT_DELIM);
        let tag = vals.next().unwrap_or_default();
        let vals: Vec<String> = vals.map(str::to_string).collect();
        match tag {
            FIELD_STATES => parsed.states = vals,
            FIELD_SWSTATUS => parsed.software_status = vals,
            FIELD_ENABLED => parsed.enabled = true,
            FIELD_ROLES => parsed.roles = vals,
            FIELD_SUBROLES => parsed.sub_roles = vals,
            FIELD_AGENT => parsed.agent = vals.into_iter().next().unwrap_or_default(),
            _ => return None,
        }
    }

    Some(parsed)
}

/// The subscription registry: typed operations over the flat keyspace.
#[derive(Clone)]
pub struct Registry {
    kv: Arc<dyn KvStore>,
}

impl Registry {
    /// Creates a registry over the given store.
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// The underlying store handle.
    #[must_use]
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// Stores a subscription record under `key`.
    ///
    /// # Errors
    ///
    /// Propagates store failures; serialization of the record is
    /// infallible by construction.
    pub async fn put(
        &self,
        key: &str,
        url: &str,
        components: &[String],
    ) -> Result<(), StoreError> {
        let record = SubscriptionRecord {
            url: url.to_string(),
            scn_nodes: components.to_vec(),
        };
        let value = serde_json::to_string(&record).map_err(|e| StoreError::Backend {
            reason: e.to_string(),
        })?;
        self.kv.store(key, &value).await
    }

    /// Returns the record under `key`, when present and well-formed.
    ///
    /// # Errors
    ///
    /// Propagates store failures; a malformed stored value is a backend
    /// error.
    pub async fn get(&self, key: &str) -> Result<Option<SubscriptionRecord>, StoreError> {
        match self.kv.get(key).await? {
            Some(value) => {
                let record =
                    serde_json::from_str(&value).map_err(|e| StoreError::Backend {
                        reason: format!("malformed record under '{key}': {e}"),
                    })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Deletes the record under `key`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.kv.delete(key).await
    }

    /// Returns every subscription record in key order.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn scan_all(&self) -> Result<Vec<KvPair>, StoreError> {
        self.kv.get_range(RANGE_START, RANGE_END).await
    }

    /// Returns every record whose key starts with the owner prefix
    /// `sub#<owner>`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn scan_owner(&self, owner: &str) -> Result<Vec<KvPair>, StoreError> {
        let start = format!("{KEY_PREFIX}{KEY_DELIM}{owner}");
        let end = format!("{start}z");
        self.kv.get_range(&start, &end).await
    }

    /// Reconstructs the full subscription list from the registry.
    ///
    /// Records with malformed keys or values are skipped rather than
    /// failing the whole listing.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list(&self) -> Result<Vec<Subscription>, StoreError> {
        let pairs = self.scan_all().await?;
        Ok(pairs.iter().filter_map(|p| decode(&p.key, &p.value)).collect())
    }

    /// Reconstructs the subscriptions owned by `owner`.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn list_owner(&self, owner: &str) -> Result<Vec<Subscription>, StoreError> {
        let pairs = self.scan_all().await?;
        Ok(pairs
            .iter()
            .filter_map(|p| decode(&p.key, &p.value))
            .filter(|s| s.subscriber_component == owner || s.subscriber == owner)
            .collect())
    }
}

/// Rebuilds a [`Subscription`] from a registry key and its stored value.
#[must_use]
pub fn decode(key: &str, value: &str) -> Option<Subscription> {
    let parsed = parse_key(key)?;
    let record: SubscriptionRecord = serde_json::from_str(value).ok()?;

    let mut sub = Subscription {
        components: record.scn_nodes,
        url: record.url,
        states: parsed.states.clone(),
        software_status: parsed.software_status.clone(),
        roles: parsed.roles.clone(),
        sub_roles: parsed.sub_roles.clone(),
        enabled: parsed.enabled.then_some(true),
        subscriber: parsed.owner.clone(),
        ..Default::default()
    };
    if !parsed.agent.is_empty() {
        sub.subscriber = parsed.subscriber_id();
        sub.subscriber_component = parsed.owner;
        sub.subscriber_agent = parsed.agent;
    }
    Some(sub)
}
