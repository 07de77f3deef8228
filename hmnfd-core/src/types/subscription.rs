//! Subscription payloads and validation.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Delimiter between agent and owner in a v1 `Subscriber` field.
pub const AGENT_DELIM: char = '@';

/// A subscription request.
///
/// Used both for subscriber registrations against this service and for the
/// service's own upstream registration with the Hardware State Manager
/// (which ignores `Components`). Field names follow the HSM wire format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Components the subscriber wants notifications about. May contain the
    /// wildcards `all` or `allnodes` as the sole entry.
    #[serde(rename = "Components", alias = "components", default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<String>,

    /// `[agent@]owner` identity (v1), or the service's own name when
    /// registering upstream.
    #[serde(rename = "Subscriber", alias = "subscriber", default, skip_serializing_if = "String::is_empty")]
    pub subscriber: String,

    /// Owner component identifier, populated when listing subscriptions.
    #[serde(
        rename = "SubscriberComponent",
        alias = "subscribercomponent",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub subscriber_component: String,

    /// Agent name, populated when listing subscriptions.
    #[serde(
        rename = "SubscriberAgent",
        alias = "subscriberagent",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub subscriber_agent: String,

    /// Subscribe to enable/disable transitions.
    #[serde(rename = "Enabled", alias = "enabled", default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Role transitions of interest.
    #[serde(rename = "Roles", alias = "roles", default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,

    /// Sub-role transitions of interest.
    #[serde(rename = "SubRoles", alias = "subroles", default, skip_serializing_if = "Vec::is_empty")]
    pub sub_roles: Vec<String>,

    /// Software statuses of interest.
    #[serde(
        rename = "SoftwareStatus",
        alias = "softwarestatus",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub software_status: Vec<String>,

    /// Hardware states of interest.
    #[serde(rename = "States", alias = "states", default, skip_serializing_if = "Vec::is_empty")]
    pub states: Vec<String>,

    /// Delivery URL.
    #[serde(rename = "Url", alias = "url", default)]
    pub url: String,
}

impl Subscription {
    /// True when at least one attribute selector family is non-empty.
    #[must_use]
    pub fn has_selectors(&self) -> bool {
        !self.states.is_empty()
            || !self.software_status.is_empty()
            || !self.roles.is_empty()
            || !self.sub_roles.is_empty()
            || self.enabled.is_some()
    }

    /// Splits a `[agent@]owner` subscriber string into `(owner, agent)`,
    /// both lowercased. The agent is empty when absent.
    #[must_use]
    pub fn split_subscriber(subscriber: &str) -> (String, String) {
        match subscriber.split_once(AGENT_DELIM) {
            Some((agent, owner)) => (owner.to_lowercase(), agent.to_lowercase()),
            None => (subscriber.to_lowercase(), String::new()),
        }
    }

    /// Validates a v1 subscribe payload, where the identity rides in the
    /// `Subscriber` body field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSubscription`] naming the first missing
    /// or malformed field.
    pub fn validate_v1(&self) -> Result<(), CoreError> {
        if self.subscriber.is_empty() {
            return Err(CoreError::invalid_subscription(
                "missing Subscriber field",
            ));
        }
        if self.subscriber.matches(AGENT_DELIM).count() > 1 {
            return Err(CoreError::invalid_subscription(
                "Subscriber field has invalid format",
            ));
        }
        self.validate_common()
    }

    /// Validates a v2 subscribe payload, where the identity comes from the
    /// URL path rather than the body.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidSubscription`] naming the first missing
    /// field.
    pub fn validate_v2(&self) -> Result<(), CoreError> {
        self.validate_common()
    }

    fn validate_common(&self) -> Result<(), CoreError> {
        if self.components.is_empty() {
            return Err(CoreError::invalid_subscription(
                "missing Components array field",
            ));
        }
        if self.url.is_empty() {
            return Err(CoreError::invalid_subscription("missing Url field"));
        }
        if !self.has_selectors() {
            return Err(CoreError::invalid_subscription(
                "at least one of States, SoftwareStatus, Roles, SubRoles, Enabled is required",
            ));
        }
        Ok(())
    }
}

/// Body of a v1 subscription DELETE request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionDelete {
    /// `[agent@]owner` identity of the subscription to remove.
    #[serde(rename = "Subscriber", default)]
    pub subscriber: String,

    /// Delivery URL of the subscription to remove.
    #[serde(rename = "Url", default)]
    pub url: String,
}

/// Response payload of the subscription list endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionList {
    /// All current subscriptions, reconstructed from the registry.
    #[serde(rename = "SubscriptionList")]
    pub subscription_list: Vec<Subscription>,
}
