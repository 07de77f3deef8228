//! State Change Notification payloads.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// A State Change Notification as received from the Hardware State Manager
/// and forwarded to subscribers.
///
/// The same structure serves both directions; only the component list
/// differs per subscriber after matching. Field names follow the HSM wire
/// format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scn {
    /// Components this notification applies to, in HSM emission order.
    #[serde(rename = "Components", default)]
    pub components: Vec<String>,

    /// Enable-flag transition; absent when the SCN is not about enablement.
    #[serde(rename = "Enabled", default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Free-form flag string.
    #[serde(rename = "Flag", default, skip_serializing_if = "String::is_empty")]
    pub flag: String,

    /// Role transition.
    #[serde(rename = "Role", default, skip_serializing_if = "String::is_empty")]
    pub role: String,

    /// Sub-role transition.
    #[serde(rename = "SubRole", default, skip_serializing_if = "String::is_empty")]
    pub sub_role: String,

    /// Software status transition.
    #[serde(
        rename = "SoftwareStatus",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub software_status: String,

    /// Hardware state transition.
    #[serde(rename = "State", default, skip_serializing_if = "String::is_empty")]
    pub state: String,

    /// RFC3339-nanosecond timestamp, stamped when a batch is sealed.
    #[serde(rename = "Timestamp", default, skip_serializing_if = "String::is_empty")]
    pub timestamp: String,
}

impl Scn {
    /// Lowercases every attribute and component in place.
    ///
    /// Matching and registry keys are case-insensitive by construction;
    /// normalizing once up front is cheaper than lowercasing at every
    /// comparison.
    pub fn to_lowercase(&mut self) {
        for comp in &mut self.components {
            *comp = comp.to_lowercase();
        }
        self.flag = self.flag.to_lowercase();
        self.role = self.role.to_lowercase();
        self.sub_role = self.sub_role.to_lowercase();
        self.software_status = self.software_status.to_lowercase();
        self.state = self.state.to_lowercase();
    }

    /// Returns a lowercased copy, leaving `self` intact for forwarding.
    #[must_use]
    pub fn lowercased(&self) -> Self {
        let mut copy = self.clone();
        copy.to_lowercase();
        copy
    }

    /// True when at least one matchable attribute is set.
    ///
    /// An SCN with no state, software status, role, sub-role or enabled
    /// flag cannot match any subscription.
    #[must_use]
    pub fn has_attributes(&self) -> bool {
        !self.state.is_empty()
            || !self.software_status.is_empty()
            || !self.role.is_empty()
            || !self.sub_role.is_empty()
            || self.enabled.is_some()
    }

    /// Stamps the notification with the current time in RFC3339 nanosecond
    /// format.
    pub fn stamp(&mut self) {
        self.timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scn_lowercase() {
        let mut scn = Scn {
            components: vec!["x0C0S0B0N0".to_string()],
            state: "Ready".to_string(),
            role: "Compute".to_string(),
            ..Default::default()
        };
        scn.to_lowercase();

        assert_eq!(scn.components[0], "x0c0s0b0n0");
        assert_eq!(scn.state, "ready");
        assert_eq!(scn.role, "compute");
    }

    #[test]
    fn test_scn_has_attributes() {
        let scn = Scn {
            components: vec!["x0c0s0b0n0".to_string()],
            ..Default::default()
        };
        assert!(!scn.has_attributes());

        let scn = Scn {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(scn.has_attributes());
    }

    #[test]
    fn test_scn_serde_field_names() {
        let scn = Scn {
            components: vec!["x1000c2s3b0n4".to_string()],
            state: "Ready".to_string(),
            ..Default::default()
        };

        let json = serde_json::to_string(&scn).unwrap();
        assert!(json.contains("\"Components\""));
        assert!(json.contains("\"State\":\"Ready\""));
        // Empty optionals are omitted entirely.
        assert!(!json.contains("SoftwareStatus"));
        assert!(!json.contains("Enabled"));
    }

    #[test]
    fn test_scn_stamp() {
        let mut scn = Scn::default();
        scn.stamp();
        assert!(scn.timestamp.contains('T'));
        // Nanosecond precision carries nine fractional digits.
        let frac = scn.timestamp.split('.').nth(1).unwrap();
        assert!(frac.len() >= 9);
    }
}
