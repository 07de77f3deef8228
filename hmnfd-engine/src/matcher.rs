//! SCN-to-subscription matching.
//!
//! All functions here are pure: the dispatcher parses each registry key
//! once and runs the SCN's attributes against the parsed selector
//! families. Matching is field-aware — a state only matches the `hs`
//! family, a role only the `roles` family, and so on — so an agent whose
//! name happens to equal an attribute token can never cause a spurious
//! match. Inputs are expected lowercase.

use std::collections::HashSet;

use hmnfd_core::{Scn, Xname};
use hmnfd_store::registry::ParsedKey;

/// Interest-list wildcard selecting every component in the SCN.
pub const WC_ALL: &str = "all";
/// Interest-list wildcard selecting only node-shaped components.
pub const WC_ALLNODES: &str = "allnodes";

/// States that mean a component can no longer receive notifications.
const UNAVAILABLE_STATES: [&str; 3] = ["empty", "off", "halt"];

/// True when the SCN moves its components out of service: hardware state
/// empty/off/halt, or an explicit disable.
#[must_use]
pub fn is_unavailable(scn: &Scn) -> bool {
    let state = scn.state.to_lowercase();
    if UNAVAILABLE_STATES.contains(&state.as_str()) {
        return true;
    }
    scn.enabled == Some(false)
}

/// True when any SCN attribute falls inside the matching selector family
/// of the subscription key.
#[must_use]
pub fn matches(scn: &Scn, key: &ParsedKey) -> bool {
    if !scn.state.is_empty() && key.states.iter().any(|s| *s == scn.state) {
        return true;
    }
    if !scn.software_status.is_empty()
        && key.software_status.iter().any(|s| *s == scn.software_status)
    {
        return true;
    }
    if !scn.role.is_empty() && key.roles.iter().any(|r| *r == scn.role) {
        return true;
    }
    if !scn.sub_role.is_empty() && key.sub_roles.iter().any(|r| *r == scn.sub_role) {
        return true;
    }
    scn.enabled.is_some() && key.enabled
}

/// Intersects a subscriber's interest list with the SCN's component list.
///
/// Wildcards are only honored as the sole first element of the interest
/// list: `all` takes the whole SCN list, `allnodes` the node-shaped subset.
/// Otherwise this is a set intersection that preserves SCN order and
/// consumes each SCN component at most once.
#[must_use]
pub fn intersect(interest: &[String], scn_components: &[String]) -> Vec<String> {
    let Some(first) = interest.first() else {
        return Vec::new();
    };

    match first.as_str() {
        WC_ALL => scn_components.to_vec(),
        WC_ALLNODES => scn_components
            .iter()
            .filter(|c| Xname::is_node(c))
            .cloned()
            .collect(),
        _ => {
            let mut wanted: HashSet<&str> = interest.iter().map(String::as_str).collect();
            scn_components
                .iter()
                .filter(|c| wanted.remove(c.as_str()))
                .cloned()
                .collect()
        }
    }
}

/// Builds the per-subscriber notification: the SCN's attribute fields with
/// the component list replaced by the computed intersection.
#[must_use]
pub fn notification_for(scn: &Scn, components: Vec<String>) -> Scn {
    let mut out = scn.clone();
    out.components = components;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmnfd_store::registry::parse_key;

    fn ready_scn(components: &[&str]) -> Scn {
        Scn {
            components: components.iter().map(ToString::to_string).collect(),
            state: "ready".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_is_unavailable_states() {
        for state in ["empty", "off", "halt", "Off"] {
            let scn = Scn {
                state: state.to_string(),
                ..Default::default()
            };
            assert!(is_unavailable(&scn), "{state} should be unavailable");
        }

        let scn = Scn {
            state: "ready".to_string(),
            ..Default::default()
        };
        assert!(!is_unavailable(&scn));
    }

    #[test]
    fn test_is_unavailable_disabled() {
        let scn = Scn {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(is_unavailable(&scn));

        let scn = Scn {
            enabled: Some(true),
            ..Default::default()
        };
        assert!(!is_unavailable(&scn));
    }

    #[test]
    fn test_matches_state_family() {
        let key = parse_key("sub#x0c1s2b0n3#hs.ready.standby#svc.handler").unwrap();
        assert!(matches(&ready_scn(&[]), &key));

        let off = Scn {
            state: "off".to_string(),
            ..Default::default()
        };
        assert!(!matches(&off, &key));
    }

    #[test]
    fn test_matches_is_field_aware() {
        // An agent literally named "ready" must not match a state of
        // "ready" arriving in another family.
        let key = parse_key("sub#x0c1s2b0n3#roles.compute#svc.ready").unwrap();
        assert!(!matches(&ready_scn(&[]), &key));

        let role_scn = Scn {
            role: "compute".to_string(),
            ..Default::default()
        };
        assert!(matches(&role_scn, &key));
    }

    #[test]
    fn test_matches_enabled() {
        let key = parse_key("sub#x0c1s2b0n3#enbl.enbl").unwrap();
        let scn = Scn {
            enabled: Some(false),
            ..Default::default()
        };
        assert!(matches(&scn, &key));
        assert!(!matches(&ready_scn(&[]), &key));
    }

    #[test]
    fn test_matches_monotonic_in_attributes() {
        // Adding an attribute to the SCN never removes a match.
        let key = parse_key("sub#x0c1s2b0n3#hs.ready").unwrap();
        let mut scn = ready_scn(&[]);
        assert!(matches(&scn, &key));

        scn.role = "compute".to_string();
        scn.software_status = "admindown".to_string();
        scn.enabled = Some(true);
        assert!(matches(&scn, &key));
    }

    #[test]
    fn test_intersect_plain() {
        let interest = vec!["x1000c2s3b0n4".to_string(), "x1000c2s3b0n5".to_string()];
        let comps = vec![
            "x1000c2s3b0n3".to_string(),
            "x1000c2s3b0n4".to_string(),
            "x1000c2s3b0n5".to_string(),
        ];
        assert_eq!(
            intersect(&interest, &comps),
            vec!["x1000c2s3b0n4", "x1000c2s3b0n5"]
        );
    }

    #[test]
    fn test_intersect_consumes_once() {
        let interest = vec!["x1000c2s3b0n4".to_string()];
        let comps = vec!["x1000c2s3b0n4".to_string(), "x1000c2s3b0n4".to_string()];
        assert_eq!(intersect(&interest, &comps), vec!["x1000c2s3b0n4"]);
    }

    #[test]
    fn test_intersect_all_wildcard() {
        let interest = vec![WC_ALL.to_string()];
        let comps = vec!["x0".to_string(), "x1000c2s3b0n4".to_string()];
        assert_eq!(intersect(&interest, &comps), comps);
    }

    #[test]
    fn test_intersect_allnodes_wildcard() {
        let interest = vec![WC_ALLNODES.to_string()];
        let comps = vec![
            "x0".to_string(),
            "x1000c2s3b0n4".to_string(),
            "x0c0s0b0".to_string(),
            "x0c0s0b0n0".to_string(),
        ];
        assert_eq!(
            intersect(&interest, &comps),
            vec!["x1000c2s3b0n4", "x0c0s0b0n0"]
        );
    }

    #[test]
    fn test_intersect_empty() {
        assert!(intersect(&[], &["x0".to_string()]).is_empty());
        let interest = vec!["x9c9s9b9n9".to_string()];
        assert!(intersect(&interest, &["x0c0s0b0n0".to_string()]).is_empty());
    }

    #[test]
    fn test_notification_for() {
        let scn = Scn {
            components: vec!["a".to_string(), "b".to_string()],
            state: "Ready".to_string(),
            timestamp: "2025-01-01T00:00:00.000000000Z".to_string(),
            ..Default::default()
        };
        let out = notification_for(&scn, vec!["b".to_string()]);
        assert_eq!(out.components, vec!["b"]);
        assert_eq!(out.state, "Ready");
        assert_eq!(out.timestamp, scn.timestamp);
    }
}
