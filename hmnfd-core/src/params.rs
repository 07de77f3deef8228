//! Runtime parameters and their layering.
//!
//! Parameters are layered `defaults < environment < command line < PATCH`.
//! The environment layer reads `HMNFD_*` variables; the PATCH layer comes
//! in through the `/params` endpoint and is persisted to the KV store so
//! every instance converges on the same values. `Port` and `Scn_in_url`
//! are fixed once the service is listening.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Shared, mutable view of the runtime parameters.
///
/// Readers take a short read lock and clone out what they need; the lock is
/// never held across an await point.
pub type SharedParams = Arc<RwLock<Params>>;

/// Wraps a parameter set for sharing across tasks.
#[must_use]
pub fn shared(params: Params) -> SharedParams {
    Arc::new(RwLock::new(params))
}

/// KV key holding the current parameter JSON for cross-instance consistency.
pub const PARAMS_KEY: &str = "hmnfd_params";

/// Default HTTPS listen port.
pub const DEFAULT_PORT: u16 = 28600;
/// Default KV store URL (in-process backend).
pub const DEFAULT_KV_URL: &str = "mem:";
/// Default State Manager base URL.
pub const DEFAULT_SM_URL: &str = "https://localhost:27999/hsm/v2";
/// Default maximum number of SCNs coalesced into one batch.
pub const DEFAULT_SCN_MAX_CACHE: u32 = 100;
/// Default seconds before a partially filled batch is flushed.
pub const DEFAULT_SCN_CACHE_DELAY: u32 = 5;
/// Default seconds between SCN delivery retries.
pub const DEFAULT_SCN_BACKOFF: u32 = 1;
/// Default number of SCN delivery attempts.
pub const DEFAULT_SCN_RETRIES: u32 = 5;
/// Default number of State Manager request retries.
pub const DEFAULT_SM_RETRIES: u32 = 3;
/// Default State Manager request timeout in seconds.
pub const DEFAULT_SM_TIMEOUT: u32 = 3;

/// The full runtime parameter set.
///
/// Field names match the service's parameter JSON wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Params {
    /// Debug verbosity level; greater than zero enables debug logging.
    #[serde(rename = "Debug")]
    pub debug: u32,
    /// Key-value store URL; `mem:` selects the in-process backend.
    #[serde(rename = "KV_url")]
    pub kv_url: String,
    /// Non-zero suppresses all State Manager traffic (for development).
    #[serde(rename = "Nosm")]
    pub nosm: u32,
    /// HTTPS listen port. Immutable after startup.
    #[serde(rename = "Port")]
    pub port: u16,
    /// URL where this service receives SCNs; registered with the State
    /// Manager. Immutable after startup.
    #[serde(rename = "Scn_in_url")]
    pub scn_in_url: String,
    /// Maximum SCNs coalesced into one batch before it is sealed.
    #[serde(rename = "Scn_max_cache")]
    pub scn_max_cache: u32,
    /// Seconds before a partially filled batch is flushed by the timer.
    #[serde(rename = "Scn_cache_delay")]
    pub scn_cache_delay: u32,
    /// Seconds between SCN delivery retries.
    #[serde(rename = "Scn_backoff")]
    pub scn_backoff: u32,
    /// Number of SCN delivery attempts before the subscriber is pruned.
    #[serde(rename = "Scn_retries")]
    pub scn_retries: u32,
    /// Number of State Manager request retries.
    #[serde(rename = "SM_retries")]
    pub sm_retries: u32,
    /// State Manager request timeout in seconds.
    #[serde(rename = "SM_timeout")]
    pub sm_timeout: u32,
    /// State Manager base URL.
    #[serde(rename = "SM_url")]
    pub sm_url: String,
    /// Telemetry bus endpoint as `host:port:topic`.
    #[serde(rename = "Telemetry_host")]
    pub telemetry_host: String,
    /// Non-zero injects dispatched SCNs onto the telemetry bus.
    #[serde(rename = "Use_telemetry")]
    pub use_telemetry: u32,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            debug: 0,
            kv_url: DEFAULT_KV_URL.to_string(),
            nosm: 0,
            port: DEFAULT_PORT,
            scn_in_url: String::new(),
            scn_max_cache: DEFAULT_SCN_MAX_CACHE,
            scn_cache_delay: DEFAULT_SCN_CACHE_DELAY,
            scn_backoff: DEFAULT_SCN_BACKOFF,
            scn_retries: DEFAULT_SCN_RETRIES,
            sm_retries: DEFAULT_SM_RETRIES,
            sm_timeout: DEFAULT_SM_TIMEOUT,
            sm_url: DEFAULT_SM_URL.to_string(),
            telemetry_host: String::new(),
            use_telemetry: 0,
        }
    }
}

impl Params {
    /// Applies `HMNFD_*` environment variable overrides on top of the
    /// current values. Unparseable values are reported and skipped.
    pub fn apply_env(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        env_u32("HMNFD_DEBUG", &mut self.debug, &mut warnings);
        env_string("HMNFD_KV_URL", &mut self.kv_url);
        env_bool("HMNFD_NOSM", &mut self.nosm, &mut warnings);
        env_u16("HMNFD_PORT", &mut self.port, &mut warnings);
        env_string("HMNFD_SCN_IN_URL", &mut self.scn_in_url);
        env_u32("HMNFD_SCN_MAX_CACHE", &mut self.scn_max_cache, &mut warnings);
        env_u32(
            "HMNFD_SCN_CACHE_DELAY",
            &mut self.scn_cache_delay,
            &mut warnings,
        );
        env_u32("HMNFD_SCN_BACKOFF", &mut self.scn_backoff, &mut warnings);
        env_u32("HMNFD_SCN_RETRIES", &mut self.scn_retries, &mut warnings);
        env_u32("HMNFD_SM_RETRIES", &mut self.sm_retries, &mut warnings);
        env_u32("HMNFD_SM_TIMEOUT", &mut self.sm_timeout, &mut warnings);
        env_string("HMNFD_SM_URL", &mut self.sm_url);
        env_string("HMNFD_TELEMETRY_HOST", &mut self.telemetry_host);
        env_bool("HMNFD_USE_TELEMETRY", &mut self.use_telemetry, &mut warnings);

        warnings
    }

    /// Applies a PATCH on top of the current values.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidParameter`] when the patch names a
    /// parameter that cannot change after startup (`Port`, `Scn_in_url`).
    /// No field is applied when any field is rejected.
    pub fn apply_patch(&mut self, patch: &ParamsPatch) -> Result<(), CoreError> {
        if patch.port.is_some() {
            return Err(CoreError::InvalidParameter {
                reason: "parameter 'Port' can't be changed in a PATCH operation".to_string(),
            });
        }
        if patch.scn_in_url.is_some() {
            return Err(CoreError::InvalidParameter {
                reason: "parameter 'Scn_in_url' can't be changed in a PATCH operation".to_string(),
            });
        }

        let mut next = self.clone();
        if let Some(v) = patch.debug {
            next.debug = v;
        }
        if let Some(v) = &patch.kv_url {
            next.kv_url = v.clone();
        }
        if let Some(v) = patch.nosm {
            next.nosm = v;
        }
        if let Some(v) = patch.scn_max_cache {
            next.scn_max_cache = v;
        }
        if let Some(v) = patch.scn_cache_delay {
            next.scn_cache_delay = v;
        }
        if let Some(v) = patch.scn_backoff {
            next.scn_backoff = v;
        }
        if let Some(v) = patch.scn_retries {
            next.scn_retries = v;
        }
        if let Some(v) = patch.sm_retries {
            next.sm_retries = v;
        }
        if let Some(v) = patch.sm_timeout {
            next.sm_timeout = v;
        }
        if let Some(v) = &patch.sm_url {
            next.sm_url = v.clone();
        }
        if let Some(v) = &patch.telemetry_host {
            next.telemetry_host = v.clone();
        }
        if let Some(v) = patch.use_telemetry {
            next.use_telemetry = v;
        }

        *self = next;
        Ok(())
    }
}

/// Partial parameter update, as accepted by the `/params` PATCH endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParamsPatch {
    /// See [`Params::debug`].
    #[serde(rename = "Debug", default)]
    pub debug: Option<u32>,
    /// See [`Params::kv_url`].
    #[serde(rename = "KV_url", default)]
    pub kv_url: Option<String>,
    /// See [`Params::nosm`].
    #[serde(rename = "Nosm", default)]
    pub nosm: Option<u32>,
    /// Rejected: immutable after startup.
    #[serde(rename = "Port", default)]
    pub port: Option<u16>,
    /// Rejected: immutable after startup.
    #[serde(rename = "Scn_in_url", default)]
    pub scn_in_url: Option<String>,
    /// See [`Params::scn_max_cache`].
    #[serde(rename = "Scn_max_cache", default)]
    pub scn_max_cache: Option<u32>,
    /// See [`Params::scn_cache_delay`].
    #[serde(rename = "Scn_cache_delay", default)]
    pub scn_cache_delay: Option<u32>,
    /// See [`Params::scn_backoff`].
    #[serde(rename = "Scn_backoff", default)]
    pub scn_backoff: Option<u32>,
    /// See [`Params::scn_retries`].
    #[serde(rename = "Scn_retries", default)]
    pub scn_retries: Option<u32>,
    /// See [`Params::sm_retries`].
    #[serde(rename = "SM_retries", default)]
    pub sm_retries: Option<u32>,
    /// See [`Params::sm_timeout`].
    #[serde(rename = "SM_timeout", default)]
    pub sm_timeout: Option<u32>,
    /// See [`Params::sm_url`].
    #[serde(rename = "SM_url", default)]
    pub sm_url: Option<String>,
    /// See [`Params::telemetry_host`].
    #[serde(rename = "Telemetry_host", default)]
    pub telemetry_host: Option<String>,
    /// See [`Params::use_telemetry`].
    #[serde(rename = "Use_telemetry", default)]
    pub use_telemetry: Option<u32>,
}

/// Parses a `host:port:topic` telemetry endpoint specification.
///
/// # Errors
///
/// Returns [`CoreError::InvalidParameter`] when the specification does not
/// have exactly three colon-separated fields or the port is not numeric.
pub fn parse_telemetry_host(spec: &str) -> Result<(String, u16, String), CoreError> {
    let toks: Vec<&str> = spec.split(':').collect();
    if toks.len() != 3 {
        return Err(CoreError::InvalidParameter {
            reason: format!(
                "invalid telemetry host specification '{spec}', expected host:port:topic"
            ),
        });
    }
    let port = toks[1].parse::<u16>().map_err(|_| CoreError::InvalidParameter {
        reason: format!("invalid telemetry port '{}', must be numeric", toks[1]),
    })?;
    Ok((toks[0].to_string(), port, toks[2].to_string()))
}

fn env_string(var: &str, target: &mut String) {
    if let Ok(val) = std::env::var(var) {
        if !val.is_empty() {
            *target = val;
        }
    }
}

fn env_u32(var: &str, target: &mut u32, warnings: &mut Vec<String>) {
    if let Ok(val) = std::env::var(var) {
        if val.is_empty() {
            return;
        }
        match val.parse::<u32>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warnings.push(format!("invalid {var} value '{val}'")),
        }
    }
}

fn env_u16(var: &str, target: &mut u16, warnings: &mut Vec<String>) {
    if let Ok(val) = std::env::var(var) {
        if val.is_empty() {
            return;
        }
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warnings.push(format!("invalid {var} value '{val}'")),
        }
    }
}

fn env_bool(var: &str, target: &mut u32, warnings: &mut Vec<String>) {
    if let Ok(val) = std::env::var(var) {
        match val.to_lowercase().as_str() {
            "" => {}
            "0" | "no" | "off" | "false" => *target = 0,
            "1" | "yes" | "on" | "true" => *target = 1,
            other => warnings.push(format!("invalid {var} value '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_defaults() {
        let params = Params::default();
        assert_eq!(params.port, 28600);
        assert_eq!(params.scn_max_cache, 100);
        assert_eq!(params.scn_cache_delay, 5);
        assert_eq!(params.scn_backoff, 1);
        assert_eq!(params.scn_retries, 5);
        assert_eq!(params.kv_url, "mem:");
    }

    #[test]
    fn test_params_json_field_names() {
        let json = serde_json::to_string(&Params::default()).unwrap();
        for field in [
            "\"Debug\"",
            "\"KV_url\"",
            "\"Nosm\"",
            "\"Port\"",
            "\"Scn_in_url\"",
            "\"Scn_max_cache\"",
            "\"Scn_cache_delay\"",
            "\"Scn_backoff\"",
            "\"Scn_retries\"",
            "\"SM_retries\"",
            "\"SM_timeout\"",
            "\"SM_url\"",
            "\"Telemetry_host\"",
            "\"Use_telemetry\"",
        ] {
            assert!(json.contains(field), "missing {field} in {json}");
        }
    }

    #[test]
    fn test_patch_applies_fields() {
        let mut params = Params::default();
        let patch: ParamsPatch =
            serde_json::from_str(r#"{"Debug": 2, "Scn_max_cache": 4}"#).unwrap();
        params.apply_patch(&patch).unwrap();
        assert_eq!(params.debug, 2);
        assert_eq!(params.scn_max_cache, 4);
        // Untouched fields keep their values.
        assert_eq!(params.scn_retries, 5);
    }

    #[test]
    fn test_patch_rejects_port() {
        let mut params = Params::default();
        let patch: ParamsPatch = serde_json::from_str(r#"{"Port": 1234, "Debug": 3}"#).unwrap();
        assert!(params.apply_patch(&patch).is_err());
        // Rejection is atomic: Debug must not have been applied.
        assert_eq!(params.debug, 0);
    }

    #[test]
    fn test_patch_rejects_scn_in_url() {
        let mut params = Params::default();
        let patch: ParamsPatch =
            serde_json::from_str(r#"{"Scn_in_url": "https://elsewhere/scn"}"#).unwrap();
        assert!(params.apply_patch(&patch).is_err());
    }

    #[test]
    fn test_parse_telemetry_host() {
        let (host, port, topic) = parse_telemetry_host("kafka:9092:scn-events").unwrap();
        assert_eq!(host, "kafka");
        assert_eq!(port, 9092);
        assert_eq!(topic, "scn-events");

        assert!(parse_telemetry_host("kafka:9092").is_err());
        assert!(parse_telemetry_host("kafka:abc:topic").is_err());
    }

    #[test]
    fn test_params_roundtrip() {
        let params = Params::default();
        let json = serde_json::to_string(&params).unwrap();
        let parsed: Params = serde_json::from_str(&json).unwrap();
        assert_eq!(params, parsed);
    }
}
