//! Validated cluster component identifiers (xnames).

use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Hierarchical xname grammar: cabinet, then optional chassis, slot, BMC and
/// node levels. Examples: `x0`, `x0c1`, `x0c1s2`, `x0c1s2b0`, `x0c1s2b0n3`.
static XNAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^x\d+(c\d+(s\d+(b\d+(n\d+)?)?)?)?$").unwrap());

/// Node shape used by the `allnodes` subscription wildcard.
static NODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^x.*b[0-9]+n[0-9]+$").unwrap());

/// A schema-valid cluster component identifier.
///
/// Wraps a lowercased `String` with grammar validation. Subscriptions keyed
/// by an invalid owner could never be pruned when that owner goes away, so
/// owners are rejected up front.
///
/// # Examples
///
/// ```
/// use hmnfd_core::types::Xname;
///
/// let xname = Xname::new("x0c1s2b0n3").unwrap();
/// assert_eq!(xname.as_str(), "x0c1s2b0n3");
/// assert!(Xname::new("node17").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Xname(String);

impl Xname {
    /// Creates a new `Xname`, lowercasing and validating the input.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidXname`] when the identifier does not
    /// match the component grammar.
    pub fn new(value: impl Into<String>) -> Result<Self, CoreError> {
        let s = value.into().to_lowercase();
        if !XNAME_RE.is_match(&s) {
            return Err(CoreError::InvalidXname { xname: s });
        }
        Ok(Self(s))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `value` is a schema-valid component identifier.
    #[must_use]
    pub fn is_valid(value: &str) -> bool {
        XNAME_RE.is_match(&value.to_lowercase())
    }

    /// True when `value` has the node shape matched by the `allnodes`
    /// subscription wildcard.
    #[must_use]
    pub fn is_node(value: &str) -> bool {
        NODE_RE.is_match(value)
    }
}

impl fmt::Display for Xname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Xname {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Xname {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<Xname> for String {
    fn from(xname: Xname) -> Self {
        xname.0
    }
}
