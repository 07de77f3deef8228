//! Core domain types for the hmnfd notification fan-out service.
//!
//! This crate defines the wire-level data model shared by every other
//! hmnfd crate:
//! - State Change Notifications ([`Scn`]) as emitted by the upstream
//!   Hardware State Manager and forwarded to subscribers
//! - Subscription requests ([`Subscription`]) and their validation rules
//! - Validated component identifiers ([`types::Xname`])
//! - The layered runtime parameter set ([`params::Params`])

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod params;
pub mod types;

pub use error::CoreError;
pub use params::Params;
pub use types::scn::Scn;
pub use types::subscription::{Subscription, SubscriptionDelete, SubscriptionList};
pub use types::xname::Xname;
