//! Persistent subscription storage for hmnfd.
//!
//! The service keeps every subscription as one record in a flat keyspace so
//! that a single lexicographic range scan returns the whole registry. This
//! crate provides the store abstraction ([`KvStore`]), the in-process
//! backend ([`MemKv`]) and the subscription key codec ([`registry`]).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod kv;
pub mod registry;

pub use kv::{open_kv, KvPair, KvStore, MemKv, StoreError, HEALTH_KEY, HEALTH_VALUE};
pub use registry::{ParsedKey, Registry, SubscriptionRecord};
