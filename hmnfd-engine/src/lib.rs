//! The hmnfd notification pipeline.
//!
//! An inbound SCN flows through this crate as follows:
//!
//! ```text
//! ingress -> ScnCache (coalesce) -> Dispatcher -> Matcher -> WorkerPool -> subscribers
//!                                        |
//!                                        +-> telemetry side-queue
//! ```
//!
//! Alongside the pipeline run the [`Pruner`] (deferred removal of dead
//! subscribers) and the [`UpstreamCoordinator`] (single deduplicated
//! registration with the Hardware State Manager).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregator;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod matcher;
pub mod pool;
pub mod prune;
pub mod upstream;

pub use aggregator::ScnCache;
pub use delivery::{build_http_client, Deliverer};
pub use dispatcher::Dispatcher;
pub use error::EngineError;
pub use pool::{JobStatus, ScnSendJob, WorkerPool};
pub use prune::{PruneMap, Pruner};
pub use upstream::{UpstreamCoordinator, UpstreamTracker};
