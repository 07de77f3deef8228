//! HTTP ingress for hmnfd.
//!
//! Two schema versions share handlers where semantics match: `/hmi/v1`
//! carries the subscriber identity in request bodies, `/hmi/v2` in the URL
//! path. Errors are RFC 7807 problem details.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod handlers;
pub mod problem;
pub mod routes;
pub mod server;
pub mod state;


pub use problem::{ApiError, ApiResult};
pub use routes::create_router;
pub use server::serve;
pub use state::AppState;
