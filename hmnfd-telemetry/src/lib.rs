//! Telemetry side-channel for hmnfd.
//!
//! Dispatched SCNs are offered to a bounded queue and written onto a
//! message bus by a single background task. The queue never blocks the
//! notification pipeline: when the bus is down and the queue fills,
//! messages are dropped with a log line. Connection management runs in its
//! own loop so bus outages and runtime reconfiguration never stall writes.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;
pub mod logging;
pub mod sidecar;

pub use bus::{BusConnector, BusError, BusStatus, InMemoryBus, MemBusConnector, TcpBusConnector, TelemetryBus};
pub use sidecar::TelemetrySidecar;
