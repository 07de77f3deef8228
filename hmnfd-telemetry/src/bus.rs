//! Message-bus abstraction.
//!
//! The bus client proper is an external concern; the sidecar works against
//! [`TelemetryBus`] and obtains connections through a [`BusConnector`]. A
//! TCP line-delimited transport is provided as the concrete writer, and an
//! in-memory bus backs the tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::info;

/// Bus operation errors.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// The connection attempt failed.
    #[error("bus connect to {endpoint} failed: {reason}")]
    Connect {
        /// Target `host:port`.
        endpoint: String,
        /// Failure description.
        reason: String,
    },

    /// A write failed or the bus is closed.
    #[error("bus write failed: {reason}")]
    Write {
        /// Failure description.
        reason: String,
    },
}

/// Connection state of a bus handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusStatus {
    /// Connected and accepting writes.
    Open,
    /// No longer accepting writes.
    Closed,
}

/// A write-only message bus connection.
#[async_trait]
pub trait TelemetryBus: Send + Sync {
    /// Writes one message onto the bus topic.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Write`] when the bus is closed or the transport
    /// fails; the caller decides whether to retry.
    async fn write(&self, msg: &str) -> Result<(), BusError>;

    /// Current connection state.
    fn status(&self) -> BusStatus;

    /// Closes the connection. Further writes fail.
    async fn disconnect(&self);
}

/// Establishes bus connections for the sidecar's connector loop.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Connects a writer to `topic` at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Connect`] when the endpoint is unreachable.
    async fn connect(
        &self,
        host: &str,
        port: u16,
        topic: &str,
    ) -> Result<Arc<dyn TelemetryBus>, BusError>;
}

/// TCP transport writing one message per line, prefixed with the topic.
pub struct TcpLineBus {
    topic: String,
    stream: Mutex<TcpStream>,
    open: AtomicBool,
}

#[async_trait]
impl TelemetryBus for TcpLineBus {
    async fn write(&self, msg: &str) -> Result<(), BusError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(BusError::Write {
                reason: "bus is closed".to_string(),
            });
        }
        let line = format!("{} {}\n", self.topic, msg);
        let mut stream = self.stream.lock().await;
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|e| BusError::Write {
                reason: e.to_string(),
            })
    }

    fn status(&self) -> BusStatus {
        if self.open.load(Ordering::Relaxed) {
            BusStatus::Open
        } else {
            BusStatus::Closed
        }
    }

    async fn disconnect(&self) {
        self.open.store(false, Ordering::Relaxed);
        let mut stream = self.stream.lock().await;
        let _ = stream.shutdown().await;
    }
}

/// Connector producing [`TcpLineBus`] handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpBusConnector;

#[async_trait]
impl BusConnector for TcpBusConnector {
    async fn connect(
        &self,
        host: &str,
        port: u16,
        topic: &str,
    ) -> Result<Arc<dyn TelemetryBus>, BusError> {
        let endpoint = format!("{host}:{port}");
        let stream = TcpStream::connect(&endpoint)
            .await
            .map_err(|e| BusError::Connect {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;
        info!(endpoint = %endpoint, topic = %topic, "connected to telemetry bus");
        Ok(Arc::new(TcpLineBus {
            topic: topic.to_string(),
            stream: Mutex::new(stream),
            open: AtomicBool::new(true),
        }))
    }
}

/// In-memory bus for tests; stores written messages for inspection.
#[derive(Default)]
pub struct InMemoryBus {
    messages: parking_lot::RwLock<Vec<String>>,
    open: AtomicBool,
}

impl InMemoryBus {
    /// Creates an open in-memory bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            messages: parking_lot::RwLock::new(Vec::new()),
            open: AtomicBool::new(true),
        }
    }

    /// All messages written so far.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.read().clone()
    }

    /// Number of messages written so far.
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.messages.read().len()
    }
}

#[async_trait]
impl TelemetryBus for InMemoryBus {
    async fn write(&self, msg: &str) -> Result<(), BusError> {
        if !self.open.load(Ordering::Relaxed) {
            return Err(BusError::Write {
                reason: "bus is closed".to_string(),
            });
        }
        self.messages.write().push(msg.to_string());
        Ok(())
    }

    fn status(&self) -> BusStatus {
        if self.open.load(Ordering::Relaxed) {
            BusStatus::Open
        } else {
            BusStatus::Closed
        }
    }

    async fn disconnect(&self) {
        self.open.store(false, Ordering::Relaxed);
    }
}

/// Connector handing out a fixed [`InMemoryBus`], for tests.
#[derive(Clone)]
pub struct MemBusConnector {
    bus: Arc<InMemoryBus>,
}

impl MemBusConnector {
    /// Creates a connector around the given bus.
    #[must_use]
    pub fn new(bus: Arc<InMemoryBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl BusConnector for MemBusConnector {
    async fn connect(
        &self,
        _host: &str,
        _port: u16,
        _topic: &str,
    ) -> Result<Arc<dyn TelemetryBus>, BusError> {
        Ok(self.bus.clone())
    }
}
