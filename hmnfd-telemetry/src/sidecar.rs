//! Bounded telemetry queue, writer task and connector loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use hmnfd_core::params::{parse_telemetry_host, SharedParams};
use hmnfd_core::Scn;

use crate::bus::{BusConnector, BusStatus, TelemetryBus};

/// Queue capacity between the dispatcher and the writer task.
pub const QUEUE_CAPACITY: usize = 10_000;
/// Write attempts per message before it is dropped.
const WRITE_ATTEMPTS: u32 = 5;
/// Pause between write attempts.
const WRITE_BACKOFF: Duration = Duration::from_secs(1);
/// Period of the connector loop.
const CONNECT_PERIOD: Duration = Duration::from_secs(5);

/// Telemetry side-channel: non-blocking producer half plus the background
/// writer and connector loops.
pub struct TelemetrySidecar {
    tx: mpsc::Sender<String>,
    bus: Mutex<Option<Arc<dyn TelemetryBus>>>,
    params: SharedParams,
}

impl TelemetrySidecar {
    /// Creates the sidecar and the receiver end of its queue. The caller
    /// spawns [`run_writer`](Self::run_writer) with the receiver and
    /// [`run_connector`](Self::run_connector) with a bus connector.
    #[must_use]
    pub fn new(params: SharedParams) -> (Arc<Self>, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        (
            Arc::new(Self {
                tx,
                bus: Mutex::new(None),
                params,
            }),
            rx,
        )
    }

    /// Offers an SCN to the telemetry queue without ever blocking.
    ///
    /// A full queue means the bus has been down long enough to back up
    /// 10 000 messages; the SCN is dropped with a log line rather than
    /// stalling the fan-out pipeline.
    pub fn offer(&self, scn: &Scn) {
        if self.params.read().use_telemetry == 0 {
            return;
        }
        let msg = match serde_json::to_string(scn) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "cannot serialize SCN for telemetry");
                return;
            }
        };
        if self.tx.try_send(msg).is_err() {
            warn!("telemetry queue is full, dropping SCN");
        }
    }

    /// Connection state of the current bus handle, if any.
    #[must_use]
    pub fn bus_status(&self) -> Option<BusStatus> {
        self.bus.lock().as_ref().map(|bus| bus.status())
    }

    /// Writer task: drains the queue onto the bus with bounded retries.
    pub async fn run_writer(self: Arc<Self>, mut rx: mpsc::Receiver<String>) {
        info!("telemetry writer started");
        while let Some(msg) = rx.recv().await {
            let mut written = false;
            for attempt in 0..WRITE_ATTEMPTS {
                if attempt > 0 {
                    tokio::time::sleep(WRITE_BACKOFF).await;
                }
                if self.params.read().use_telemetry == 0 {
                    continue;
                }
                let bus = self.bus.lock().clone();
                let Some(bus) = bus else { continue };
                match bus.write(&msg).await {
                    Ok(()) => {
                        written = true;
                        break;
                    }
                    Err(e) => {
                        warn!(attempt = attempt + 1, error = %e, "telemetry write failed");
                    }
                }
            }
            if !written {
                warn!("telemetry write retries exhausted, dropping message");
            }
        }
    }

    /// Connector task: keeps the bus handle in sync with the
    /// `Use_telemetry` and `Telemetry_host` parameters.
    pub async fn run_connector(self: Arc<Self>, connector: Arc<dyn BusConnector>) {
        loop {
            let (enabled, host_spec) = {
                let params = self.params.read();
                (params.use_telemetry != 0, params.telemetry_host.clone())
            };

            if !enabled {
                let bus = self.bus.lock().take();
                if let Some(bus) = bus {
                    bus.disconnect().await;
                    info!("disconnected from telemetry bus");
                }
            } else if self.bus.lock().is_none() {
                match parse_telemetry_host(&host_spec) {
                    Ok((host, port, topic)) => {
                        debug!(host = %host, port = port, topic = %topic, "connecting to telemetry bus");
                        match connector.connect(&host, port, &topic).await {
                            Ok(bus) => {
                                *self.bus.lock() = Some(bus);
                            }
                            Err(e) => {
                                warn!(error = %e, "telemetry bus connect failed, retrying");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "telemetry host is not set or invalid");
                    }
                }
            }

            tokio::time::sleep(CONNECT_PERIOD).await;
        }
    }
}
