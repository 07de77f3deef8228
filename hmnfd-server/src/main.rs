//! # hmnfd
//!
//! State-change notification fan-out service. Receives State Change
//! Notifications from the Hardware State Manager, matches them against the
//! persistent subscription registry, and delivers them to subscriber
//! endpoints with bounded concurrency, retry and pruning.
//!
//! ```bash
//! # Run with defaults (in-memory KV, no State Manager contact)
//! hmnfd --nosm
//!
//! # Production-style invocation
//! hmnfd --sm_url https://hsm:27999/hsm/v2 --kv_url mem: --use_telemetry \
//!       --telemetry_host kafka:9092:scn-events
//! ```
//!
//! Every flag can also come from an `HMNFD_*` environment variable;
//! command-line values win.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::{info, warn};

use hmnfd_api::handlers::health::store_health_sentinel;
use hmnfd_api::AppState;
use hmnfd_core::{params, Params};
use hmnfd_engine::aggregator::SEALED_CHANNEL_CAPACITY;
use hmnfd_engine::pool::{DEFAULT_QUEUE_CAPACITY, DEFAULT_WORKERS};
use hmnfd_engine::upstream::{mandatory_subscription, CHANNEL_CAPACITY};
use hmnfd_engine::{
    build_http_client, Deliverer, Dispatcher, PruneMap, Pruner, ScnCache, UpstreamCoordinator,
    WorkerPool,
};
use hmnfd_store::{open_kv, KvStore, Registry, StoreError};
use hmnfd_telemetry::{logging, TcpBusConnector, TelemetrySidecar};

/// State-change notification fan-out service.
#[derive(Parser, Debug)]
#[command(name = "hmnfd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Debug verbosity level
    #[arg(long)]
    debug: Option<u32>,

    /// Key-value store base URL
    #[arg(long = "kv_url")]
    kv_url: Option<String>,

    /// Don't contact the State Manager (for development)
    #[arg(long)]
    nosm: bool,

    /// HTTPS port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// URL where this service receives SCNs
    #[arg(long = "scn_in_url")]
    scn_in_url: Option<String>,

    /// Max SCNs to coalesce into one batch
    #[arg(long = "scn_max_cache")]
    scn_max_cache: Option<u32>,

    /// Seconds before a partial batch is flushed
    #[arg(long = "scn_cache_delay")]
    scn_cache_delay: Option<u32>,

    /// Seconds between SCN send retries
    #[arg(long = "scn_backoff")]
    scn_backoff: Option<u32>,

    /// Number of SCN send attempts
    #[arg(long = "scn_retries")]
    scn_retries: Option<u32>,

    /// Number of State Manager retries
    #[arg(long = "sm_retries")]
    sm_retries: Option<u32>,

    /// Seconds to wait on State Manager accesses
    #[arg(long = "sm_timeout")]
    sm_timeout: Option<u32>,

    /// State Manager base URL
    #[arg(long = "sm_url")]
    sm_url: Option<String>,

    /// Telemetry endpoint as host:port:topic
    #[arg(long = "telemetry_host")]
    telemetry_host: Option<String>,

    /// Inject notifications onto the telemetry bus
    #[arg(long = "use_telemetry")]
    use_telemetry: bool,

    /// Disable outbound TLS certificate verification
    #[arg(long, env = "HMNFD_TLS_INSECURE")]
    insecure: bool,
}

impl Args {
    /// Applies command-line overrides on top of env-applied parameters.
    fn apply(&self, params: &mut Params) {
        if let Some(v) = self.debug {
            params.debug = v;
        }
        if let Some(v) = &self.kv_url {
            params.kv_url = v.clone();
        }
        if self.nosm {
            params.nosm = 1;
        }
        if let Some(v) = self.port {
            params.port = v;
        }
        if let Some(v) = &self.scn_in_url {
            params.scn_in_url = v.clone();
        }
        if let Some(v) = self.scn_max_cache {
            params.scn_max_cache = v;
        }
        if let Some(v) = self.scn_cache_delay {
            params.scn_cache_delay = v;
        }
        if let Some(v) = self.scn_backoff {
            params.scn_backoff = v;
        }
        if let Some(v) = self.scn_retries {
            params.scn_retries = v;
        }
        if let Some(v) = self.sm_retries {
            params.sm_retries = v;
        }
        if let Some(v) = self.sm_timeout {
            params.sm_timeout = v;
        }
        if let Some(v) = &self.sm_url {
            params.sm_url = v.clone();
        }
        if let Some(v) = &self.telemetry_host {
            params.telemetry_host = v.clone();
        }
        if self.use_telemetry {
            params.use_telemetry = 1;
        }
    }
}

fn env_flag(var: &str) -> bool {
    matches!(
        std::env::var(var).unwrap_or_default().to_lowercase().as_str(),
        "1" | "yes" | "on" | "true"
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Layering: defaults < environment < command line.
    let mut p = Params::default();
    let env_warnings = p.apply_env();
    args.apply(&mut p);

    logging::init(p.debug);
    for warning in env_warnings {
        warn!("{warning}");
    }

    let feature_xname_api = env_flag("HMNFD_FEATURE_XNAME_API");
    let fanout_sync = env_flag("HMNFD_FANOUT_SYNC");

    let service_name = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "hmnfd".to_string());
    info!(service = %service_name, "notification fan-out service starting");

    if p.scn_in_url.is_empty() {
        p.scn_in_url = format!("https://{}:{}/hmi/v2/scn", service_name, p.port);
    }
    let port = p.port;
    let scn_in_url = p.scn_in_url.clone();

    let client = build_http_client(p.sm_timeout, args.insecure, &service_name)
        .context("cannot build outbound HTTP client")?;
    let params = params::shared(p);

    // The service is worthless without its store; retry until it opens and
    // answers. Liveness and readiness fail until this completes.
    let kv = open_store(&params).await?;
    let registry = Registry::new(kv.clone());

    // Pipeline assembly, leaves first.
    let prune_map = Arc::new(PruneMap::new());
    let (telemetry, telemetry_rx) = TelemetrySidecar::new(params.clone());
    let deliverer = Arc::new(Deliverer::new(
        client.clone(),
        prune_map.clone(),
        params.clone(),
    ));
    let pool = WorkerPool::new(DEFAULT_WORKERS, DEFAULT_QUEUE_CAPACITY, deliverer);
    let (sealed_tx, sealed_rx) = mpsc::channel(SEALED_CHANNEL_CAPACITY);
    let cache = ScnCache::new(params.clone(), sealed_tx);
    let (hsmsub_tx, hsmsub_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let dispatcher = Dispatcher::new(
        registry.clone(),
        prune_map.clone(),
        pool.clone(),
        telemetry.clone(),
        fanout_sync,
    );
    let coordinator = UpstreamCoordinator::new(
        kv.clone(),
        client.clone(),
        params.clone(),
        hsmsub_tx.clone(),
        service_name.clone(),
    );
    let pruner = Pruner::new(registry.clone(), prune_map.clone());

    // Background tasks.
    tokio::spawn(cache.clone().run_timer());
    tokio::spawn(dispatcher.run(sealed_rx));
    tokio::spawn(pruner.run());
    tokio::spawn(coordinator.run(hsmsub_rx));
    tokio::spawn(telemetry.clone().run_writer(telemetry_rx));
    tokio::spawn(
        telemetry
            .clone()
            .run_connector(Arc::new(TcpBusConnector)),
    );
    tokio::spawn(hmnfd_engine::prune::startup_sweep(
        client,
        registry.clone(),
        prune_map.clone(),
        params.clone(),
    ));

    // Register this service's own interest: the transitions pruning needs.
    info!("auto-subscribing to SCNs");
    let _ = hsmsub_tx
        .send(mandatory_subscription(&service_name, &scn_in_url))
        .await;

    let state = Arc::new(AppState {
        registry,
        params,
        prune_map,
        cache,
        hsmsub_tx,
        telemetry,
        pool,
        feature_xname_api,
    });

    hmnfd_api::serve(state, port, shutdown::signal())
        .await
        .context("ingress server failed")?;

    info!("hmnfd stopped");
    Ok(())
}

/// Opens the KV store and verifies it can hold the health sentinel,
/// retrying transient failures forever with a 5 second pause.
async fn open_store(
    params: &hmnfd_core::params::SharedParams,
) -> anyhow::Result<Arc<dyn KvStore>> {
    let kv_url = params.read().kv_url.clone();

    let kv = loop {
        match open_kv(&kv_url) {
            Ok(kv) => break kv,
            Err(e @ StoreError::UnsupportedUrl { .. }) => {
                // Retrying cannot fix a bad URL.
                return Err(e).context("cannot open KV store");
            }
            Err(e) => {
                warn!(error = %e, "KV store open failed, retrying");
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    };
    info!("KV store connection succeeded");

    let mut attempt = 1u32;
    loop {
        match store_health_sentinel(&kv).await {
            Ok(()) => {
                info!("KV health check succeeded");
                break;
            }
            Err(e) => {
                warn!(attempt, error = %e, "KV health key store failed");
                attempt += 1;
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }

    Ok(kv)
}
