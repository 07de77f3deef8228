//! Single-job SCN delivery over HTTP.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONNECTION;
use reqwest::{Client, StatusCode};
use tracing::{debug, info, warn};

use hmnfd_core::params::SharedParams;

use crate::error::EngineError;
use crate::pool::{JobStatus, ScnSendJob};
use crate::prune::PruneMap;

/// Builds the shared outbound HTTP client.
///
/// One client serves every outbound request (fan-out and State Manager);
/// the per-request deadline is the `SM_timeout` parameter. Certificate
/// verification is on unless explicitly disabled.
///
/// # Errors
///
/// Returns [`EngineError::Http`] when the client cannot be constructed.
pub fn build_http_client(
    timeout_secs: u32,
    insecure: bool,
    user_agent: &str,
) -> Result<Client, EngineError> {
    Client::builder()
        .timeout(Duration::from_secs(u64::from(timeout_secs)))
        .danger_accept_invalid_certs(insecure)
        .user_agent(user_agent)
        .build()
        .map_err(|e| EngineError::Http {
            url: String::new(),
            reason: e.to_string(),
        })
}

/// Delivers SCN jobs to subscriber endpoints with retry and pruning.
pub struct Deliverer {
    client: Client,
    prune_map: Arc<PruneMap>,
    params: SharedParams,
}

impl Deliverer {
    /// Creates a deliverer sharing the given client, prune map and
    /// parameters.
    #[must_use]
    pub fn new(client: Client, prune_map: Arc<PruneMap>, params: SharedParams) -> Self {
        Self {
            client,
            prune_map,
            params,
        }
    }

    /// Runs one delivery job to completion.
    ///
    /// HTTP 200 is success. Other statuses retry up to the configured
    /// `Scn_retries` with a fixed `Scn_backoff` pause. A refused
    /// connection means the endpoint is gone: the subscriber is pruned
    /// immediately. Retry exhaustion also prunes.
    pub async fn deliver(&self, job: &Arc<ScnSendJob>) {
        // Jobs without a URL exist only as pool test fixtures.
        if job.url.is_empty() {
            job.set_status(JobStatus::Complete);
            return;
        }

        if self.is_pruned(&job.subscriber) {
            debug!(
                subscriber = %job.subscriber,
                url = %job.url,
                "not sending SCN, subscriber has been pruned"
            );
            job.set_status(JobStatus::Cancelled);
            return;
        }

        let (retries, backoff) = {
            let params = self.params.read();
            (
                params.scn_retries.max(1),
                Duration::from_secs(u64::from(params.scn_backoff)),
            )
        };

        for attempt in 1..=retries {
            if attempt > 1 {
                tokio::time::sleep(backoff).await;
            }

            let result = self
                .client
                .post(&job.url)
                .header(CONNECTION, "close")
                .json(&job.scn)
                .send()
                .await;

            match result {
                Ok(rsp) if rsp.status() == StatusCode::OK => {
                    if attempt > 1 {
                        info!(url = %job.url, attempt, "SCN send succeeded after retry");
                    }
                    job.set_status(JobStatus::Complete);
                    return;
                }
                Ok(rsp) => {
                    warn!(
                        url = %job.url,
                        attempt,
                        status = rsp.status().as_u16(),
                        "error response sending SCN"
                    );
                }
                Err(e) if is_connection_refused(&e) => {
                    info!(url = %job.url, "connection refused, dropping subscriber");
                    self.prune_map.insert(job.subscriber.clone());
                    job.fail("connection refused");
                    return;
                }
                Err(e) => {
                    warn!(url = %job.url, attempt, error = %e, "error sending SCN");
                }
            }
        }

        info!(
            subscriber = %job.subscriber,
            url = %job.url,
            "delivery retries exhausted, dropping subscription"
        );
        self.prune_map.insert(job.subscriber.clone());
        job.fail("delivery retries exhausted");
    }

    fn is_pruned(&self, subscriber: &str) -> bool {
        if self.prune_map.contains(subscriber) {
            return true;
        }
        // An agent-qualified subscriber is also covered by its owner.
        match subscriber.split_once('@') {
            Some((_, owner)) => self.prune_map.contains(owner),
            None => false,
        }
    }
}

/// Walks the error source chain looking for a refused connection.
fn is_connection_refused(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = e.source();
    }
    // Some transports only surface the condition in the message.
    format!("{err:?}").to_lowercase().contains("connection refused")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Router};
    use hmnfd_core::{params, Params, Scn};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_params() -> SharedParams {
        params::shared(Params {
            scn_retries: 2,
            scn_backoff: 0,
            ..Default::default()
        })
    }

    fn deliverer(prune_map: Arc<PruneMap>, params: SharedParams) -> Deliverer {
        Deliverer::new(
            build_http_client(2, true, "hmnfd-test").unwrap(),
            prune_map,
            params,
        )
    }

    fn job_for(url: &str) -> Arc<ScnSendJob> {
        let scn = Scn {
            components: vec!["x1000c2s3b0n4".to_string()],
            state: "Ready".to_string(),
            ..Default::default()
        };
        ScnSendJob::new(scn, "x0c1s2b0n3", url)
    }

    async fn serve(router: Router) -> (String, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (format!("http://{addr}/scn"), handle)
    }

    #[tokio::test]
    async fn test_deliver_success() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        let router = Router::new().route(
            "/scn",
            post(|body: String| async move {
                HITS.fetch_add(1, Ordering::SeqCst);
                assert!(body.contains("\"State\":\"Ready\""));
                "ok"
            }),
        );
        let (url, server) = serve(router).await;

        let prune_map = Arc::new(PruneMap::new());
        let job = job_for(&url);
        deliverer(prune_map.clone(), fast_params()).deliver(&job).await;

        assert_eq!(job.status(), JobStatus::Complete);
        assert_eq!(HITS.load(Ordering::SeqCst), 1);
        assert!(prune_map.is_empty());
        server.abort();
    }

    #[tokio::test]
    async fn test_deliver_retry_exhaustion_prunes() {
        static HITS: AtomicUsize = AtomicUsize::new(0);
        let router = Router::new().route(
            "/scn",
            post(|| async {
                HITS.fetch_add(1, Ordering::SeqCst);
                (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "nope")
            }),
        );
        let (url, server) = serve(router).await;

        let prune_map = Arc::new(PruneMap::new());
        let job = job_for(&url);
        deliverer(prune_map.clone(), fast_params()).deliver(&job).await;

        assert_eq!(job.status(), JobStatus::Error);
        // Configured retries, not a hard-coded count.
        assert_eq!(HITS.load(Ordering::SeqCst), 2);
        assert!(prune_map.contains("x0c1s2b0n3"));
        server.abort();
    }

    #[tokio::test]
    async fn test_deliver_connection_refused_prunes_immediately() {
        // Bind then drop a listener so the port is known-dead.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let prune_map = Arc::new(PruneMap::new());
        let job = job_for(&format!("http://{addr}/scn"));
        deliverer(prune_map.clone(), fast_params()).deliver(&job).await;

        assert_eq!(job.status(), JobStatus::Error);
        assert_eq!(job.error().unwrap(), "connection refused");
        assert!(prune_map.contains("x0c1s2b0n3"));
    }

    #[tokio::test]
    async fn test_deliver_skips_pruned_subscriber() {
        let prune_map = Arc::new(PruneMap::new());
        prune_map.insert("x0c1s2b0n3");

        // A pruned job never touches the network, so a dead URL is safe.
        let job = job_for("http://127.0.0.1:1/scn");
        deliverer(prune_map, fast_params()).deliver(&job).await;

        assert_eq!(job.status(), JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_deliver_skips_agent_of_pruned_owner() {
        let prune_map = Arc::new(PruneMap::new());
        prune_map.insert("x0c1s2b0n3");

        let scn = Scn::default();
        let job = ScnSendJob::new(scn, "handler@x0c1s2b0n3", "http://127.0.0.1:1/scn");
        deliverer(prune_map, fast_params()).deliver(&job).await;

        assert_eq!(job.status(), JobStatus::Cancelled);
    }
}
