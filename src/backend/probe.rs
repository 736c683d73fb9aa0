//! Liveness probes.
//!
//! A [`Probe`] answers "is this upstream reachable and healthy right now?".
//! Failures of any kind collapse into `false`; callers never see an error.

use crate::backend::address::connect_target;
use crate::config::HealthCheckConfig;
use crate::metrics::MetricsCollector;
use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use http_body_util::Empty;
use hyper::header::HOST;
use hyper::{Request, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Liveness capability for a backend.
pub trait Probe: Send + Sync {
    /// Returns true iff `target` is currently considered alive.
    fn is_alive<'a>(&'a self, target: &'a Uri) -> BoxFuture<'a, bool>;
}

/// Why a probe did not report the expected status.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("invalid probe target: {0}")]
    InvalidTarget(String),

    #[error("connection failed: {0}")]
    Connect(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("unexpected status: {actual} (expected {expected})")]
    UnexpectedStatus {
        actual: StatusCode,
        expected: StatusCode,
    },
}

/// Issues an HTTP GET against the backend and compares the status exactly.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    /// Overrides the backend's own path when set.
    path: Option<String>,
    expected_status: StatusCode,
    timeout: Duration,
    /// Where `is_alive` results are counted, if anywhere.
    metrics: Option<MetricsCollector>,
}

impl HttpProbe {
    /// Probe expecting `200 OK` within `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            path: None,
            expected_status: StatusCode::OK,
            timeout,
            metrics: None,
        }
    }

    pub fn from_config(config: &HealthCheckConfig) -> Self {
        let expected_status =
            StatusCode::from_u16(config.expected_status).unwrap_or(StatusCode::OK);
        Self {
            path: config.path.clone(),
            expected_status,
            timeout: config.timeout,
            metrics: None,
        }
    }

    /// Count every `is_alive` answer in `metrics`.
    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_expected_status(mut self, status: StatusCode) -> Self {
        self.expected_status = status;
        self
    }

    /// Run one probe, reporting why it failed.
    pub async fn check(&self, target: &Uri) -> Result<(), ProbeError> {
        let status = match timeout(self.timeout, self.fetch_status(target)).await {
            Ok(result) => result?,
            Err(_) => return Err(ProbeError::Timeout(self.timeout)),
        };

        if status == self.expected_status {
            Ok(())
        } else {
            Err(ProbeError::UnexpectedStatus {
                actual: status,
                expected: self.expected_status,
            })
        }
    }

    async fn fetch_status(&self, target: &Uri) -> Result<StatusCode, ProbeError> {
        let (host, port) = connect_target(target)
            .ok_or_else(|| ProbeError::InvalidTarget(target.to_string()))?;
        let authority = target
            .authority()
            .map(|a| a.as_str().to_string())
            .unwrap_or_else(|| host.clone());

        let path = match self.path.as_deref() {
            Some(path) => path,
            None => target.path_and_query().map(|pq| pq.as_str()).unwrap_or("/"),
        };
        let request = Request::get(path)
            .header(HOST, authority)
            .body(Empty::<Bytes>::new())
            .map_err(|e| ProbeError::InvalidTarget(e.to_string()))?;

        let stream = TcpStream::connect((host.as_str(), port)).await?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;

        tokio::spawn(async move {
            if let Err(e) = conn.await {
                trace!(error = %e, "probe connection closed with error");
            }
        });

        let response = sender.send_request(request).await?;
        Ok(response.status())
    }
}

impl Probe for HttpProbe {
    fn is_alive<'a>(&'a self, target: &'a Uri) -> BoxFuture<'a, bool> {
        async move {
            let alive = match self.check(target).await {
                Ok(()) => true,
                Err(e) => {
                    debug!(backend = %target, error = %e, "liveness probe failed");
                    false
                }
            };
            if let Some(metrics) = &self.metrics {
                metrics.record_health_check(&target.to_string(), alive);
            }
            alive
        }
        .boxed()
    }
}
