//! Metrics collector using prometheus-client.
//!
//! Provides metrics for forwarded requests, selection outcomes, probes and
//! backend health.

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Labels for request metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct RequestLabels {
    pub backend: String,
    pub method: String,
    pub status: String,
}

/// Labels for per-backend metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct BackendLabels {
    pub backend: String,
}

/// Labels for selection metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SelectionLabels {
    pub outcome: SelectionOutcome,
}

/// How a selection attempt ended.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum SelectionOutcome {
    Selected,
    NoBackend,
    TimedOut,
}

/// Labels for health check metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HealthCheckLabels {
    pub backend: String,
    pub result: HealthCheckResult,
}

/// Result of a health check.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum HealthCheckResult {
    Success,
    Failure,
}

/// Collects and stores all metrics.
#[derive(Clone)]
pub struct MetricsCollector {
    inner: Arc<MetricsCollectorInner>,
}

struct MetricsCollectorInner {
    /// Forwarded requests by backend, method and status.
    requests_total: Family<RequestLabels, Counter>,
    /// Forwarding duration in seconds, per backend.
    request_duration_seconds: Family<BackendLabels, Histogram>,
    /// Selection outcomes.
    selections_total: Family<SelectionLabels, Counter>,
    /// Open client connections.
    active_connections: Gauge,
    /// Accepted client connections.
    connections_total: Counter,
    /// Backend health gauge (1 = healthy, 0 = unhealthy).
    backend_health: Family<BackendLabels, Gauge>,
    /// Liveness probe results, on demand and background.
    health_checks_total: Family<HealthCheckLabels, Counter>,
    registry: Registry,
}

impl MetricsCollector {
    /// Create a new metrics collector.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let requests_total = Family::<RequestLabels, Counter>::default();
        let request_duration_seconds =
            Family::<BackendLabels, Histogram>::new_with_constructor(|| {
                // 1ms up to ~15s
                Histogram::new(exponential_buckets(0.001, 2.5, 13))
            });
        let selections_total = Family::<SelectionLabels, Counter>::default();
        let active_connections = Gauge::default();
        let connections_total = Counter::default();
        let backend_health = Family::<BackendLabels, Gauge>::default();
        let health_checks_total = Family::<HealthCheckLabels, Counter>::default();

        registry.register(
            "rrlb_requests",
            "Total number of forwarded requests",
            requests_total.clone(),
        );
        registry.register(
            "rrlb_request_duration_seconds",
            "Forwarding duration in seconds",
            request_duration_seconds.clone(),
        );
        registry.register(
            "rrlb_selections",
            "Backend selection outcomes",
            selections_total.clone(),
        );
        registry.register(
            "rrlb_active_connections",
            "Number of open client connections",
            active_connections.clone(),
        );
        registry.register(
            "rrlb_connections",
            "Total number of accepted client connections",
            connections_total.clone(),
        );
        registry.register(
            "rrlb_backend_health",
            "Backend health status (1=healthy, 0=unhealthy)",
            backend_health.clone(),
        );
        registry.register(
            "rrlb_health_checks",
            "Total number of liveness probes performed",
            health_checks_total.clone(),
        );

        Self {
            inner: Arc::new(MetricsCollectorInner {
                requests_total,
                request_duration_seconds,
                selections_total,
                active_connections,
                connections_total,
                backend_health,
                health_checks_total,
                registry,
            }),
        }
    }

    /// Get the prometheus registry for encoding.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Record a completed forward.
    pub fn record_request(&self, backend: &str, method: &str, status: u16, duration: Duration) {
        let labels = RequestLabels {
            backend: backend.to_string(),
            method: method.to_string(),
            status: status.to_string(),
        };
        self.inner.requests_total.get_or_create(&labels).inc();

        self.inner
            .request_duration_seconds
            .get_or_create(&BackendLabels {
                backend: backend.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    /// Record how a backend selection ended.
    pub fn record_selection(&self, outcome: SelectionOutcome) {
        self.inner
            .selections_total
            .get_or_create(&SelectionLabels { outcome })
            .inc();
    }

    pub fn connection_opened(&self) {
        self.inner.active_connections.inc();
        self.inner.connections_total.inc();
    }

    pub fn connection_closed(&self) {
        self.inner.active_connections.dec();
    }

    /// Update backend health status.
    pub fn set_backend_health(&self, backend: &str, healthy: bool) {
        self.inner
            .backend_health
            .get_or_create(&BackendLabels {
                backend: backend.to_string(),
            })
            .set(if healthy { 1 } else { 0 });
    }

    /// Record a liveness probe result.
    pub fn record_health_check(&self, backend: &str, success: bool) {
        let labels = HealthCheckLabels {
            backend: backend.to_string(),
            result: if success {
                HealthCheckResult::Success
            } else {
                HealthCheckResult::Failure
            },
        };
        self.inner.health_checks_total.get_or_create(&labels).inc();
    }

    /// Encode all metrics in the Prometheus text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, self.registry())?;
        Ok(buffer)
    }
}

impl fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsCollector").finish_non_exhaustive()
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request() {
        let collector = MetricsCollector::new();
        collector.record_request("http://127.0.0.1:9001/", "GET", 200, Duration::from_millis(50));
        collector.record_request("http://127.0.0.1:9001/", "GET", 502, Duration::from_millis(5));

        let text = collector.encode().unwrap();
        assert!(text.contains("rrlb_requests_total"));
        assert!(text.contains("status=\"502\""));
        assert!(text.contains("rrlb_request_duration_seconds"));
    }

    #[test]
    fn test_selection_outcomes() {
        let collector = MetricsCollector::new();
        collector.record_selection(SelectionOutcome::Selected);
        collector.record_selection(SelectionOutcome::NoBackend);

        let text = collector.encode().unwrap();
        assert!(text.contains("outcome=\"Selected\""));
        assert!(text.contains("outcome=\"NoBackend\""));
    }

    #[test]
    fn test_connection_tracking() {
        let collector = MetricsCollector::new();
        collector.connection_opened();
        collector.connection_opened();
        collector.connection_closed();

        let text = collector.encode().unwrap();
        assert!(text.contains("rrlb_active_connections 1"));
        assert!(text.contains("rrlb_connections_total 2"));
    }

    #[test]
    fn test_backend_health() {
        let collector = MetricsCollector::new();
        collector.set_backend_health("http://127.0.0.1:9001/", true);
        collector.set_backend_health("http://127.0.0.1:9002/", false);
        collector.record_health_check("http://127.0.0.1:9002/", false);

        let text = collector.encode().unwrap();
        assert!(text.contains("rrlb_backend_health"));
        assert!(text.contains("result=\"Failure\""));
    }
}
