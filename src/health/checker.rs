//! Background health checker.
//!
//! Periodically probes every backend and records the results into
//! [`HealthState`], so selection can read a cached answer instead of
//! probing on the request path.

use crate::backend::HttpProbe;
use crate::health::HealthState;
use crate::metrics::MetricsCollector;
use futures::future::join_all;
use hyper::Uri;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Active health checker that probes backends on an interval.
pub struct HealthChecker {
    /// Health state to update.
    health_state: Arc<HealthState>,
    /// Probe used for every check.
    probe: HttpProbe,
    /// Backends to check, in pool order.
    targets: Vec<Uri>,
    /// Time between rounds.
    interval: Duration,
    metrics: MetricsCollector,
}

impl HealthChecker {
    /// Create a new health checker.
    pub fn new(
        health_state: Arc<HealthState>,
        probe: HttpProbe,
        targets: Vec<Uri>,
        interval: Duration,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            health_state,
            probe,
            targets,
            interval,
            metrics,
        }
    }

    /// Probe every backend once, concurrently, and record the results.
    pub async fn check_all(&self) {
        let results = join_all(self.targets.iter().map(|target| async move {
            (target, self.probe.check(target).await)
        }))
        .await;

        for (target, result) in results {
            let backend = target.to_string();
            match result {
                Ok(()) => {
                    debug!(backend = %target, "health check passed");
                    self.health_state.record_success(target);
                    self.metrics.record_health_check(&backend, true);
                }
                Err(e) => {
                    warn!(backend = %target, error = %e, "health check failed");
                    self.health_state.record_failure(target);
                    self.metrics.record_health_check(&backend, false);
                }
            }
        }

        for health in self.health_state.snapshot() {
            debug!(
                backend = %health.backend,
                healthy = health.healthy,
                consecutive_failures = health.consecutive_failures,
                last_check = health.last_check,
                "backend health"
            );
            self.metrics
                .set_backend_health(&health.backend.to_string(), health.healthy);
        }
    }

    /// Run checks until shutdown. The first round starts immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            backends = self.targets.len(),
            interval = %humantime::format_duration(self.interval),
            "health checker starting"
        );

        for target in &self.targets {
            self.health_state.register_server(target);
        }

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }

                _ = shutdown.recv() => {
                    info!("health checker shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::parse_address;
    use crate::health::HealthConfig;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn ok_server() -> Uri {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream
                        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                        .await;
                });
            }
        });
        parse_address(&format!("http://{}", addr)).unwrap()
    }

    async fn closed_port() -> Uri {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        parse_address(&format!("http://{}", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_check_all_records_results() {
        let alive = ok_server().await;
        let dead = closed_port().await;

        let state = Arc::new(HealthState::with_config(HealthConfig {
            unhealthy_threshold: 2,
            healthy_threshold: 1,
        }));
        let checker = HealthChecker::new(
            Arc::clone(&state),
            HttpProbe::new(Duration::from_secs(1)),
            vec![alive.clone(), dead.clone()],
            Duration::from_secs(60),
            MetricsCollector::new(),
        );

        checker.check_all().await;
        assert!(state.is_healthy(&alive));
        assert!(state.is_healthy(&dead)); // One failure is below threshold
        assert_eq!(state.get_failures(&dead), 1);

        checker.check_all().await;
        assert!(state.is_healthy(&alive));
        assert!(!state.is_healthy(&dead));
    }

    #[tokio::test]
    async fn test_check_all_refreshes_health_gauges() {
        let alive = ok_server().await;
        let dead = closed_port().await;

        let state = Arc::new(HealthState::with_config(HealthConfig {
            unhealthy_threshold: 1,
            healthy_threshold: 1,
        }));
        let metrics = MetricsCollector::new();
        let checker = HealthChecker::new(
            Arc::clone(&state),
            HttpProbe::new(Duration::from_secs(1)),
            vec![alive.clone(), dead.clone()],
            Duration::from_secs(60),
            metrics.clone(),
        );

        checker.check_all().await;

        let text = metrics.encode().unwrap();
        assert!(text.contains(&format!("rrlb_backend_health{{backend=\"{}\"}} 1", alive)));
        assert!(text.contains(&format!("rrlb_backend_health{{backend=\"{}\"}} 0", dead)));
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dead = closed_port().await;
        let state = Arc::new(HealthState::with_config(HealthConfig {
            unhealthy_threshold: 1,
            healthy_threshold: 1,
        }));
        let checker = HealthChecker::new(
            Arc::clone(&state),
            HttpProbe::new(Duration::from_millis(500)),
            vec![dead.clone()],
            Duration::from_millis(20),
            MetricsCollector::new(),
        );

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(checker.run(rx));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!state.is_healthy(&dead));

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("checker did not stop")
            .unwrap();
    }
}
