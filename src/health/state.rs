//! Health state management.
//!
//! Cached liveness for every backend, fed by the background checker.

use crate::config::HealthCheckConfig;
use dashmap::DashMap;
use hyper::Uri;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Shared health state for all backends.
#[derive(Debug)]
pub struct HealthState {
    /// Health information per backend.
    servers: DashMap<Uri, ServerHealth>,
    /// Configuration for health tracking.
    config: HealthConfig,
}

/// Thresholds for flipping a backend between alive and dead.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,
    /// Consecutive successes before marking healthy.
    pub healthy_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        }
    }
}

impl From<&HealthCheckConfig> for HealthConfig {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            unhealthy_threshold: config.unhealthy_threshold,
            healthy_threshold: config.healthy_threshold,
        }
    }
}

/// Health information for a single backend.
#[derive(Debug)]
pub struct ServerHealth {
    healthy: AtomicBool,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    /// Unix timestamp (seconds) of the last recorded probe, 0 if never probed.
    last_check: AtomicU64,
}

impl Default for ServerHealth {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            last_check: AtomicU64::new(0),
        }
    }
}

/// Point-in-time view of one backend's health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub backend: Uri,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_check: u64,
}

impl HealthState {
    /// Create a new health state tracker with default config.
    pub fn new() -> Self {
        Self::with_config(HealthConfig::default())
    }

    /// Create a new health state tracker with custom config.
    pub fn with_config(config: HealthConfig) -> Self {
        Self {
            servers: DashMap::new(),
            config,
        }
    }

    /// Register a backend for health tracking. New backends start healthy.
    pub fn register_server(&self, server: &Uri) {
        self.servers.entry(server.clone()).or_default();
    }

    /// Check if a backend is healthy.
    pub fn is_healthy(&self, server: &Uri) -> bool {
        self.servers
            .get(server)
            .map(|s| s.healthy.load(Ordering::Acquire))
            .unwrap_or(true) // Unknown servers are assumed healthy
    }

    /// Record a successful probe. Returns true if this flipped the backend to healthy.
    pub fn record_success(&self, server: &Uri) -> bool {
        let entry = self.servers.entry(server.clone()).or_default();

        entry.consecutive_failures.store(0, Ordering::Release);
        let successes = entry.consecutive_successes.fetch_add(1, Ordering::AcqRel) + 1;
        entry.last_check.store(current_timestamp(), Ordering::Release);

        if !entry.healthy.load(Ordering::Acquire) && successes >= self.config.healthy_threshold {
            entry.healthy.store(true, Ordering::Release);
            entry.consecutive_successes.store(0, Ordering::Release);
            tracing::info!(backend = %server, "backend marked healthy after {} successes", successes);
            return true;
        }
        false
    }

    /// Record a failed probe. Returns true if this flipped the backend to unhealthy.
    pub fn record_failure(&self, server: &Uri) -> bool {
        let entry = self.servers.entry(server.clone()).or_default();

        entry.consecutive_successes.store(0, Ordering::Release);
        let failures = entry.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        entry.last_check.store(current_timestamp(), Ordering::Release);

        if entry.healthy.load(Ordering::Acquire) && failures >= self.config.unhealthy_threshold {
            entry.healthy.store(false, Ordering::Release);
            entry.consecutive_failures.store(0, Ordering::Release);
            tracing::warn!(backend = %server, "backend marked unhealthy after {} failures", failures);
            return true;
        }
        false
    }

    /// Get consecutive failures for a backend.
    pub fn get_failures(&self, server: &Uri) -> u32 {
        self.servers
            .get(server)
            .map(|s| s.consecutive_failures.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Health status for all registered backends.
    pub fn snapshot(&self) -> Vec<HealthSnapshot> {
        self.servers
            .iter()
            .map(|entry| {
                let health = entry.value();
                HealthSnapshot {
                    backend: entry.key().clone(),
                    healthy: health.healthy.load(Ordering::Relaxed),
                    consecutive_failures: health.consecutive_failures.load(Ordering::Relaxed),
                    last_check: health.last_check.load(Ordering::Relaxed),
                }
            })
            .collect()
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Get the current Unix timestamp in seconds.
fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_server_starts_healthy() {
        let state = HealthState::new();
        let server = uri("http://127.0.0.1:8001");
        state.register_server(&server);

        assert!(state.is_healthy(&server));
        assert!(state.is_healthy(&uri("http://10.0.0.1:80")));
    }

    #[test]
    fn test_failures_mark_unhealthy() {
        let state = HealthState::with_config(HealthConfig {
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        });
        let server = uri("http://127.0.0.1:8001");
        state.register_server(&server);

        assert!(!state.record_failure(&server));
        assert!(state.is_healthy(&server));

        assert!(!state.record_failure(&server));
        assert!(state.is_healthy(&server));

        // Third failure flips it
        assert!(state.record_failure(&server));
        assert!(!state.is_healthy(&server));
    }

    #[test]
    fn test_successes_mark_healthy() {
        let state = HealthState::with_config(HealthConfig {
            unhealthy_threshold: 1,
            healthy_threshold: 2,
        });
        let server = uri("http://127.0.0.1:8001");
        state.register_server(&server);

        state.record_failure(&server);
        assert!(!state.is_healthy(&server));

        assert!(!state.record_success(&server));
        assert!(!state.is_healthy(&server));

        assert!(state.record_success(&server));
        assert!(state.is_healthy(&server));
    }

    #[test]
    fn test_success_resets_failures() {
        let state = HealthState::with_config(HealthConfig {
            unhealthy_threshold: 3,
            healthy_threshold: 2,
        });
        let server = uri("http://127.0.0.1:8001");
        state.register_server(&server);

        state.record_failure(&server);
        state.record_failure(&server);
        assert_eq!(state.get_failures(&server), 2);

        state.record_success(&server);
        assert_eq!(state.get_failures(&server), 0);

        state.record_failure(&server);
        state.record_failure(&server);
        assert!(state.is_healthy(&server));

        state.record_failure(&server);
        assert!(!state.is_healthy(&server));
    }

    #[test]
    fn test_snapshot() {
        let state = HealthState::with_config(HealthConfig {
            unhealthy_threshold: 1,
            healthy_threshold: 1,
        });
        let s1 = uri("http://127.0.0.1:8001");
        let s2 = uri("http://127.0.0.1:8002");
        state.register_server(&s1);
        state.register_server(&s2);
        state.record_failure(&s2);

        let mut snapshot = state.snapshot();
        snapshot.sort_by_key(|s| s.backend.to_string());

        assert_eq!(snapshot.len(), 2);
        assert!(snapshot[0].healthy);
        assert_eq!(snapshot[0].last_check, 0);
        assert!(!snapshot[1].healthy);
        assert!(snapshot[1].last_check > 0);
    }
}
