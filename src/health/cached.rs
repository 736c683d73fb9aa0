//! Liveness answered from cached health state.

use crate::backend::Probe;
use crate::health::HealthState;
use futures::FutureExt;
use futures::future::BoxFuture;
use hyper::Uri;
use std::sync::Arc;

/// A [`Probe`] that reads the flag maintained by the background checker
/// instead of touching the network.
#[derive(Debug, Clone)]
pub struct CachedProbe {
    state: Arc<HealthState>,
}

impl CachedProbe {
    pub fn new(state: Arc<HealthState>) -> Self {
        Self { state }
    }
}

impl Probe for CachedProbe {
    fn is_alive<'a>(&'a self, target: &'a Uri) -> BoxFuture<'a, bool> {
        futures::future::ready(self.state.is_healthy(target)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Selector;
    use crate::config::BackendConfig;
    use crate::health::HealthConfig;

    #[tokio::test]
    async fn test_selector_uses_cached_state() {
        let state = Arc::new(HealthState::with_config(HealthConfig {
            unhealthy_threshold: 1,
            healthy_threshold: 1,
        }));
        let probe = Arc::new(CachedProbe::new(Arc::clone(&state)));
        let selector = Selector::from_config(
            &[
                BackendConfig::new("http://127.0.0.1:9001"),
                BackendConfig::new("http://127.0.0.1:9002"),
            ],
            probe,
        )
        .unwrap();

        let first: Uri = "http://127.0.0.1:9001".parse().unwrap();
        state.record_failure(&first);

        for _ in 0..4 {
            let chosen = selector.next().await.unwrap();
            assert_eq!(chosen.address().port_u16(), Some(9002));
        }

        state.record_success(&first);
        let seen: Vec<u16> = [
            selector.next().await.unwrap().address().port_u16().unwrap(),
            selector.next().await.unwrap().address().port_u16().unwrap(),
        ]
        .to_vec();
        assert!(seen.contains(&9001));
    }
}
