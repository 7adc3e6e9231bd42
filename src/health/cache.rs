//! Cached Core health.
//!
//! # Responsibilities
//! - Probe the Core health endpoint at most once per TTL
//! - Let the proxy record a connection failure without probing
//!
//! # Design Decisions
//! - One `tokio::sync::Mutex` guards the state and is held across the probe,
//!   so concurrent callers wait for a single in-flight probe
//! - The last result is mirrored into an atomic outside that mutex, so
//!   `cached()` keeps answering while a probe is in flight
//! - Probes go out through the forwarder's pooled client
//! - Both outcomes are cached; a failed probe keeps Core marked down until
//!   the TTL lapses

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, uri::InvalidUri, Request, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use tokio::sync::Mutex;
use tokio::time::{self, Instant};

use crate::observability::metrics;

/// A single liveness check.
#[async_trait]
pub trait HealthProbe: Send + Sync + fmt::Debug {
    async fn probe(&self) -> bool;
}

/// `GET` against a health URL; healthy on any 2xx within the timeout.
#[derive(Clone)]
pub struct HttpHealthProbe {
    client: Client<HttpConnector, Body>,
    uri: Uri,
    timeout: Duration,
}

impl HttpHealthProbe {
    /// Probe `{base_url}/{health_path}` over an existing client.
    pub fn new(
        client: Client<HttpConnector, Body>,
        base_url: &str,
        health_path: &str,
        timeout: Duration,
    ) -> Result<Self, InvalidUri> {
        let uri = format!(
            "{}/{}",
            base_url.trim_end_matches('/'),
            health_path.trim_start_matches('/')
        )
        .parse()?;
        Ok(Self { client, uri, timeout })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }
}

impl fmt::Debug for HttpHealthProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpHealthProbe")
            .field("uri", &self.uri)
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> bool {
        let request = match Request::builder()
            .method("GET")
            .uri(self.uri.clone())
            .header(header::USER_AGENT, "activity-gateway-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build health check request");
                return false;
            }
        };

        match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::warn!(status = %response.status(), "Core health check failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Core health check failed: connection error");
                false
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Core health check failed: timeout");
                false
            }
        }
    }
}

/// Last observed Core health.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoreProxyState {
    pub last_check: Option<Instant>,
    pub last_result: bool,
}

const STATUS_UNKNOWN: u8 = 0;
const STATUS_DOWN: u8 = 1;
const STATUS_UP: u8 = 2;

#[derive(Debug)]
pub struct HealthCache {
    state: Mutex<CoreProxyState>,
    /// Mirror of `state.last_result` readable without the mutex.
    status: AtomicU8,
    ttl: Duration,
    probe: Arc<dyn HealthProbe>,
}

impl HealthCache {
    pub fn new(probe: Arc<dyn HealthProbe>, ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CoreProxyState::default()),
            status: AtomicU8::new(STATUS_UNKNOWN),
            ttl,
            probe,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached result if fresh, otherwise a real probe.
    pub async fn check(&self) -> bool {
        let mut state = self.state.lock().await;
        if let Some(at) = state.last_check {
            if at.elapsed() < self.ttl {
                return state.last_result;
            }
        }

        let healthy = self.probe.probe().await;
        if healthy != state.last_result || state.last_check.is_none() {
            if healthy {
                tracing::info!("Core service healthy");
            } else {
                tracing::warn!("Core service unhealthy, serving fallback");
            }
        }
        *state = CoreProxyState {
            last_check: Some(Instant::now()),
            last_result: healthy,
        };
        self.publish(healthy);
        metrics::record_core_health(healthy);
        healthy
    }

    /// The last known result without probing or waiting. `None` until the
    /// first probe completes; an in-flight probe leaves the previous answer.
    pub fn cached(&self) -> Option<bool> {
        match self.status.load(Ordering::Acquire) {
            STATUS_UP => Some(true),
            STATUS_DOWN => Some(false),
            _ => None,
        }
    }

    fn publish(&self, healthy: bool) {
        let status = if healthy { STATUS_UP } else { STATUS_DOWN };
        self.status.store(status, Ordering::Release);
    }

    /// Record an observed connection failure; holds until the TTL lapses.
    pub async fn mark_unhealthy(&self) {
        let mut state = self.state.lock().await;
        if state.last_result || state.last_check.is_none() {
            tracing::warn!("Core service marked unhealthy after connection failure");
        }
        *state = CoreProxyState {
            last_check: Some(Instant::now()),
            last_result: false,
        };
        self.publish(false);
        metrics::record_core_health(false);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Probe with a switchable answer that counts its calls.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedProbe {
        pub healthy: AtomicBool,
        pub calls: AtomicUsize,
    }

    impl ScriptedProbe {
        pub(crate) fn new(healthy: bool) -> Arc<Self> {
            Arc::new(Self {
                healthy: AtomicBool::new(healthy),
                calls: AtomicUsize::new(0),
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            time::sleep(Duration::from_millis(10)).await;
            self.healthy.load(Ordering::SeqCst)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_probe_per_ttl() {
        let probe = ScriptedProbe::new(true);
        let cache = HealthCache::new(probe.clone(), Duration::from_secs(30));

        assert!(cache.check().await);
        time::advance(Duration::from_secs(10)).await;
        assert!(cache.check().await);
        assert_eq!(probe.calls(), 1);

        time::advance(Duration::from_secs(31)).await;
        assert!(cache.check().await);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_checks_share_one_probe() {
        let probe = ScriptedProbe::new(true);
        let cache = Arc::new(HealthCache::new(probe.clone(), Duration::from_secs(30)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.check().await })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_cached_until_next_probe() {
        let probe = ScriptedProbe::new(false);
        let cache = HealthCache::new(probe.clone(), Duration::from_secs(5));

        assert_eq!(cache.cached(), None);
        assert!(!cache.check().await);
        assert_eq!(cache.cached(), Some(false));

        probe.healthy.store(true, Ordering::SeqCst);
        assert!(!cache.check().await);

        time::advance(Duration::from_secs(6)).await;
        assert!(cache.check().await);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cached_keeps_last_answer_during_refresh() {
        let backend = ScriptedProbe::new(true);
        let cache = Arc::new(HealthCache::new(backend.clone(), Duration::from_secs(5)));
        assert!(cache.check().await);

        time::advance(Duration::from_secs(6)).await;
        backend.healthy.store(false, Ordering::SeqCst);
        let refresh = tokio::spawn({
            let cache = cache.clone();
            async move { cache.check().await }
        });
        tokio::task::yield_now().await;

        assert_eq!(backend.calls(), 2, "refresh should be in flight");
        assert_eq!(cache.cached(), Some(true));

        assert!(!refresh.await.unwrap());
        assert_eq!(cache.cached(), Some(false));
    }

    #[tokio::test(start_paused = true)]
    async fn mark_unhealthy_skips_probe() {
        let probe = ScriptedProbe::new(true);
        let cache = HealthCache::new(probe.clone(), Duration::from_secs(5));

        cache.mark_unhealthy().await;
        assert_eq!(cache.cached(), Some(false));
        assert!(!cache.check().await);
        assert_eq!(probe.calls(), 0);
    }

    #[test]
    fn probe_uri_joins_base_and_path() {
        let client = crate::proxy::Forwarder::new().client().clone();
        let probe = HttpHealthProbe::new(client, "http://core:4000/", "/health", Duration::from_secs(1)).unwrap();
        assert_eq!(probe.uri().to_string(), "http://core:4000/health");
    }
}
