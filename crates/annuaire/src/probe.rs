//! Endpoint readiness probing.
//!
//! A probe is a single bounded `GET <base>/api/health`. Anything other
//! than an HTTP 200 within the per-attempt timeout counts as "not
//! ready yet" — callers never see a transport error, only a
//! [`ReadinessResult`].

use std::time::Duration;

use log::{debug, warn};

/// Well-known health path exposed by every backend we talk to.
pub const HEALTH_PATH: &str = "/api/health";

/// Outcome of a single probe attempt. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessResult {
    Ready,
    NotReady(String),
}

impl ReadinessResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessResult::Ready)
    }
}

/// Health prober for candidate backend endpoints.
#[derive(Debug, Clone, Default)]
pub struct EndpointProber {
    client: reqwest::Client,
}

impl EndpointProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue one health check against `base_url`.
    ///
    /// The timeout is enforced here on the request itself, not left to
    /// the transport default. Malformed URLs, refused connections,
    /// timeouts and non-200 statuses all map to `NotReady`.
    pub async fn probe(&self, base_url: &str, per_attempt_timeout: Duration) -> ReadinessResult {
        let url = format!("{}{}", base_url.trim_end_matches('/'), HEALTH_PATH);

        let response = self
            .client
            .get(&url)
            .timeout(per_attempt_timeout)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status() == reqwest::StatusCode::OK => ReadinessResult::Ready,
            Ok(resp) => ReadinessResult::NotReady(format!("status {}", resp.status())),
            Err(err) => ReadinessResult::NotReady(err.to_string()),
        }
    }

    /// Poll `base_url` until it reports ready or the attempt budget is
    /// exhausted.
    ///
    /// Performs at most `max_attempts` probes, sleeping
    /// `inter_attempt_delay` between failed attempts, and returns on
    /// the first success. `max_attempts = 1` is the single-shot
    /// variant used for interactive reachability checks.
    pub async fn wait_until_ready(
        &self,
        base_url: &str,
        max_attempts: u32,
        per_attempt_timeout: Duration,
        inter_attempt_delay: Duration,
    ) -> bool {
        for attempt in 1..=max_attempts.max(1) {
            match self.probe(base_url, per_attempt_timeout).await {
                ReadinessResult::Ready => {
                    debug!("{base_url} ready after {attempt} attempt(s)");
                    return true;
                }
                ReadinessResult::NotReady(reason) => {
                    debug!("attempt {attempt}/{max_attempts}: {base_url} not ready: {reason}");
                }
            }
            if attempt < max_attempts {
                tokio::time::sleep(inter_attempt_delay).await;
            }
        }

        warn!("{base_url} did not become ready within {max_attempts} attempt(s)");
        false
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use axum::{Router, http::StatusCode, routing::get};
    use tokio::net::TcpListener;

    use super::*;

    /// Serve `router` on an ephemeral localhost port, returning the base URL.
    async fn serve(router: Router) -> String {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://127.0.0.1:{port}")
    }

    #[tokio::test]
    async fn probe_ready_on_200() {
        let base = serve(Router::new().route(HEALTH_PATH, get(|| async { "ok" }))).await;

        let prober = EndpointProber::new();
        let result = prober.probe(&base, Duration::from_secs(2)).await;
        assert!(result.is_ready());
    }

    #[tokio::test]
    async fn probe_not_ready_on_non_200() {
        let base = serve(
            Router::new().route(HEALTH_PATH, get(|| async { StatusCode::SERVICE_UNAVAILABLE })),
        )
        .await;

        let prober = EndpointProber::new();
        let result = prober.probe(&base, Duration::from_secs(2)).await;
        assert!(!result.is_ready());
    }

    #[tokio::test]
    async fn probe_not_ready_on_connection_refused() {
        // Bind then drop a listener so the port is known-free.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let prober = EndpointProber::new();
        let result = prober
            .probe(&format!("http://127.0.0.1:{port}"), Duration::from_secs(2))
            .await;
        assert!(!result.is_ready());
    }

    #[tokio::test]
    async fn probe_not_ready_on_malformed_url() {
        let prober = EndpointProber::new();
        let result = prober.probe("not a url", Duration::from_secs(2)).await;
        assert!(!result.is_ready());
    }

    #[tokio::test]
    async fn probe_times_out_on_stalled_server() {
        let base = serve(Router::new().route(
            HEALTH_PATH,
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                "too late"
            }),
        ))
        .await;

        let prober = EndpointProber::new();
        let start = std::time::Instant::now();
        let result = prober.probe(&base, Duration::from_millis(200)).await;
        assert!(!result.is_ready());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn wait_until_ready_stops_on_first_success() {
        // Fails twice, then succeeds; must never be probed a fourth time.
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handler = Arc::clone(&hits);
        let base = serve(Router::new().route(
            HEALTH_PATH,
            get(move || {
                let hits = Arc::clone(&hits_handler);
                async move {
                    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
                        StatusCode::SERVICE_UNAVAILABLE
                    } else {
                        StatusCode::OK
                    }
                }
            }),
        ))
        .await;

        let prober = EndpointProber::new();
        let ready = prober
            .wait_until_ready(
                &base,
                10,
                Duration::from_secs(2),
                Duration::from_millis(10),
            )
            .await;

        assert!(ready);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn wait_until_ready_exhausts_exactly_max_attempts() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_handler = Arc::clone(&hits);
        let base = serve(Router::new().route(
            HEALTH_PATH,
            get(move || {
                let hits = Arc::clone(&hits_handler);
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    StatusCode::SERVICE_UNAVAILABLE
                }
            }),
        ))
        .await;

        let prober = EndpointProber::new();
        let ready = prober
            .wait_until_ready(&base, 4, Duration::from_secs(2), Duration::from_millis(10))
            .await;

        assert!(!ready);
        assert_eq!(hits.load(Ordering::SeqCst), 4);
    }
}
