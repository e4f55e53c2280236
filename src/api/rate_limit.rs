//! Per-client request limits over a fixed window.
//!
//! Every client IP gets one counter per tier. The counter resets when its
//! window elapses; once it reaches the tier's limit, requests are rejected
//! with 429 until then.

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::ApiError;
use crate::config::RateLimitConfig;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitTier {
    /// Everything under `/api`
    Api,
    /// Sign-in, registration and password recovery
    Auth,
}

#[derive(Debug, Clone)]
struct Window {
    count: u32,
    started: Instant,
}

#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<(IpAddr, RateLimitTier), Window>,
    config: RateLimitConfig,
    window: Duration,
}

/// Counter state after an accepted request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the window resets
    pub reset_after: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: DashMap::new(),
            window: Duration::from_secs(config.window_seconds.max(1)),
            config,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn trusts_proxy_headers(&self) -> bool {
        self.config.trust_proxy_headers
    }

    fn limit_for(&self, tier: RateLimitTier) -> u32 {
        match tier {
            RateLimitTier::Api => self.config.api_requests_per_window,
            RateLimitTier::Auth => self.config.auth_requests_per_window,
        }
    }

    /// Count a request. `Err` carries the seconds to wait before retrying.
    pub fn check(&self, ip: IpAddr, tier: RateLimitTier) -> Result<RateLimitInfo, u64> {
        let limit = self.limit_for(tier);
        if !self.config.enabled {
            return Ok(RateLimitInfo {
                limit,
                remaining: limit,
                reset_after: 0,
            });
        }

        let now = Instant::now();
        let mut window = self.windows.entry((ip, tier)).or_insert_with(|| Window {
            count: 0,
            started: now,
        });

        if now.duration_since(window.started) >= self.window {
            window.count = 0;
            window.started = now;
        }

        let reset_after = self
            .window
            .saturating_sub(now.duration_since(window.started))
            .as_secs()
            .max(1);

        if window.count >= limit {
            return Err(reset_after);
        }

        window.count += 1;
        Ok(RateLimitInfo {
            limit,
            remaining: limit - window.count,
            reset_after,
        })
    }

    /// Drop counters whose window has long passed
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        let keep_for = self.window * 2;
        self.windows
            .retain(|_, window| now.duration_since(window.started) < keep_for);
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}

/// Client address: the socket peer, or loopback when unknown. With
/// `trust_proxy` the first `X-Forwarded-For` hop and then `X-Real-IP` win.
fn client_ip(request: &Request<Body>, trust_proxy: bool) -> IpAddr {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    if !trust_proxy {
        return peer;
    }

    let headers = request.headers();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok());
    if let Some(ip) = forwarded {
        return ip;
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .and_then(|ip| ip.trim().parse().ok());
    real_ip.unwrap_or(peer)
}

fn set_limit_headers(headers: &mut HeaderMap, limit: u32, remaining: u32, reset_after: u64) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(remaining));
    headers.insert("x-ratelimit-reset", HeaderValue::from(reset_after));
}

pub async fn rate_limit_api(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(&state, request, next, RateLimitTier::Api).await
}

pub async fn rate_limit_auth(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    enforce(&state, request, next, RateLimitTier::Auth).await
}

async fn enforce(
    state: &AppState,
    request: Request<Body>,
    next: Next,
    tier: RateLimitTier,
) -> Response {
    if !state.rate_limiter.is_enabled() {
        return next.run(request).await;
    }

    let ip = client_ip(&request, state.rate_limiter.trusts_proxy_headers());

    match state.rate_limiter.check(ip, tier) {
        Ok(info) => {
            let mut response = next.run(request).await;
            set_limit_headers(
                response.headers_mut(),
                info.limit,
                info.remaining,
                info.reset_after,
            );
            response
        }
        Err(retry_after) => {
            tracing::warn!(ip = %ip, tier = ?tier, retry_after, "Rate limit exceeded");

            let message = match tier {
                RateLimitTier::Auth => {
                    "Too many authentication attempts, please try again later."
                }
                RateLimitTier::Api => {
                    "Too many requests from this IP, please try again later."
                }
            };
            let mut response = ApiError::rate_limited(message).into_response();
            let headers = response.headers_mut();
            set_limit_headers(headers, state.rate_limiter.limit_for(tier), 0, retry_after);
            headers.insert("retry-after", HeaderValue::from(retry_after));
            response
        }
    }
}

/// Periodically forget idle clients
pub fn spawn_cleanup_task(rate_limiter: Arc<RateLimiter>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            rate_limiter.cleanup_expired();
            tracing::debug!(
                clients = rate_limiter.tracked_clients(),
                "Rate limiter cleanup complete"
            );
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(api: u32, auth: u32) -> RateLimitConfig {
        RateLimitConfig {
            enabled: true,
            api_requests_per_window: api,
            auth_requests_per_window: auth,
            window_seconds: 900,
            cleanup_interval: 300,
            trust_proxy_headers: false,
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[test]
    fn test_blocks_after_limit() {
        let limiter = RateLimiter::new(config(3, 1));

        for expected_remaining in [2, 1, 0] {
            let info = limiter.check(ip(1), RateLimitTier::Api).unwrap();
            assert_eq!(info.remaining, expected_remaining);
            assert_eq!(info.limit, 3);
        }

        let retry_after = limiter.check(ip(1), RateLimitTier::Api).unwrap_err();
        assert!(retry_after >= 1 && retry_after <= 900);
    }

    #[test]
    fn test_clients_and_tiers_are_independent() {
        let limiter = RateLimiter::new(config(2, 1));

        assert!(limiter.check(ip(1), RateLimitTier::Auth).is_ok());
        assert!(limiter.check(ip(1), RateLimitTier::Auth).is_err());

        assert!(limiter.check(ip(1), RateLimitTier::Api).is_ok());
        assert!(limiter.check(ip(2), RateLimitTier::Auth).is_ok());
        assert_eq!(limiter.tracked_clients(), 3);
    }

    #[test]
    fn test_disabled_limiter_never_blocks() {
        let mut cfg = config(1, 1);
        cfg.enabled = false;
        let limiter = RateLimiter::new(cfg);

        for _ in 0..50 {
            assert!(limiter.check(ip(1), RateLimitTier::Auth).is_ok());
        }
        assert_eq!(limiter.tracked_clients(), 0);
    }

    #[test]
    fn test_cleanup_keeps_live_windows() {
        let limiter = RateLimiter::new(config(5, 5));
        limiter.check(ip(1), RateLimitTier::Api).unwrap();

        limiter.cleanup_expired();
        assert_eq!(limiter.tracked_clients(), 1);
    }

    fn with_peer(mut request: Request<Body>, peer: &str) -> Request<Body> {
        let addr: SocketAddr = peer.parse().unwrap();
        request.extensions_mut().insert(ConnectInfo(addr));
        request
    }

    #[test]
    fn test_client_ip_uses_peer_unless_proxy_trusted() {
        let request = with_peer(
            Request::builder()
                .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
                .header("x-real-ip", "198.51.100.2")
                .body(Body::empty())
                .unwrap(),
            "192.0.2.10:40000",
        );
        assert_eq!(client_ip(&request, false), "192.0.2.10".parse::<IpAddr>().unwrap());
        assert_eq!(client_ip(&request, true), "203.0.113.7".parse::<IpAddr>().unwrap());

        let request = with_peer(
            Request::builder()
                .header("x-real-ip", "198.51.100.2")
                .body(Body::empty())
                .unwrap(),
            "192.0.2.10:40000",
        );
        assert_eq!(client_ip(&request, true), "198.51.100.2".parse::<IpAddr>().unwrap());

        let request = with_peer(
            Request::builder().body(Body::empty()).unwrap(),
            "192.0.2.10:40000",
        );
        assert_eq!(client_ip(&request, true), "192.0.2.10".parse::<IpAddr>().unwrap());

        let request = Request::builder()
            .header("x-forwarded-for", "203.0.113.7")
            .body(Body::empty())
            .unwrap();
        assert_eq!(client_ip(&request, false), IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
