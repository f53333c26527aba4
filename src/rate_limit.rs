//! Per-client sliding-window admission gate.
//!
//! Each client keeps the instants of its admitted requests inside the trailing
//! window. A request is admitted while fewer than `limit` instants remain after
//! pruning. Denied attempts are not recorded, so hammering a closed window does
//! not push the reopening further out.
//!
//! One mutex guards the whole client map. Idle clients keep their (stale)
//! history until they show up again, which is when pruning happens.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::metrics::{RATE_LIMITED_TOTAL, RATE_LIMIT_CLIENTS, REQUEST_LATENCY, REQUEST_TOTAL};
use crate::models::ErrorResponse;
use crate::state::AppState;

// Request history for one client, oldest first
#[derive(Default)]
struct RateWindow {
    timestamps: VecDeque<Instant>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

pub struct SlidingWindowLimiter {
    limit: usize,
    window: Duration,
    clients: Mutex<HashMap<String, RateWindow>>,
}

impl SlidingWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit: limit as usize,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    pub fn admit(&self, client: &str) -> bool {
        self.check(client, Instant::now()).is_admitted()
    }

    /// Admission decision for `client` at `now`.
    pub fn check(&self, client: &str, now: Instant) -> Admission {
        // The map holds no invariant a panicking holder could break halfway.
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = clients.entry(client.to_string()).or_default();
        while let Some(&oldest) = entry.timestamps.front() {
            if now.saturating_duration_since(oldest) <= self.window {
                break;
            }
            entry.timestamps.pop_front();
        }

        let admission = if entry.timestamps.len() >= self.limit {
            // oldest retained instant leaves the window just after oldest + window
            let retry_after = entry
                .timestamps
                .front()
                .map(|&oldest| (oldest + self.window).saturating_duration_since(now))
                .unwrap_or(self.window);
            Admission::Denied { retry_after }
        } else {
            entry.timestamps.push_back(now);
            Admission::Admitted
        };

        RATE_LIMIT_CLIENTS.set(clients.len() as f64);
        admission
    }

    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

// 429 response; a denial is an outcome, not an AppError
pub struct TooManyRequests {
    pub retry_after: Duration,
}

impl IntoResponse for TooManyRequests {
    fn into_response(self) -> Response {
        // whole seconds, rounded up, at least one
        let secs = self.retry_after.as_secs() + u64::from(self.retry_after.subsec_nanos() > 0);
        let body = ErrorResponse {
            error: "too_many_requests".to_string(),
            message: Some("Rate limit exceeded".to_string()),
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(secs.max(1)));
        response
    }
}

pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = forwarded {
            return ip.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Gate in front of every route. A denied request never reaches the handler.
pub async fn rate_limit(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    REQUEST_TOTAL.inc();

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_key(request.headers(), peer, state.config.trust_forwarded_for);

    if let Admission::Denied { retry_after } = state.limiter.check(&client, Instant::now()) {
        RATE_LIMITED_TOTAL.inc();
        debug!(%client, ?retry_after, "request rate limited");
        return TooManyRequests { retry_after }.into_response();
    }

    let start_time = Instant::now();
    let response = next.run(request).await;
    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn denies_after_limit_and_reopens_when_oldest_leaves_window() {
        let limiter = SlidingWindowLimiter::new(3, secs(60));
        let t0 = Instant::now();

        assert!(limiter.check("x", t0).is_admitted());
        assert!(limiter.check("x", t0 + secs(1)).is_admitted());
        assert!(limiter.check("x", t0 + secs(2)).is_admitted());
        assert_eq!(
            limiter.check("x", t0 + secs(5)),
            Admission::Denied { retry_after: secs(55) }
        );
        assert!(limiter.check("x", t0 + secs(61)).is_admitted());
    }

    #[test]
    fn window_edge_is_inclusive() {
        let limiter = SlidingWindowLimiter::new(1, secs(10));
        let t0 = Instant::now();

        assert!(limiter.check("x", t0).is_admitted());
        // exactly `window` old still counts
        assert!(!limiter.check("x", t0 + secs(10)).is_admitted());
        assert!(limiter.check("x", t0 + secs(10) + Duration::from_millis(1)).is_admitted());
    }

    #[test]
    fn denied_attempts_do_not_consume_slots() {
        let limiter = SlidingWindowLimiter::new(2, secs(10));
        let t0 = Instant::now();

        assert!(limiter.check("x", t0).is_admitted());
        assert!(limiter.check("x", t0 + secs(1)).is_admitted());
        for i in 2..9 {
            assert!(!limiter.check("x", t0 + secs(i)).is_admitted());
        }
        // had the denials been recorded, the window would still be full here
        assert!(limiter.check("x", t0 + secs(11)).is_admitted());
    }

    #[test]
    fn clients_are_independent() {
        let limiter = SlidingWindowLimiter::new(1, secs(60));
        let t0 = Instant::now();

        assert!(limiter.check("a", t0).is_admitted());
        assert!(!limiter.check("a", t0).is_admitted());
        assert!(limiter.check("b", t0).is_admitted());
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn concurrent_callers_never_exceed_limit() {
        let limiter = Arc::new(SlidingWindowLimiter::new(50, secs(60)));
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..20).filter(|_| limiter.check("x", now).is_admitted()).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(admitted, 50);
    }

    #[test]
    fn forwarded_for_only_when_trusted() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.9, 172.16.0.1"));
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();

        assert_eq!(client_key(&headers, Some(peer), true), "10.0.0.9");
        assert_eq!(client_key(&headers, Some(peer), false), "127.0.0.1");
        assert_eq!(client_key(&HeaderMap::new(), None, true), "unknown");
    }

    #[test]
    fn retry_after_header_rounds_up() {
        let response = TooManyRequests {
            retry_after: Duration::from_millis(1500),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "2");
    }
}
