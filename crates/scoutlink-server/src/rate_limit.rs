//! Request throttling.
//!
//! Two independent limits apply: a per-IP token bucket on every request, and
//! a fixed-window message quota per sender per conversation on
//! `POST /messages`.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use tokio::sync::Mutex;
use tracing::warn;

use scoutlink_shared::{ConversationId, UserId};

use crate::error::ServerError;

const REQUESTS_PER_SECOND: f64 = 10.0;
const REQUEST_BURST: f64 = 30.0;

#[derive(Debug, Clone)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl Bucket {
    fn take(&mut self, per_second: f64, burst: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.refilled_at).as_secs_f64();
        self.tokens = (self.tokens + elapsed * per_second).min(burst);
        self.refilled_at = now;

        if self.tokens < 1.0 {
            return false;
        }
        self.tokens -= 1.0;
        true
    }
}

/// Per-client request budget: `burst` requests at once, refilled at
/// `per_second`.
#[derive(Clone)]
pub struct RateLimiter {
    buckets: Arc<Mutex<HashMap<IpAddr, Bucket>>>,
    per_second: f64,
    burst: f64,
}

impl RateLimiter {
    pub fn new(per_second: f64, burst: f64) -> Self {
        Self {
            buckets: Arc::new(Mutex::new(HashMap::new())),
            per_second,
            burst,
        }
    }

    pub async fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now()).await
    }

    pub async fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().await;
        buckets
            .entry(ip)
            .or_insert(Bucket {
                tokens: self.burst,
                refilled_at: now,
            })
            .take(self.per_second, self.burst, now)
    }

    /// Forget clients that have been quiet for at least `idle`.
    pub async fn purge_idle(&self, idle: Duration) {
        self.purge_idle_at(idle, Instant::now()).await;
    }

    async fn purge_idle_at(&self, idle: Duration, now: Instant) {
        let mut buckets = self.buckets.lock().await;
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.refilled_at) < idle);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(REQUESTS_PER_SECOND, REQUEST_BURST)
    }
}

// ---------------------------------------------------------------------------
// Message quota
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct QuotaWindow {
    started: Instant,
    used: u32,
}

/// Fixed-window quota on messages per (conversation, sender).
#[derive(Clone)]
pub struct MessageQuota {
    windows: Arc<Mutex<HashMap<(ConversationId, UserId), QuotaWindow>>>,
    limit: u32,
    window: Duration,
}

impl MessageQuota {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(Mutex::new(HashMap::new())),
            limit,
            window,
        }
    }

    /// Consume one slot.  Returns `false` once the window is exhausted.
    pub async fn check(&self, conversation: ConversationId, sender: UserId) -> bool {
        self.check_at(conversation, sender, Instant::now()).await
    }

    pub async fn check_at(&self, conversation: ConversationId, sender: UserId, now: Instant) -> bool {
        let mut windows = self.windows.lock().await;
        let entry = windows
            .entry((conversation, sender))
            .or_insert(QuotaWindow { started: now, used: 0 });

        if now.saturating_duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.used = 0;
        }

        if entry.used < self.limit {
            entry.used += 1;
            true
        } else {
            false
        }
    }

    /// Give back a slot taken by a send that was never stored.
    pub async fn release(&self, conversation: ConversationId, sender: UserId) {
        let mut windows = self.windows.lock().await;
        if let Some(entry) = windows.get_mut(&(conversation, sender)) {
            entry.used = entry.used.saturating_sub(1);
        }
    }

    /// Drop windows that have fully elapsed.
    pub async fn purge_expired(&self) {
        let mut windows = self.windows.lock().await;
        let now = Instant::now();
        let window = self.window;
        windows.retain(|_, w| now.saturating_duration_since(w.started) < window);
    }
}

pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(ip) = client_ip(&req) {
        if !limiter.check(ip).await {
            warn!(%ip, path = %req.uri().path(), "Request rate exceeded");
            return Err(ServerError::RateLimited);
        }
    }

    Ok(next.run(req).await)
}

fn header_ip<B>(req: &Request<B>, name: &str) -> Option<IpAddr> {
    let value = req.headers().get(name)?.to_str().ok()?;
    value.split(',').next()?.trim().parse().ok()
}

/// The peer address, or the first proxy-reported address when the request
/// arrived without connection info.
fn client_ip<B>(req: &Request<B>) -> Option<IpAddr> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip())
        .or_else(|| header_ip(req, "x-forwarded-for"))
        .or_else(|| header_ip(req, "x-real-ip"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{middleware, Router};
    use serde_json::Value;
    use tower::ServiceExt;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_client_spends_burst_then_waits_for_refill() {
        let limiter = RateLimiter::new(1.0, 3.0);
        let club_office = ip("203.0.113.10");
        let start = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at(club_office, start).await);
        }
        assert!(!limiter.check_at(club_office, start).await);

        let later = start + Duration::from_secs(1);
        assert!(limiter.check_at(club_office, later).await);
        assert!(!limiter.check_at(club_office, later).await);
    }

    #[tokio::test]
    async fn test_clients_are_limited_independently() {
        let limiter = RateLimiter::new(0.0, 1.0);
        let now = Instant::now();

        assert!(limiter.check_at(ip("198.51.100.1"), now).await);
        assert!(!limiter.check_at(ip("198.51.100.1"), now).await);
        assert!(limiter.check_at(ip("198.51.100.2"), now).await);
    }

    #[tokio::test]
    async fn test_purge_forgets_quiet_clients_only() {
        let limiter = RateLimiter::new(1.0, 5.0);
        let start = Instant::now();
        let (quiet, busy) = (ip("192.0.2.1"), ip("192.0.2.2"));

        limiter.check_at(quiet, start).await;
        limiter.check_at(busy, start + Duration::from_secs(900)).await;
        limiter
            .purge_idle_at(Duration::from_secs(600), start + Duration::from_secs(960))
            .await;

        let buckets = limiter.buckets.lock().await;
        assert!(!buckets.contains_key(&quiet));
        assert!(buckets.contains_key(&busy));
    }

    #[test]
    fn test_client_ip_prefers_first_forwarded_address() {
        let req = Request::builder()
            .header("x-forwarded-for", "203.0.113.7, 10.0.0.1")
            .header("x-real-ip", "10.0.0.2")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req), Some(ip("203.0.113.7")));

        let req = Request::builder()
            .header("x-real-ip", "10.0.0.2")
            .body(())
            .unwrap();
        assert_eq!(client_ip(&req), Some(ip("10.0.0.2")));

        let req = Request::builder().body(()).unwrap();
        assert_eq!(client_ip(&req), None);
    }

    #[tokio::test]
    async fn test_middleware_rejects_with_json_error() {
        let app = Router::new()
            .route("/messages", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(
                RateLimiter::new(0.0, 1.0),
                rate_limit_middleware,
            ));
        let request = || {
            Request::builder()
                .uri("/messages")
                .header("x-forwarded-for", "203.0.113.7")
                .body(Body::empty())
                .unwrap()
        };

        let first = app.clone().oneshot(request()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(request()).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        let bytes = to_bytes(second.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["kind"], "rate_limited");
        assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    #[tokio::test]
    async fn test_quota_rejects_after_limit_and_recovers() {
        let quota = MessageQuota::new(3, Duration::from_secs(3600));
        let conversation = ConversationId::new();
        let sender = UserId::new();
        let start = Instant::now();

        for _ in 0..3 {
            assert!(quota.check_at(conversation, sender, start).await);
        }
        assert!(!quota.check_at(conversation, sender, start).await);
        assert!(
            !quota
                .check_at(conversation, sender, start + Duration::from_secs(3599))
                .await
        );

        let rolled = start + Duration::from_secs(3600);
        assert!(quota.check_at(conversation, sender, rolled).await);
    }

    #[tokio::test]
    async fn test_quota_is_per_sender_and_conversation() {
        let quota = MessageQuota::new(1, Duration::from_secs(3600));
        let conversation = ConversationId::new();
        let (a, b) = (UserId::new(), UserId::new());
        let now = Instant::now();

        assert!(quota.check_at(conversation, a, now).await);
        assert!(!quota.check_at(conversation, a, now).await);
        assert!(quota.check_at(conversation, b, now).await);
        assert!(quota.check_at(ConversationId::new(), a, now).await);
    }

    #[tokio::test]
    async fn test_quota_release_returns_one_slot() {
        let quota = MessageQuota::new(2, Duration::from_secs(3600));
        let conversation = ConversationId::new();
        let sender = UserId::new();
        let now = Instant::now();

        // Releasing with nothing taken is a no-op.
        quota.release(conversation, sender).await;
        assert!(quota.check_at(conversation, sender, now).await);
        assert!(quota.check_at(conversation, sender, now).await);
        assert!(!quota.check_at(conversation, sender, now).await);

        quota.release(conversation, sender).await;
        assert!(quota.check_at(conversation, sender, now).await);
        assert!(!quota.check_at(conversation, sender, now).await);
    }

    #[tokio::test]
    async fn test_quota_purge() {
        let quota = MessageQuota::new(5, Duration::from_millis(0));
        quota.check(ConversationId::new(), UserId::new()).await;
        quota.purge_expired().await;
        assert!(quota.windows.lock().await.is_empty());
    }
}
