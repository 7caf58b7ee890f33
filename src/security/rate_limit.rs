//! Fixed-window rate limiting.
//!
//! A bucket opens on the first request for a scope and stays valid for one
//! window. Within the window every request increments the count; once the
//! count passes the limit further requests are refused. The first request
//! after the window closes starts a fresh bucket at count 1.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::broadcast;

/// Per-scope counter.
#[derive(Debug, Clone, Copy)]
struct RateLimitBucket {
    window_start: Instant,
    count: u32,
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed { remaining: u32 },
    Limited { retry_after: Duration },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Sliding-by-reset rate limiter keyed by scope.
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<String, RateLimitBucket>,
    window: std::sync::RwLock<Duration>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            window: std::sync::RwLock::new(window),
        }
    }

    /// Current window length.
    pub fn window(&self) -> Duration {
        *self.window.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Change the window length. Existing buckets keep their start time.
    pub fn set_window(&self, window: Duration) {
        *self.window.write().unwrap_or_else(|e| e.into_inner()) = window;
    }

    /// Check and count one request for `scope` using the configured window.
    pub fn check(&self, scope: &str, limit: u32) -> RateDecision {
        self.check_at(scope, limit, self.window(), Instant::now())
    }

    /// Check and count one request at an explicit instant.
    pub fn check_at(&self, scope: &str, limit: u32, window: Duration, now: Instant) -> RateDecision {
        let mut bucket = self
            .buckets
            .entry(scope.to_string())
            .or_insert(RateLimitBucket { window_start: now, count: 0 });

        if now.saturating_duration_since(bucket.window_start) >= window {
            bucket.window_start = now;
            bucket.count = 0;
        }

        bucket.count = bucket.count.saturating_add(1);

        if bucket.count > limit {
            let elapsed = now.saturating_duration_since(bucket.window_start);
            RateDecision::Limited {
                retry_after: window.saturating_sub(elapsed),
            }
        } else {
            RateDecision::Allowed {
                remaining: limit - bucket.count,
            }
        }
    }

    /// Drop buckets whose window has closed. Returns how many were removed.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let window = self.window();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_duration_since(bucket.window_start) < window);
        before.saturating_sub(self.buckets.len())
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Periodically evict expired buckets until shutdown.
    pub async fn run_gc(self: Arc<Self>, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.evict_expired(Instant::now());
                    if evicted > 0 {
                        tracing::debug!(evicted, remaining = self.bucket_count(), "Evicted expired rate limit buckets");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Rate limiter GC stopping");
                    break;
                }
            }
        }
    }
}

/// Scope key for a request: the presented credential if any, else the
/// client address. Buckets are per route so one key can be limited
/// independently on each route.
pub fn scope_key(route: &str, credential: Option<&str>, client_ip: &str) -> String {
    match credential {
        Some(key) => format!("{}|key:{}", route, key),
        None => format!("{}|ip:{}", route, client_ip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    #[test]
    fn nth_plus_one_request_is_limited() {
        let limiter = RateLimiter::new(WINDOW);
        let now = Instant::now();

        let results: Vec<bool> = (0..6)
            .map(|_| limiter.check_at("echo|key:k", 5, WINDOW, now).is_allowed())
            .collect();
        assert_eq!(results, [true, true, true, true, true, false]);
    }

    #[test]
    fn window_expiry_resets_count() {
        let limiter = RateLimiter::new(WINDOW);
        let start = Instant::now();

        assert!(limiter.check_at("s", 1, WINDOW, start).is_allowed());
        assert!(!limiter.check_at("s", 1, WINDOW, start + Duration::from_secs(30)).is_allowed());
        assert_eq!(
            limiter.check_at("s", 1, WINDOW, start + WINDOW),
            RateDecision::Allowed { remaining: 0 }
        );
    }

    #[test]
    fn scopes_are_independent() {
        let limiter = RateLimiter::new(WINDOW);
        let now = Instant::now();

        assert!(limiter.check_at("r|key:a", 1, WINDOW, now).is_allowed());
        assert!(!limiter.check_at("r|key:a", 1, WINDOW, now).is_allowed());
        assert!(limiter.check_at("r|key:b", 1, WINDOW, now).is_allowed());
    }

    #[test]
    fn limited_reports_retry_after() {
        let limiter = RateLimiter::new(WINDOW);
        let start = Instant::now();
        limiter.check_at("s", 1, WINDOW, start);

        match limiter.check_at("s", 1, WINDOW, start + Duration::from_secs(20)) {
            RateDecision::Limited { retry_after } => assert_eq!(retry_after, Duration::from_secs(40)),
            other => panic!("expected limit, got {:?}", other),
        }
    }

    #[test]
    fn gc_drops_only_expired_buckets() {
        let limiter = RateLimiter::new(WINDOW);
        let start = Instant::now();
        limiter.check_at("old", 5, WINDOW, start);
        limiter.check_at("new", 5, WINDOW, start + Duration::from_secs(50));

        assert_eq!(limiter.evict_expired(start + Duration::from_secs(61)), 1);
        assert_eq!(limiter.bucket_count(), 1);
    }

    #[test]
    fn scope_key_prefers_credential() {
        assert_eq!(scope_key("path:/echo", Some("k"), "10.0.0.1"), "path:/echo|key:k");
        assert_eq!(scope_key("path:/echo", None, "10.0.0.1"), "path:/echo|ip:10.0.0.1");
    }
}
