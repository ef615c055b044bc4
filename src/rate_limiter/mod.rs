//! Per-IP fixed-window rate limiting for the abuse-prone public endpoints
//! (checkout initiation, promo verification).
//!
//! The store is an explicitly constructed, injectable object; tests build
//! their own instances. Requests without a resolvable client IP are always
//! allowed: a client that cannot be identified cannot be penalized, so the
//! limiter fails open. Stale entries are swept lazily as part of normal
//! checks rather than on a timer.

use axum::http::HeaderMap;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How many checks pass between amortized cleanup sweeps.
const CLEANUP_EVERY: u64 = 256;

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
}

impl RateLimitEntry {
    fn new() -> Self {
        Self {
            count: 0,
            window_start: Instant::now(),
        }
    }

    fn roll_window(&mut self, window: Duration) {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= window {
            self.count = 0;
            self.window_start = now;
        }
    }

    fn time_until_reset(&self, window: Duration) -> Duration {
        let elapsed = self.window_start.elapsed();
        if elapsed >= window {
            Duration::from_secs(0)
        } else {
            window - elapsed
        }
    }
}

/// Endpoint-scoped limits applied per client IP.
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    pub scope: &'static str,
    pub max_requests: u32,
    pub window: Duration,
}

#[derive(Debug)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_after: Duration,
}

/// Process-wide in-memory rate limiter keyed by `(scope, ip)`.
#[derive(Debug, Default)]
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks and counts one request for `(scope, ip)`. `None` for the IP
    /// means the caller could not resolve one; those requests pass.
    pub fn check(
        &self,
        scope: &str,
        ip: Option<&str>,
        max_requests: u32,
        window: Duration,
    ) -> RateLimitResult {
        let Some(ip) = ip else {
            return RateLimitResult {
                allowed: true,
                limit: max_requests,
                remaining: max_requests,
                reset_after: Duration::from_secs(0),
            };
        };

        self.maybe_cleanup(window);

        let key = format!("{}:{}", scope, ip);
        let mut entry = self.entries.entry(key).or_insert_with(RateLimitEntry::new);
        entry.roll_window(window);

        if entry.count >= max_requests {
            return RateLimitResult {
                allowed: false,
                limit: max_requests,
                remaining: 0,
                reset_after: entry.time_until_reset(window),
            };
        }

        entry.count += 1;
        RateLimitResult {
            allowed: true,
            limit: max_requests,
            remaining: max_requests.saturating_sub(entry.count),
            reset_after: entry.time_until_reset(window),
        }
    }

    /// Drops entries whose window has long passed. Runs every
    /// `CLEANUP_EVERY` checks so memory stays bounded without a timer.
    fn maybe_cleanup(&self, window: Duration) {
        let n = self.checks.fetch_add(1, Ordering::Relaxed);
        if n % CLEANUP_EVERY != 0 {
            return;
        }
        let now = Instant::now();
        self.entries
            .retain(|_, entry| now.duration_since(entry.window_start) < window * 2);
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

/// Resolves the client IP from proxy headers: the first `X-Forwarded-For`
/// hop, then `X-Real-IP`. Returns `None` when neither is present.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(ip) = forwarded_str.split(',').next() {
                let ip = ip.trim();
                if !ip.is_empty() {
                    return Some(ip.to_string());
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            let ip = ip_str.trim();
            if !ip.is_empty() {
                return Some(ip.to_string());
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn denies_after_limit_within_window() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(3600);

        for _ in 0..3 {
            assert!(limiter.check("checkout", Some("10.0.0.1"), 3, window).allowed);
        }
        let denied = limiter.check("checkout", Some("10.0.0.1"), 3, window);
        assert!(!denied.allowed);
        assert_eq!(denied.remaining, 0);
        assert!(denied.reset_after > Duration::from_secs(0));
    }

    #[test]
    fn scopes_and_ips_are_independent() {
        let limiter = RateLimiter::new();
        let window = Duration::from_secs(3600);

        assert!(limiter.check("checkout", Some("10.0.0.1"), 1, window).allowed);
        // Same IP, different scope: fresh counter.
        assert!(limiter.check("promo", Some("10.0.0.1"), 1, window).allowed);
        // Same scope, different IP: fresh counter.
        assert!(limiter.check("checkout", Some("10.0.0.2"), 1, window).allowed);
        // Original pair is now exhausted.
        assert!(!limiter.check("checkout", Some("10.0.0.1"), 1, window).allowed);
    }

    #[test]
    fn unresolvable_ip_fails_open() {
        let limiter = RateLimiter::new();
        for _ in 0..50 {
            let result = limiter.check("checkout", None, 1, Duration::from_secs(3600));
            assert!(result.allowed);
        }
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn window_reset_allows_again() {
        let limiter = RateLimiter::new();
        let window = Duration::from_millis(0);

        assert!(limiter.check("promo", Some("10.0.0.1"), 1, window).allowed);
        // A zero-length window has always expired, so the counter resets.
        assert!(limiter.check("promo", Some("10.0.0.1"), 1, window).allowed);
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 10.0.0.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(extract_client_ip(&headers), Some("203.0.113.7".to_string()));

        let mut real_only = HeaderMap::new();
        real_only.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(
            extract_client_ip(&real_only),
            Some("198.51.100.2".to_string())
        );

        assert_eq!(extract_client_ip(&HeaderMap::new()), None);
    }
}
