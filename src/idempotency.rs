//! In-memory idempotency cache for checkout submissions.
//!
//! The store is constructed explicitly and injected, so tests can build
//! isolated instances with their own TTL. Entries are best-effort and
//! process-local: a restart loses them, and the accepted worst case is a
//! rare duplicate order on a retry that straddles the restart.

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Result of a previously completed checkout, replayed verbatim on a
/// duplicate submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachedCheckout {
    Etransfer {
        order_id: String,
        order_number: String,
    },
    Card {
        order_number: String,
        redirect_url: String,
    },
}

#[derive(Debug)]
struct CacheEntry {
    value: CachedCheckout,
    expires_at: Instant,
}

/// Process-wide idempotency store with lazy expiry: every read prunes
/// expired entries first, so no background timer is needed.
#[derive(Debug)]
pub struct IdempotencyStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Resolves the idempotency key for a request: the `Idempotency-Key`
    /// header wins, then the body-supplied key. `None` means the request is
    /// not deduplicated.
    pub fn resolve_key(headers: &HeaderMap, body_key: Option<&str>) -> Option<String> {
        if let Some(value) = headers.get(IDEMPOTENCY_HEADER) {
            if let Ok(key) = value.to_str() {
                let key = key.trim();
                if !key.is_empty() {
                    return Some(key.to_string());
                }
            }
        }
        body_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string)
    }

    pub fn get(&self, key: &str) -> Option<CachedCheckout> {
        self.prune_expired();
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: &str, value: CachedCheckout) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    fn prune_expired(&self) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.retain(|_, entry| entry.expires_at > now);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
