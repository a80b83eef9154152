//! Time-based invalidation

use crate::types::CacheEntry;
use chrono::{DateTime, Duration, Utc};

/// Entries older than `ttl` are no longer trusted
#[derive(Debug, Clone, Copy)]
pub struct ExpiryPolicy {
    ttl: Duration,
}

impl ExpiryPolicy {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        now - entry.cached_at > self.ttl
    }
}
