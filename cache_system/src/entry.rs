use std::time::{Duration, Instant};

/// A cached payload and its lifetime
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    /// Serialized result, usually JSON
    pub payload: String,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: String, payload: String, ttl: Duration) -> Self {
        let created_at = Instant::now();
        Self {
            key,
            payload,
            created_at,
            expires_at: created_at + ttl,
            ttl,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}
