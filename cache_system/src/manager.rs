//! Cache manager implementation
//!
//! Backed by `moka::sync::Cache`. Capacity is enforced with LRU eviction and
//! every entry carries its own time-to-live through [`EntryExpiry`].

use std::fmt::Debug;
use std::time::{Duration, Instant};

use config::CacheConfig;
use moka::Expiry;
use moka::policy::EvictionPolicy;
use moka::sync::Cache;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::entry::CacheEntry;
use crate::errors::CacheError;

/// Expires each entry after the TTL it was stored with
struct EntryExpiry;

impl Expiry<String, CacheEntry> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process TTL cache
pub struct CacheManager {
    cache: Cache<String, CacheEntry>,
    max_entries: usize,
}

impl Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("entries", &self.cache.entry_count())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl CacheManager {
    /// Create a new cache manager holding at most `max_entries` results
    pub fn new(max_entries: usize) -> Result<Self, CacheError> {
        if max_entries == 0 {
            return Err(CacheError::InvalidCapacity(max_entries));
        }

        let cache = Cache::builder()
            .max_capacity(max_entries as u64)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryExpiry)
            .eviction_listener(|key, _entry: CacheEntry, cause| {
                tracing::debug!(key = %key, cause = ?cause, "evicted cache entry");
            })
            .build();

        Ok(Self { cache, max_entries })
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        Self::new(config.max_entries)
    }

    /// Look up a live entry. An entry past its expiry is dropped and reported as a miss.
    pub fn get(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.cache.get(key)?;
        if entry.is_expired_at(Instant::now()) {
            self.cache.invalidate(key);
            return None;
        }
        Some(entry)
    }

    /// Store `payload` under `key`, replacing any previous entry
    pub fn put(&self, key: &str, payload: String, ttl: Duration) -> Result<(), CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl(0));
        }

        let entry = CacheEntry::new(key.to_string(), payload, ttl);
        self.cache.insert(key.to_string(), entry);
        Ok(())
    }

    /// Typed lookup; the payload is deserialized with `serde_json`
    pub fn get_json<T>(&self, key: &str) -> Result<Option<T>, CacheError>
    where
        T: DeserializeOwned,
    {
        match self.get(key) {
            Some(entry) => Ok(Some(serde_json::from_str(&entry.payload)?)),
            None => Ok(None),
        }
    }

    /// Typed store; the value is serialized with `serde_json`
    pub fn put_json<T>(&self, key: &str, value: &T, ttl: Duration) -> Result<(), CacheError>
    where
        T: Serialize,
    {
        let payload = serde_json::to_string(value)?;
        self.put(key, payload, ttl)
    }

    /// Remove one entry, returning whether it existed
    pub fn invalidate(&self, key: &str) -> bool {
        self.cache.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Number of stored entries once pending evictions have been applied
    pub fn len(&self) -> usize {
        self.cache.run_pending_tasks();
        self.cache.entry_count() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }
}
