//! TTL-capable counter cache.
//!
//! Failed-attempt counters, lockout flags, rate-limit windows and the access
//! token revocation list all live in a [`CounterCache`]. Implementations must
//! make `increment` and `set` with TTL atomic under concurrent callers; the
//! rest of the crate never reads-then-writes a counter.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::error::{AuthError, AuthResult};

/// Key/value cache with expiry and atomic increments.
///
/// Mirrors the subset of Redis the subsystem relies on: `SET key value EX`,
/// `GET`, `DEL`, `EXISTS`, `INCR`, `EXPIRE`.
pub trait CounterCache: Send + Sync {
    /// Store a value that disappears after `ttl`.
    fn set(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<()>;

    /// Get a value, `None` if absent or expired.
    fn get(&self, key: &str) -> AuthResult<Option<String>>;

    /// Delete a key. Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> AuthResult<()>;

    /// Check whether a key is present and unexpired.
    fn exists(&self, key: &str) -> AuthResult<bool>;

    /// Atomically add one to an integer value and return the new value.
    ///
    /// An absent key counts from zero and carries no expiry.
    fn increment(&self, key: &str) -> AuthResult<i64>;

    /// Attach an expiry to an existing key. Returns false if the key is absent.
    fn set_expiration(&self, key: &str, ttl: Duration) -> AuthResult<bool>;
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// Default number of entries before a write sweeps out expired ones.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// In-process [`CounterCache`].
///
/// Expired entries are dropped lazily on access, by [`purge_expired`], and
/// by any write that adds a key once the map holds `max_entries` (prevents
/// memory exhaustion when keys are per client IP). Clones share the same
/// underlying map.
///
/// [`purge_expired`]: MemoryCache::purge_expired
#[derive(Debug, Clone)]
pub struct MemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    max_entries: usize,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the size at which new keys trigger a sweep of expired entries.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max.max(1);
        self
    }

    /// Drop every expired entry and return how many were removed.
    pub fn purge_expired(&self) -> AuthResult<usize> {
        let mut entries = self.write()?;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write(&self) -> AuthResult<std::sync::RwLockWriteGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .write()
            .map_err(|_| AuthError::StorageUnavailable("cache lock poisoned".to_string()))
    }

    fn make_room(&self, entries: &mut HashMap<String, Entry>, key: &str, now: Instant) {
        if entries.len() < self.max_entries || entries.contains_key(key) {
            return;
        }
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        tracing::debug!(
            removed = before - entries.len(),
            remaining = entries.len(),
            "Swept expired cache entries"
        );
    }

    fn read(&self) -> AuthResult<std::sync::RwLockReadGuard<'_, HashMap<String, Entry>>> {
        self.entries
            .read()
            .map_err(|_| AuthError::StorageUnavailable("cache lock poisoned".to_string()))
    }
}

impl CounterCache for MemoryCache {
    fn set(&self, key: &str, value: &str, ttl: Duration) -> AuthResult<()> {
        let mut entries = self.write()?;
        let now = Instant::now();
        self.make_room(&mut entries, key, now);
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> AuthResult<Option<String>> {
        let entries = self.read()?;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone()))
    }

    fn delete(&self, key: &str) -> AuthResult<()> {
        self.write()?.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> AuthResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn increment(&self, key: &str) -> AuthResult<i64> {
        let mut entries = self.write()?;
        let now = Instant::now();

        // An expired counter is gone, the next window starts from scratch.
        if entries.get(key).is_some_and(|entry| !entry.is_live(now)) {
            entries.remove(key);
        }
        self.make_room(&mut entries, key, now);

        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            value: "0".to_string(),
            expires_at: None,
        });

        let current: i64 = entry.value.parse().map_err(|_| {
            AuthError::StorageUnavailable(format!("value at '{}' is not an integer", key))
        })?;
        let next = current
            .checked_add(1)
            .ok_or_else(|| AuthError::StorageUnavailable(format!("counter '{}' overflowed", key)))?;
        entry.value = next.to_string();
        Ok(next)
    }

    fn set_expiration(&self, key: &str, ttl: Duration) -> AuthResult<bool> {
        let mut entries = self.write()?;
        let now = Instant::now();
        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::thread::sleep;

    /// Cache whose every call fails, for exercising fail-open/closed paths.
    pub(crate) struct BrokenCache;

    impl CounterCache for BrokenCache {
        fn set(&self, _: &str, _: &str, _: Duration) -> AuthResult<()> {
            Err(AuthError::StorageUnavailable("connection refused".into()))
        }
        fn get(&self, _: &str) -> AuthResult<Option<String>> {
            Err(AuthError::StorageUnavailable("connection refused".into()))
        }
        fn delete(&self, _: &str) -> AuthResult<()> {
            Err(AuthError::StorageUnavailable("connection refused".into()))
        }
        fn exists(&self, _: &str) -> AuthResult<bool> {
            Err(AuthError::StorageUnavailable("connection refused".into()))
        }
        fn increment(&self, _: &str) -> AuthResult<i64> {
            Err(AuthError::StorageUnavailable("connection refused".into()))
        }
        fn set_expiration(&self, _: &str, _: Duration) -> AuthResult<bool> {
            Err(AuthError::StorageUnavailable("connection refused".into()))
        }
    }

    #[test]
    fn test_set_get_delete() {
        let cache = MemoryCache::new();
        cache.set("k", "v", Duration::from_secs(60)).unwrap();
        assert_eq!(cache.get("k").unwrap().as_deref(), Some("v"));
        assert!(cache.exists("k").unwrap());

        cache.delete("k").unwrap();
        assert!(cache.get("k").unwrap().is_none());
        assert!(!cache.exists("k").unwrap());

        // Deleting again is fine
        cache.delete("k").unwrap();
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = MemoryCache::new();
        cache.set("short", "1", Duration::from_millis(50)).unwrap();
        assert!(cache.exists("short").unwrap());

        sleep(Duration::from_millis(80));
        assert!(!cache.exists("short").unwrap());
        assert_eq!(cache.purge_expired().unwrap(), 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_increment_counts_from_zero() {
        let cache = MemoryCache::new();
        assert_eq!(cache.increment("c").unwrap(), 1);
        assert_eq!(cache.increment("c").unwrap(), 2);
        assert_eq!(cache.increment("c").unwrap(), 3);
        assert_eq!(cache.get("c").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn test_increment_after_expiry_restarts() {
        let cache = MemoryCache::new();
        cache.increment("c").unwrap();
        assert!(cache.set_expiration("c", Duration::from_millis(50)).unwrap());
        cache.increment("c").unwrap();

        sleep(Duration::from_millis(80));
        assert_eq!(cache.increment("c").unwrap(), 1);
    }

    #[test]
    fn test_increment_keeps_existing_ttl() {
        let cache = MemoryCache::new();
        cache.increment("c").unwrap();
        cache.set_expiration("c", Duration::from_millis(50)).unwrap();
        assert_eq!(cache.increment("c").unwrap(), 2);

        sleep(Duration::from_millis(80));
        assert!(!cache.exists("c").unwrap());
    }

    #[test]
    fn test_increment_non_integer_fails() {
        let cache = MemoryCache::new();
        cache.set("flag", "true", Duration::from_secs(60)).unwrap();
        assert!(matches!(
            cache.increment("flag"),
            Err(AuthError::StorageUnavailable(_))
        ));
    }

    #[test]
    fn test_set_expiration_missing_key() {
        let cache = MemoryCache::new();
        assert!(!cache.set_expiration("nope", Duration::from_secs(1)).unwrap());
    }

    #[test]
    fn test_clones_share_state() {
        let cache = MemoryCache::new();
        let other = cache.clone();
        cache.increment("shared").unwrap();
        assert_eq!(other.increment("shared").unwrap(), 2);
    }

    #[test]
    fn test_expired_entries_swept_on_write() {
        let cache = MemoryCache::new().with_max_entries(100);
        for i in 0..100 {
            let key = format!("rate_limit:auth:10.0.0.{}", i);
            cache.increment(&key).unwrap();
            cache.set_expiration(&key, Duration::from_millis(20)).unwrap();
        }
        assert_eq!(cache.len(), 100);

        sleep(Duration::from_millis(50));
        cache.increment("rate_limit:auth:10.0.1.1").unwrap();
        assert_eq!(cache.len(), 1);

        for i in 0..100 {
            cache
                .set(&format!("revoked_token:{}", i), "1", Duration::from_millis(20))
                .unwrap();
        }
        sleep(Duration::from_millis(50));
        cache.set("revoked_token:last", "1", Duration::from_secs(60)).unwrap();
        // The live counter and the newest entry survive
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_live_entries_never_swept() {
        let cache = MemoryCache::new().with_max_entries(10);
        for i in 0..20 {
            cache.set(&format!("k{}", i), "v", Duration::from_secs(60)).unwrap();
        }
        assert_eq!(cache.len(), 20);
        assert!(cache.exists("k0").unwrap());
    }
}
