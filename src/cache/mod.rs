use crate::core::Result;
use crate::result::Output;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Result store shared by every cached method of one compiled interface.
///
/// Individual operations are expected to be atomic; the compiler does no
/// locking of its own around them.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Output>>;

    /// Stores a copy of `value`; streams are not cacheable and are ignored.
    fn put(&self, key: &str, value: &Output, live: Duration, idle: Duration) -> Result<()>;

    fn remove(&self, key: &str) -> Result<()>;

    fn clear(&self) -> Result<()>;
}

struct CacheEntry {
    value: Output,
    /// `None` when the live time reaches past what `Instant` can represent.
    expires_at: Option<Instant>,
    idle: Duration,
    last_access: Instant,
}

impl CacheEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| now < at)
            && now.saturating_duration_since(self.last_access) < self.idle
    }
}

/// In-process LRU store with live and idle expiry.
pub struct LocalCacheStore {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl LocalCacheStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for LocalCacheStore {
    fn get(&self, key: &str) -> Result<Option<Output>> {
        let mut entries = self.entries.lock()?;
        let now = Instant::now();

        match entries.get_mut(key) {
            Some(entry) if entry.is_live(now) => {
                entry.last_access = now;
                return Ok(entry.value.try_clone());
            }
            Some(_) => {}
            None => return Ok(None),
        }

        entries.pop(key);
        Ok(None)
    }

    fn put(&self, key: &str, value: &Output, live: Duration, idle: Duration) -> Result<()> {
        let Some(value) = value.try_clone() else {
            return Ok(());
        };
        let now = Instant::now();
        self.entries.lock()?.put(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now.checked_add(live),
                idle,
                last_access: now,
            },
        );
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.lock()?.pop(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.lock()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn test_put_get_remove() {
        let store = LocalCacheStore::new(8);
        store.put("k", &Output::Value(Value::Integer(1)), HOUR, HOUR).unwrap();

        let hit = store.get("k").unwrap().unwrap().into_value().unwrap();
        assert_eq!(hit, Value::Integer(1));

        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn test_expired_entries_are_dropped() {
        let store = LocalCacheStore::new(8);
        store
            .put("k", &Output::Value(Value::Integer(1)), Duration::ZERO, HOUR)
            .unwrap();
        assert!(store.get("k").unwrap().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_unbounded_live_time_never_expires() {
        let store = LocalCacheStore::new(8);
        store
            .put("k", &Output::Value(Value::Integer(1)), Duration::MAX, Duration::MAX)
            .unwrap();
        let hit = store.get("k").unwrap().unwrap().into_value().unwrap();
        assert_eq!(hit, Value::Integer(1));
    }

    #[test]
    fn test_lru_eviction() {
        let store = LocalCacheStore::new(2);
        for k in ["a", "b", "c"] {
            store.put(k, &Output::Value(Value::from(k)), HOUR, HOUR).unwrap();
        }
        assert_eq!(store.len(), 2);
        assert!(store.get("a").unwrap().is_none());
        assert!(store.get("c").unwrap().is_some());
    }
}
