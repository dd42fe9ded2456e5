//! Caches for content batches.
//!
//! [`ContentCache`] is the contract the [`Client`](crate::Client) talks to. [`InMemoryCache`] is
//! the default, private to a single client. [`SharedCache`] adapts an external key-value store
//! (Redis, memcached, ...) that other consumers may also be using.
use std::{
    collections::{HashMap, HashSet},
    time::Duration,
};

use chrono::{DateTime, Utc};

use crate::{
    clock::{elapsed, Clock, SystemClock},
    models::ContentBatch,
    properties::validate_cache_expiration,
    Error, Result,
};

/// Storage for content batches keyed by an opaque cache key.
pub trait ContentCache {
    /// Get a non-expired batch.
    fn get(&mut self, key: &str) -> Result<Option<ContentBatch>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&mut self, key: &str, value: ContentBatch) -> Result<()>;

    /// Remove every entry this cache instance has written.
    fn clear(&mut self) -> Result<()>;

    /// Change the expiration applied from now on. Negative values are rejected.
    fn set_expiration_seconds(&mut self, seconds: i64) -> Result<()>;
}

impl<T: ContentCache + ?Sized> ContentCache for Box<T> {
    fn get(&mut self, key: &str) -> Result<Option<ContentBatch>> {
        (**self).get(key)
    }

    fn set(&mut self, key: &str, value: ContentBatch) -> Result<()> {
        (**self).set(key, value)
    }

    fn clear(&mut self) -> Result<()> {
        (**self).clear()
    }

    fn set_expiration_seconds(&mut self, seconds: i64) -> Result<()> {
        (**self).set_expiration_seconds(seconds)
    }
}

struct Entry {
    value: ContentBatch,
    cached_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
}

/// In-memory [`ContentCache`] with lazy expiration and least-recently-accessed eviction.
pub struct InMemoryCache<C = SystemClock> {
    entries: HashMap<String, Entry>,
    expiration: Duration,
    max_items: usize,
    clock: C,
}

impl InMemoryCache {
    /// Default bound on the number of entries.
    pub const DEFAULT_MAX_ITEMS: usize = 1_000;

    /// Create a cache with the given expiration and entry bound.
    pub fn new(expiration_seconds: i64, max_items: usize) -> Result<Self> {
        InMemoryCache::with_clock(expiration_seconds, max_items, SystemClock)
    }
}

impl<C: Clock> InMemoryCache<C> {
    /// Create a cache that reads time from `clock`.
    pub fn with_clock(expiration_seconds: i64, max_items: usize, clock: C) -> Result<Self> {
        let expiration = validate_cache_expiration(expiration_seconds)?;
        if max_items < 1 {
            return Err(Error::invalid_argument(format!(
                "Invalid maxItems: {max_items}. It should be greater than 0."
            )));
        }
        Ok(InMemoryCache {
            entries: HashMap::new(),
            expiration: Duration::from_secs(expiration),
            max_items,
            clock,
        })
    }

    /// Number of stored entries, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, entry: &Entry, now: DateTime<Utc>) -> bool {
        elapsed(entry.cached_at, now) >= self.expiration
    }

    fn evict_least_recently_accessed(&mut self) {
        if self.entries.len() <= self.max_items {
            return;
        }

        let mut by_access: Vec<(&String, DateTime<Utc>)> = self
            .entries
            .iter()
            .map(|(key, entry)| (key, entry.last_accessed_at))
            .collect();
        by_access.sort_by(|(_, left), (_, right)| left.cmp(right));

        let excess = self.entries.len() - self.max_items;
        let keys_to_delete: Vec<String> = by_access
            .into_iter()
            .take(excess)
            .map(|(key, _)| key.clone())
            .collect();

        log::debug!(target: "joystick", keys_to_delete:serde = keys_to_delete; "evicting least recently accessed cache entries");

        for key in &keys_to_delete {
            self.entries.remove(key);
        }
    }
}

impl<C: Clock> ContentCache for InMemoryCache<C> {
    fn get(&mut self, key: &str) -> Result<Option<ContentBatch>> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) => self.is_expired(entry, now),
        };
        if expired {
            return Ok(None);
        }

        Ok(self.entries.get_mut(key).map(|entry| {
            entry.last_accessed_at = now;
            entry.value.clone()
        }))
    }

    fn set(&mut self, key: &str, value: ContentBatch) -> Result<()> {
        let now = self.clock.now();
        self.entries.insert(
            key.to_owned(),
            Entry {
                value,
                cached_at: now,
                last_accessed_at: now,
            },
        );
        self.evict_least_recently_accessed();
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }

    fn set_expiration_seconds(&mut self, seconds: i64) -> Result<()> {
        self.expiration = Duration::from_secs(validate_cache_expiration(seconds)?);
        Ok(())
    }
}

/// A key-value store that may be shared with other consumers, such as Redis.
pub trait KeyValueStore {
    /// Read the raw value stored under `key`.
    fn get(&mut self, key: &str) -> Result<Option<String>>;

    /// Write `value` under `key`, expiring it after `ttl`.
    fn set_with_ttl(&mut self, key: &str, value: String, ttl: Duration) -> Result<()>;

    /// Delete `key`.
    fn delete(&mut self, key: &str) -> Result<()>;
}

/// [`ContentCache`] on top of a shared [`KeyValueStore`].
///
/// Batches are stored as JSON. Expiration is delegated to the store. The cache remembers the
/// keys it wrote, and [`ContentCache::clear`] deletes only those.
pub struct SharedCache<S> {
    store: S,
    expiration: Duration,
    written_keys: HashSet<String>,
}

impl<S: KeyValueStore> SharedCache<S> {
    /// Wrap `store`, writing entries with the given expiration.
    pub fn new(store: S, expiration_seconds: i64) -> Result<Self> {
        Ok(SharedCache {
            store,
            expiration: Duration::from_secs(validate_cache_expiration(expiration_seconds)?),
            written_keys: HashSet::new(),
        })
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: KeyValueStore> ContentCache for SharedCache<S> {
    fn get(&mut self, key: &str) -> Result<Option<ContentBatch>> {
        match self.store.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => {
                // expired or evicted by the store
                self.written_keys.remove(key);
                Ok(None)
            }
        }
    }

    fn set(&mut self, key: &str, value: ContentBatch) -> Result<()> {
        let raw = serde_json::to_string(&value)?;
        self.store.set_with_ttl(key, raw, self.expiration)?;
        self.written_keys.insert(key.to_owned());
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        for key in std::mem::take(&mut self.written_keys) {
            self.store.delete(&key)?;
        }
        Ok(())
    }

    fn set_expiration_seconds(&mut self, seconds: i64) -> Result<()> {
        self.expiration = Duration::from_secs(validate_cache_expiration(seconds)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::HashMap, rc::Rc, time::Duration};

    use serde_json::json;

    use super::*;
    use crate::{
        clock::ManualClock,
        models::{ContentResponse, Meta},
        ErrorKind,
    };

    fn batch(marker: &str) -> ContentBatch {
        [(
            "content".to_owned(),
            ContentResponse {
                data: json!(marker),
                hash: "hash".to_owned(),
                meta: Meta::default(),
            },
        )]
        .into()
    }

    #[test]
    fn rejects_invalid_construction() {
        let err = InMemoryCache::new(-1, 10).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(InMemoryCache::new(10, 0).is_err());
        assert!(InMemoryCache::new(0, 1).is_ok());
    }

    #[test]
    fn expires_lazily_at_read_time() {
        let clock = ManualClock::default();
        let mut cache = InMemoryCache::with_clock(10, 100, clock.clone()).unwrap();
        cache.set("key", batch("a")).unwrap();

        clock.advance(Duration::from_millis(9_999));
        assert_eq!(cache.get("key").unwrap(), Some(batch("a")));

        clock.advance(Duration::from_millis(2));
        assert_eq!(cache.get("key").unwrap(), None);
        // not swept, only filtered
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn new_expiration_applies_through_the_same_lazy_check() {
        let clock = ManualClock::default();
        let mut cache = InMemoryCache::with_clock(60, 100, clock.clone()).unwrap();
        cache.set("key", batch("a")).unwrap();
        clock.advance(Duration::from_secs(20));

        cache.set_expiration_seconds(10).unwrap();
        assert_eq!(cache.get("key").unwrap(), None);

        cache.set_expiration_seconds(30).unwrap();
        assert_eq!(cache.get("key").unwrap(), Some(batch("a")));

        assert!(cache.set_expiration_seconds(-1).is_err());
    }

    #[test]
    fn evicts_least_recently_accessed() {
        let clock = ManualClock::default();
        let mut cache = InMemoryCache::with_clock(300, 2, clock.clone()).unwrap();

        cache.set("first", batch("1")).unwrap();
        clock.advance(Duration::from_secs(1));
        cache.set("second", batch("2")).unwrap();
        clock.advance(Duration::from_secs(1));

        // touching "first" makes "second" the least recently accessed
        assert!(cache.get("first").unwrap().is_some());
        clock.advance(Duration::from_secs(1));

        cache.set("third", batch("3")).unwrap();

        assert_eq!(cache.len(), 2);
        assert!(cache.get("first").unwrap().is_some());
        assert!(cache.get("second").unwrap().is_none());
        assert!(cache.get("third").unwrap().is_some());
    }

    #[test]
    fn clear_removes_everything() {
        let mut cache = InMemoryCache::new(300, 10).unwrap();
        cache.set("a", batch("a")).unwrap();
        cache.set("b", batch("b")).unwrap();
        cache.clear().unwrap();
        assert!(cache.is_empty());
    }

    /// Store shared between several consumers, standing in for a networked cache.
    #[derive(Clone, Default)]
    struct SharedStore(Rc<RefCell<HashMap<String, (String, Duration)>>>);

    impl KeyValueStore for SharedStore {
        fn get(&mut self, key: &str) -> Result<Option<String>> {
            Ok(self.0.borrow().get(key).map(|(value, _)| value.clone()))
        }

        fn set_with_ttl(&mut self, key: &str, value: String, ttl: Duration) -> Result<()> {
            self.0.borrow_mut().insert(key.to_owned(), (value, ttl));
            Ok(())
        }

        fn delete(&mut self, key: &str) -> Result<()> {
            self.0.borrow_mut().remove(key);
            Ok(())
        }
    }

    #[test]
    fn shared_cache_round_trips_batches_with_ttl() {
        let store = SharedStore::default();
        let mut cache = SharedCache::new(store.clone(), 42).unwrap();

        cache.set("key", batch("a")).unwrap();

        assert_eq!(cache.get("key").unwrap(), Some(batch("a")));
        assert_eq!(store.0.borrow()["key"].1, Duration::from_secs(42));
    }

    #[test]
    fn shared_cache_only_clears_its_own_keys() {
        let store = SharedStore::default();
        store
            .clone()
            .set_with_ttl("other-tenant", "{}".to_owned(), Duration::from_secs(1))
            .unwrap();

        let mut cache = SharedCache::new(store.clone(), 300).unwrap();
        cache.set("mine", batch("a")).unwrap();
        cache.clear().unwrap();

        assert!(cache.get("mine").unwrap().is_none());
        assert!(store.0.borrow().contains_key("other-tenant"));
    }

    #[test]
    fn shared_cache_forgets_keys_the_store_expired() {
        let store = SharedStore::default();
        let mut cache = SharedCache::new(store.clone(), 300).unwrap();
        cache.set("first", batch("a")).unwrap();
        cache.set("second", batch("b")).unwrap();

        // the store drops "first" on its own
        store.0.borrow_mut().remove("first");

        assert!(cache.get("first").unwrap().is_none());
        assert_eq!(cache.written_keys, HashSet::from(["second".to_owned()]));
    }
}
