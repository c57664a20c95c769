//! In-memory cache implementation using DashMap

use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use chrono::Utc;
use dashmap::DashMap;

use super::CacheProvider;
use super::CachedValue;

/// An in-memory cache backed by a concurrent hash map.
///
/// This is the default cache implementation. Data lives as long as the
/// process, which makes it the equivalent of session storage.
///
/// # Example
///
/// ```
/// use sitekit_data::cache::InMemoryCache;
///
/// let cache = InMemoryCache::new();
/// assert!(cache.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryCache {
    store: DashMap<String, CachedValue>,
}

impl InMemoryCache {
    /// Creates a new empty in-memory cache.
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }

    /// Returns the number of entries in the cache, however old.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns `true` if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

#[async_trait]
impl CacheProvider for InMemoryCache {
    async fn get(&self, key: &str) -> Option<CachedValue> {
        self.store.get(key).map(|entry| entry.value().clone())
    }

    async fn set(&self, key: &str, value: CachedValue) {
        self.store.insert(key.to_string(), value);
    }

    async fn remove(&self, key: &str) {
        self.store.remove(key);
    }

    async fn remove_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        self.store.retain(|key, _| {
            if key.starts_with(prefix) {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }

    async fn clear(&self) {
        self.store.clear();
    }

    async fn gc(&self, older_than: Duration) -> usize {
        let Some(cutoff) = TimeDelta::from_std(older_than)
            .ok()
            .and_then(|older_than| Utc::now().checked_sub_signed(older_than))
        else {
            return 0;
        };
        let mut removed = 0;
        self.store.retain(|_, value| {
            if value.stored_at < cutoff {
                removed += 1;
                false
            } else {
                true
            }
        });
        removed
    }
}
