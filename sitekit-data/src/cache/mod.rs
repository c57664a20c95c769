//! Local response cache
//!
//! A [`CacheProvider`] stores raw bytes by string key together with the time
//! they were written. Freshness is decided by the reader: every request
//! carries its own maximum age, so the same entry can be fresh for one widget
//! and stale for another. Reads never evict; [`CacheProvider::gc`] does.
//!
//! [`CacheStore`] layers JSON values, key namespacing and group invalidation
//! on top of a provider and is what the client uses.

mod config;
mod memory;
mod sqlite;
mod store;

pub use config::*;
pub use memory::*;
pub use sqlite::*;
pub use store::*;

pub(crate) use store::expires_at;

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;

/// A cached value with the time it was written.
#[derive(Debug, Clone)]
pub struct CachedValue {
    /// The cached data, serialized as JSON bytes.
    pub data: Vec<u8>,
    /// When this value was stored.
    pub stored_at: DateTime<Utc>,
}

impl CachedValue {
    /// Creates a new cached value.
    pub fn new(data: Vec<u8>, stored_at: DateTime<Utc>) -> Self {
        Self { data, stored_at }
    }

    /// Creates a new cached value stored now.
    pub fn new_now(data: Vec<u8>) -> Self {
        Self {
            data,
            stored_at: Utc::now(),
        }
    }

    /// Returns how long ago the value was stored.
    pub fn age(&self) -> TimeDelta {
        Utc::now() - self.stored_at
    }

    /// Returns `true` while the value is younger than `max_age`.
    pub fn is_fresh(&self, max_age: Duration) -> bool {
        let max_age = TimeDelta::from_std(max_age).unwrap_or(TimeDelta::MAX);
        self.age() < max_age
    }

    /// Returns when the value stops being fresh for the given `max_age`.
    pub fn expires_at(&self, max_age: Duration) -> DateTime<Utc> {
        store::expires_at(self.stored_at, max_age)
    }
}

/// Trait for cache providers.
///
/// Implementations store and retrieve raw values by string keys. They do not
/// interpret the bytes and never decide freshness; `get` returns whatever is
/// stored, however old.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Retrieves a cached value by key.
    async fn get(&self, key: &str) -> Option<CachedValue>;

    /// Stores a value in the cache, replacing any previous value.
    async fn set(&self, key: &str, value: CachedValue);

    /// Removes a value from the cache.
    async fn remove(&self, key: &str);

    /// Removes every value whose key starts with `prefix`.
    ///
    /// Returns the number of entries removed.
    async fn remove_prefix(&self, prefix: &str) -> usize;

    /// Clears all values from the cache.
    async fn clear(&self);

    /// Removes all entries stored longer ago than `older_than`.
    ///
    /// Returns the number of entries removed.
    async fn gc(&self, older_than: Duration) -> usize;
}
