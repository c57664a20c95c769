//! Typed JSON cache over a [`CacheProvider`]

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde_json::Value;

use super::CacheConfig;
use super::CacheProvider;
use super::CachedValue;
use crate::api::CacheKey;
use crate::api::RequestType;

/// A fresh cache entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// The cached response.
    pub value: Value,
    /// When it was stored.
    pub stored_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Returns when the entry stops being fresh for the given `max_age`.
    pub fn expires_at(&self, max_age: Duration) -> DateTime<Utc> {
        expires_at(self.stored_at, max_age)
    }
}

/// Returns `stored_at + max_age`, saturating at the latest representable time.
pub(crate) fn expires_at(stored_at: DateTime<Utc>, max_age: Duration) -> DateTime<Utc> {
    chrono::TimeDelta::from_std(max_age)
        .ok()
        .and_then(|max_age| stored_at.checked_add_signed(max_age))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// JSON cache used by the client.
///
/// Namespaces keys with [`CacheConfig::namespace`], decides freshness per
/// read, and treats anything it can't decode as a miss.
#[derive(Clone)]
pub struct CacheStore {
    provider: Arc<dyn CacheProvider>,
    config: CacheConfig,
}

impl CacheStore {
    /// Creates a store over the given provider.
    pub fn new(provider: impl CacheProvider + 'static, config: CacheConfig) -> Self {
        Self::from_arc(Arc::new(provider), config)
    }

    /// Creates a store over a shared provider.
    pub fn from_arc(provider: Arc<dyn CacheProvider>, config: CacheConfig) -> Self {
        Self { provider, config }
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the underlying provider.
    pub fn provider(&self) -> &Arc<dyn CacheProvider> {
        &self.provider
    }

    /// Returns the entry for `key` if it is younger than `max_age`.
    pub async fn get(&self, key: &CacheKey, max_age: Duration) -> Option<CacheEntry> {
        if !self.config.enabled {
            return None;
        }

        let cached = self.provider.get(&self.storage_key(key)).await?;
        if !cached.is_fresh(max_age) {
            log::trace!("Cache entry {} is stale", key);
            return None;
        }

        match serde_json::from_slice(&cached.data) {
            Ok(value) => Some(CacheEntry {
                value,
                stored_at: cached.stored_at,
            }),
            Err(e) => {
                log::debug!("Ignoring malformed cache entry {}: {}", key, e);
                None
            }
        }
    }

    /// Stores `value` under `key`, timestamped now.
    ///
    /// Returns the timestamp, or `None` when the cache is disabled or the
    /// value can't be encoded.
    pub async fn set(&self, key: &CacheKey, value: &Value) -> Option<DateTime<Utc>> {
        let stored_at = Utc::now();
        self.set_at(key, value, stored_at).await.then_some(stored_at)
    }

    /// Stores `value` under `key` with an explicit timestamp.
    ///
    /// Used to seed the cache with data fetched elsewhere. Returns `true` if
    /// the value was written.
    pub async fn set_at(&self, key: &CacheKey, value: &Value, stored_at: DateTime<Utc>) -> bool {
        if !self.config.enabled {
            return false;
        }

        match serde_json::to_vec(value) {
            Ok(data) => {
                self.provider
                    .set(&self.storage_key(key), CachedValue::new(data, stored_at))
                    .await;
                true
            }
            Err(e) => {
                log::warn!("Failed to encode cache entry {}: {}", key, e);
                false
            }
        }
    }

    /// Removes every entry of a module, or of one of its datapoints.
    ///
    /// Returns the number of entries removed.
    pub async fn invalidate_group(
        &self,
        request_type: RequestType,
        identifier: &str,
        datapoint: Option<&str>,
    ) -> usize {
        let prefix = CacheKey::group_prefix(request_type, identifier, datapoint);
        let removed = self.provider.remove_prefix(&self.storage_key(&prefix)).await;
        log::debug!("Invalidated {} cache entries under {}", removed, prefix);
        removed
    }

    /// Removes every entry.
    pub async fn clear(&self) {
        self.provider.clear().await;
    }

    /// Removes entries stored longer ago than `older_than`.
    pub async fn gc(&self, older_than: Duration) -> usize {
        self.provider.gc(older_than).await
    }

    /// Removes entries older than [`CacheConfig::default_max_age`].
    pub async fn gc_expired(&self) -> usize {
        self.gc(self.config.default_max_age).await
    }

    fn storage_key(&self, key: impl AsRef<str>) -> String {
        format!("{}{}", self.config.namespace, key.as_ref())
    }
}
