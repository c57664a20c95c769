//! Cache configuration

use std::time::Duration;

/// Configuration for the local response cache.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use sitekit_data::cache::CacheConfig;
///
/// let config = CacheConfig::default()
///     .with_namespace("googlesitekit_user42_")
///     .with_default_max_age(Duration::from_secs(600));
/// assert!(config.enabled);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Prefix prepended to every stored key.
    ///
    /// Scopes a shared storage medium to one user or session.
    ///
    /// Default: `googlesitekit_`
    pub namespace: String,

    /// Whether the cache is consulted and written at all.
    ///
    /// Default: `true`
    pub enabled: bool,

    /// Entries older than this are removed by [`CacheStore::gc_expired`].
    ///
    /// [`CacheStore::gc_expired`]: super::CacheStore::gc_expired
    ///
    /// Default: 1 hour
    pub default_max_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            namespace: "googlesitekit_".to_string(),
            enabled: true,
            default_max_age: Duration::from_secs(3600),
        }
    }
}

impl CacheConfig {
    /// Creates a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the default max age.
    pub fn with_default_max_age(mut self, max_age: Duration) -> Self {
        self.default_max_age = max_age;
        self
    }

    /// Enables or disables the cache.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Creates a config with caching disabled.
    pub fn no_cache() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}
