//! Main SiteKitClient

use std::sync::Arc;
use std::sync::RwLock;

use dashmap::DashMap;

use crate::api::BatchConfig;
use crate::api::CacheKey;
use crate::api::DEFAULT_DATE_RANGE;
use crate::cache::CacheConfig;
use crate::cache::CacheProvider;
use crate::cache::CacheStore;
use crate::cache::InMemoryCache;
use crate::error::ServiceError;
use crate::notify::NotificationRegistry;
use crate::notify::classify;
use crate::transport::Transport;

/// REST namespace of the plugin.
pub const DEFAULT_NAMESPACE: &str = "google-site-kit";

/// Client for the Site Kit data endpoints of one WordPress site.
///
/// Cheap to clone (uses `Arc` internally) and safe to share across tasks.
/// Clones share the cache, the notification registry, the selected date
/// range and the recorded service errors.
///
/// # Example
///
/// ```ignore
/// use sitekit_data::SiteKitClient;
/// use sitekit_data::transport::{Credentials, HttpTransport};
///
/// let transport = HttpTransport::new("https://example.com")?
///     .with_credentials(Credentials::Nonce(nonce));
/// let client = SiteKitClient::builder()
///     .transport(transport)
///     .date_range("last-7-days")
///     .build();
/// ```
#[derive(Clone)]
pub struct SiteKitClient {
    pub(crate) inner: Arc<SiteKitClientInner>,
}

pub(crate) struct SiteKitClientInner {
    pub(crate) namespace: String,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) cache: CacheStore,
    pub(crate) batch_config: BatchConfig,
    pub(crate) notifications: NotificationRegistry,
    date_range: RwLock<String>,
    errors: DashMap<CacheKey, ServiceError>,
}

impl SiteKitClient {
    /// Creates a new builder for constructing a client.
    pub fn builder() -> SiteKitClientBuilder<Missing> {
        SiteKitClientBuilder::new()
    }

    /// Returns the REST namespace.
    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Returns the selected date range slug.
    pub fn date_range(&self) -> String {
        match self.inner.date_range.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Selects the date range used for requests without an explicit one.
    pub fn set_date_range(&self, slug: impl Into<String>) {
        let slug = slug.into();
        log::debug!("Date range set to {}", slug);
        match self.inner.date_range.write() {
            Ok(mut guard) => *guard = slug,
            Err(poisoned) => *poisoned.into_inner() = slug,
        }
    }

    /// Returns the service error last recorded for `key`.
    ///
    /// Cleared once the key resolves successfully.
    pub fn error_for(&self, key: &CacheKey) -> Option<ServiceError> {
        self.inner.errors.get(key).map(|entry| entry.value().clone())
    }

    /// Returns the notification registry.
    pub fn notifications(&self) -> &NotificationRegistry {
        &self.inner.notifications
    }

    /// Returns the cache.
    pub fn cache(&self) -> &CacheStore {
        &self.inner.cache
    }

    /// Returns the batch configuration.
    pub fn batch_config(&self) -> &BatchConfig {
        &self.inner.batch_config
    }

    pub(crate) fn data_path(&self) -> String {
        format!("{}/v1/data/", self.inner.namespace)
    }

    pub(crate) fn record_service_error(&self, key: &CacheKey, error: ServiceError) {
        let added = self.inner.notifications.register(classify(&error));
        if added > 0 {
            log::debug!("{} registered {} new notifications", key, added);
        }
        self.inner.errors.insert(key.clone(), error);
    }

    pub(crate) fn clear_service_error(&self, key: &CacheKey) {
        self.inner.errors.remove(key);
    }
}

impl std::fmt::Debug for SiteKitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SiteKitClient")
            .field("namespace", &self.inner.namespace)
            .field("date_range", &self.date_range())
            .field("batch_config", &self.inner.batch_config)
            .field("notifications", &self.inner.notifications)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Typestate Builder
// =============================================================================

/// Marker type for missing required builder fields.
pub struct Missing;

/// Marker type for set builder fields.
pub struct Set<T>(T);

/// Builder for constructing a [`SiteKitClient`].
///
/// Uses the typestate pattern to ensure a transport is set at compile time.
///
/// # Required Fields
///
/// - `transport` - A [`Transport`] implementation
///
/// # Example
///
/// ```ignore
/// let client = SiteKitClient::builder()
///     .transport(transport)
///     .cache(SqliteCache::open("sitekit.db").await?)
///     .batch_config(BatchConfig::default().with_bypass_server_cache(true))
///     .build();
/// ```
pub struct SiteKitClientBuilder<T> {
    transport: T,
    namespace: String,
    cache: Option<Arc<dyn CacheProvider>>,
    cache_config: CacheConfig,
    batch_config: BatchConfig,
    date_range: String,
    notifications: Option<NotificationRegistry>,
}

impl SiteKitClientBuilder<Missing> {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            transport: Missing,
            namespace: DEFAULT_NAMESPACE.to_string(),
            cache: None,
            cache_config: CacheConfig::default(),
            batch_config: BatchConfig::default(),
            date_range: DEFAULT_DATE_RANGE.to_string(),
            notifications: None,
        }
    }

    /// Sets the transport.
    pub fn transport<T: Transport + 'static>(
        self,
        transport: T,
    ) -> SiteKitClientBuilder<Set<Arc<dyn Transport>>> {
        self.transport_arc(Arc::new(transport))
    }

    /// Sets a shared transport.
    pub fn transport_arc(
        self,
        transport: Arc<dyn Transport>,
    ) -> SiteKitClientBuilder<Set<Arc<dyn Transport>>> {
        SiteKitClientBuilder {
            transport: Set(transport),
            namespace: self.namespace,
            cache: self.cache,
            cache_config: self.cache_config,
            batch_config: self.batch_config,
            date_range: self.date_range,
            notifications: self.notifications,
        }
    }
}

impl Default for SiteKitClientBuilder<Missing> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SiteKitClientBuilder<T> {
    /// Sets the REST namespace.
    ///
    /// Defaults to `google-site-kit`.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the cache provider.
    ///
    /// If not set, an [`InMemoryCache`] is used.
    pub fn cache<C: CacheProvider + 'static>(mut self, provider: C) -> Self {
        self.cache = Some(Arc::new(provider));
        self
    }

    /// Sets a shared cache provider.
    pub fn cache_arc(mut self, provider: Arc<dyn CacheProvider>) -> Self {
        self.cache = Some(provider);
        self
    }

    /// Sets the cache configuration.
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Sets the batch scheduling configuration.
    pub fn batch_config(mut self, config: BatchConfig) -> Self {
        self.batch_config = config;
        self
    }

    /// Sets the initially selected date range.
    ///
    /// Defaults to `last-28-days`.
    pub fn date_range(mut self, slug: impl Into<String>) -> Self {
        self.date_range = slug.into();
        self
    }

    /// Shares a notification registry with the client.
    ///
    /// If not set, the client creates its own.
    pub fn notifications(mut self, registry: NotificationRegistry) -> Self {
        self.notifications = Some(registry);
        self
    }
}

impl SiteKitClientBuilder<Set<Arc<dyn Transport>>> {
    /// Builds the [`SiteKitClient`].
    ///
    /// This method is only available once a transport has been set.
    pub fn build(self) -> SiteKitClient {
        let provider = self
            .cache
            .unwrap_or_else(|| Arc::new(InMemoryCache::new()) as Arc<dyn CacheProvider>);

        SiteKitClient {
            inner: Arc::new(SiteKitClientInner {
                namespace: self.namespace,
                transport: self.transport.0,
                cache: CacheStore::from_arc(provider, self.cache_config),
                batch_config: self.batch_config,
                notifications: self.notifications.unwrap_or_default(),
                date_range: RwLock::new(self.date_range),
                errors: DashMap::new(),
            }),
        }
    }
}
