//! Single-datapoint answers and where they came from

use chrono::DateTime;
use chrono::TimeDelta;
use chrono::Utc;
use serde::Serialize;

/// Where a datapoint answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Fetched from the site; the cache couldn't store it.
    Uncached,
    /// Fetched from the site and stored.
    Miss,
    /// Read from the cache.
    Hit,
}

/// When a cached answer was stored and until when the request that read it
/// treats it as fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStamp {
    pub stored_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheStamp {
    /// Age of the answer at `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> TimeDelta {
        now.signed_duration_since(self.stored_at)
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// The answer to [`SiteKitClient::get`](crate::SiteKitClient::get).
///
/// Serializes as `{ "cache": "hit", "storedAt": .., "expiresAt": .., "data": .. }`;
/// the timestamps are left out of uncached answers.
///
/// # Example
///
/// ```ignore
/// let response = client.get(DataRequest::module("analytics", "report")).await?;
///
/// if let Some(stamp) = response.stamp() {
///     println!("stored {} ago", stamp.age_at(Utc::now()));
/// }
/// ```
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Response<T> {
    pub cache: CacheStatus,
    #[serde(flatten)]
    stamp: Option<CacheStamp>,
    data: T,
}

impl<T> Response<T> {
    pub(crate) fn uncached(data: T) -> Self {
        Self {
            cache: CacheStatus::Uncached,
            stamp: None,
            data,
        }
    }

    pub(crate) fn stored(data: T, stamp: CacheStamp) -> Self {
        Self {
            cache: CacheStatus::Miss,
            stamp: Some(stamp),
            data,
        }
    }

    pub(crate) fn from_cache(data: T, stamp: CacheStamp) -> Self {
        Self {
            cache: CacheStatus::Hit,
            stamp: Some(stamp),
            data,
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cache == CacheStatus::Hit
    }

    /// Storage timestamps, unless the answer was never stored.
    pub fn stamp(&self) -> Option<CacheStamp> {
        self.stamp
    }

    pub fn cached_at(&self) -> Option<DateTime<Utc>> {
        self.stamp.map(|stamp| stamp.stored_at)
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.stamp.map(|stamp| stamp.expires_at)
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn into_inner(self) -> T {
        self.data
    }
}
