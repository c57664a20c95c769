//! SQLite-backed persistent cache implementation.

use std::path::Path;
use std::time::Duration;

use async_sqlite::Client;
use async_sqlite::ClientBuilder;
use async_sqlite::JournalMode;
use async_sqlite::rusqlite;
use async_trait::async_trait;
use chrono::TimeDelta;
use chrono::TimeZone;
use chrono::Utc;

use super::CacheProvider;
use super::CachedValue;

/// A persistent cache backed by SQLite.
///
/// Plays the role browser local storage plays for the dashboard: entries
/// survive process restarts. Uses WAL journal mode for better concurrent
/// read performance.
///
/// # Example
///
/// ```ignore
/// use sitekit_data::cache::SqliteCache;
///
/// let cache = SqliteCache::open("sitekit-cache.db").await?;
/// ```
pub struct SqliteCache {
    client: Client,
}

impl SqliteCache {
    /// Opens a SQLite cache at the specified path.
    ///
    /// Creates the database file and cache table if they don't exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, async_sqlite::Error> {
        let client = ClientBuilder::new()
            .path(path)
            .journal_mode(JournalMode::Wal)
            .open()
            .await?;

        Self::init_schema(&client).await?;

        Ok(Self { client })
    }

    /// Opens an in-memory SQLite cache.
    pub async fn open_in_memory() -> Result<Self, async_sqlite::Error> {
        let client = ClientBuilder::new().path(":memory:").open().await?;

        Self::init_schema(&client).await?;

        Ok(Self { client })
    }

    async fn init_schema(client: &Client) -> Result<(), async_sqlite::Error> {
        client
            .conn(|conn| {
                conn.execute(
                    "CREATE TABLE IF NOT EXISTS cache (
                        key TEXT PRIMARY KEY,
                        data BLOB NOT NULL,
                        stored_at INTEGER NOT NULL
                    )",
                    [],
                )?;
                conn.execute(
                    "CREATE INDEX IF NOT EXISTS idx_cache_stored_at ON cache(stored_at)",
                    [],
                )?;
                Ok(())
            })
            .await
    }

    /// Returns the number of entries in the cache, however old.
    pub async fn len(&self) -> Result<usize, async_sqlite::Error> {
        self.client
            .conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get::<_, i64>(0))
                    .map(|count| count as usize)
            })
            .await
    }

    /// Returns `true` if the cache is empty.
    pub async fn is_empty(&self) -> Result<bool, async_sqlite::Error> {
        self.len().await.map(|len| len == 0)
    }
}

#[async_trait]
impl CacheProvider for SqliteCache {
    async fn get(&self, key: &str) -> Option<CachedValue> {
        let key = key.to_string();

        let result = self
            .client
            .conn(move |conn| {
                conn.query_row(
                    "SELECT data, stored_at FROM cache WHERE key = ?",
                    rusqlite::params![key],
                    |row| {
                        let data: Vec<u8> = row.get(0)?;
                        let stored_at: i64 = row.get(1)?;
                        Ok((data, stored_at))
                    },
                )
            })
            .await;

        match result {
            Ok((data, stored_at)) => {
                let stored_at = Utc.timestamp_millis_opt(stored_at).single()?;
                Some(CachedValue::new(data, stored_at))
            }
            Err(_) => None,
        }
    }

    async fn set(&self, key: &str, value: CachedValue) {
        let key = key.to_string();
        let data = value.data;
        let stored_at = value.stored_at.timestamp_millis();

        let result = self
            .client
            .conn(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO cache (key, data, stored_at) VALUES (?, ?, ?)",
                    rusqlite::params![key, data, stored_at],
                )
            })
            .await;

        if let Err(e) = result {
            log::warn!("Failed to write cache entry: {}", e);
        }
    }

    async fn remove(&self, key: &str) {
        let key = key.to_string();

        let result = self
            .client
            .conn(move |conn| conn.execute("DELETE FROM cache WHERE key = ?", [key]))
            .await;

        if let Err(e) = result {
            log::warn!("Failed to remove cache entry: {}", e);
        }
    }

    async fn remove_prefix(&self, prefix: &str) -> usize {
        let prefix = prefix.to_string();

        let result = self
            .client
            .conn(move |conn| {
                conn.execute(
                    "DELETE FROM cache WHERE substr(key, 1, length(?1)) = ?1",
                    [prefix],
                )
            })
            .await;

        result.unwrap_or_else(|e| {
            log::warn!("Failed to invalidate cache group: {}", e);
            0
        })
    }

    async fn clear(&self) {
        let result = self
            .client
            .conn(|conn| conn.execute("DELETE FROM cache", []))
            .await;

        if let Err(e) = result {
            log::warn!("Failed to clear cache: {}", e);
        }
    }

    async fn gc(&self, older_than: Duration) -> usize {
        let Some(cutoff) = TimeDelta::from_std(older_than)
            .ok()
            .and_then(|older_than| Utc::now().checked_sub_signed(older_than))
        else {
            return 0;
        };
        let cutoff = cutoff.timestamp_millis();

        let result = self
            .client
            .conn(move |conn| conn.execute("DELETE FROM cache WHERE stored_at < ?", [cutoff]))
            .await;

        result.unwrap_or_else(|e| {
            log::warn!("Failed to collect expired cache entries: {}", e);
            0
        })
    }
}
