use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::canonical::CanonicalUrl;

const CACHE_SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS favicon_cache (
    page_url TEXT PRIMARY KEY,
    icons TEXT NOT NULL,
    stored_at INTEGER NOT NULL
);
";

/// The resolved favicon urls for one page: an ordered set holding at most one
/// meaningful entry. Empty means "looked, found nothing".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedIcons(Vec<String>);

impl ResolvedIcons {
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn single(url: impl Into<String>) -> Self {
        Self(vec![url.into()])
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<String> {
        self.0
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to create cache directory {path}: {source}")]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to open favicon cache at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("favicon cache query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("failed to encode icons for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("cached icons for {key} are corrupt: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("favicon cache lock poisoned")]
    Poisoned,
}

/// Durable page url -> resolved icons store.
///
/// `Ok(None)` from `get` is a miss; a stored empty [`ResolvedIcons`] is a hit.
/// Implementations must tolerate concurrent callers; last writer wins.
pub trait ResolutionCache: Send + Sync {
    fn get(&self, key: &CanonicalUrl) -> Result<Option<ResolvedIcons>, CacheError>;

    fn put(&self, key: &CanonicalUrl, icons: &ResolvedIcons) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub page_url: String,
    pub icons: ResolvedIcons,
    pub stored_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub empty_entries: usize,
}

pub struct SqliteResolutionCache {
    connection: Mutex<Connection>,
    db_path: PathBuf,
}

impl SqliteResolutionCache {
    pub fn open(db_path: &Path) -> Result<Self, CacheError> {
        ensure_db_parent(db_path)?;
        let connection = open_connection(db_path).map_err(|source| CacheError::Open {
            path: normalize_path(db_path),
            source,
        })?;
        Ok(Self {
            connection: Mutex::new(connection),
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn entry(&self, key: &CanonicalUrl) -> Result<Option<CacheEntry>, CacheError> {
        let connection = self.lock()?;
        let row = connection
            .query_row(
                "SELECT icons, stored_at FROM favicon_cache WHERE page_url = ?1",
                [key.as_str()],
                |row| {
                    let icons: String = row.get(0)?;
                    let stored_at: i64 = row.get(1)?;
                    Ok((icons, stored_at))
                },
            )
            .optional()?;
        let Some((icons, stored_at)) = row else {
            return Ok(None);
        };
        Ok(Some(CacheEntry {
            page_url: key.as_str().to_string(),
            icons: decode_icons(key, &icons)?,
            stored_at: u64::try_from(stored_at).unwrap_or_default(),
        }))
    }

    pub fn stats(&self) -> Result<CacheStats, CacheError> {
        let connection = self.lock()?;
        let entries = count_query(&connection, "SELECT COUNT(*) FROM favicon_cache")?;
        let empty_entries = count_query(
            &connection,
            "SELECT COUNT(*) FROM favicon_cache WHERE icons = '[]'",
        )?;
        Ok(CacheStats {
            entries,
            empty_entries,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.connection.lock().map_err(|_| CacheError::Poisoned)
    }
}

impl ResolutionCache for SqliteResolutionCache {
    fn get(&self, key: &CanonicalUrl) -> Result<Option<ResolvedIcons>, CacheError> {
        let connection = self.lock()?;
        let icons: Option<String> = connection
            .query_row(
                "SELECT icons FROM favicon_cache WHERE page_url = ?1",
                [key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        icons.map(|icons| decode_icons(key, &icons)).transpose()
    }

    fn put(&self, key: &CanonicalUrl, icons: &ResolvedIcons) -> Result<(), CacheError> {
        let encoded = serde_json::to_string(icons).map_err(|source| CacheError::Encode {
            key: key.as_str().to_string(),
            source,
        })?;
        let stored_at = i64::try_from(unix_timestamp()).unwrap_or(i64::MAX);
        let connection = self.lock()?;
        connection.execute(
            "INSERT INTO favicon_cache (page_url, icons, stored_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(page_url) DO UPDATE SET
               icons = excluded.icons,
               stored_at = excluded.stored_at",
            params![key.as_str(), encoded, stored_at],
        )?;
        Ok(())
    }
}

/// In-process store; nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryResolutionCache {
    entries: RwLock<HashMap<String, ResolvedIcons>>,
}

impl MemoryResolutionCache {
    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ResolutionCache for MemoryResolutionCache {
    fn get(&self, key: &CanonicalUrl) -> Result<Option<ResolvedIcons>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(key.as_str()).cloned())
    }

    fn put(&self, key: &CanonicalUrl, icons: &ResolvedIcons) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key.as_str().to_string(), icons.clone());
        Ok(())
    }
}

fn decode_icons(key: &CanonicalUrl, raw: &str) -> Result<ResolvedIcons, CacheError> {
    serde_json::from_str(raw).map_err(|source| CacheError::Corrupt {
        key: key.as_str().to_string(),
        source,
    })
}

fn open_connection(db_path: &Path) -> Result<Connection, rusqlite::Error> {
    let connection = Connection::open(db_path)?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
        row.get::<_, String>(0)
    })?;
    connection.execute_batch(CACHE_SCHEMA_SQL)?;
    Ok(connection)
}

fn ensure_db_parent(db_path: &Path) -> Result<(), CacheError> {
    let Some(parent) = db_path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(parent).map_err(|source| CacheError::CreateDir {
        path: normalize_path(parent),
        source,
    })
}

fn count_query(connection: &Connection, sql: &str) -> Result<usize, CacheError> {
    let count: i64 = connection.query_row(sql, [], |row| row.get(0))?;
    Ok(usize::try_from(count).unwrap_or_default())
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}
