//! SQLite-backed result cache.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use super::{CacheError, CacheKey, CacheResult, CacheStats, QueryCache};
use crate::engine::QueryResult;

/// Current cache schema version. Bump this when the stored format changes.
const CACHE_VERSION: i32 = 1;

/// Results stored as JSON in a SQLite table.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Open or create the cache database at `path`.
    ///
    /// If the cache version doesn't match, it's automatically cleared.
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    /// Open an in-memory cache (for testing).
    pub fn open_in_memory() -> CacheResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> CacheResult<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS results (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            ",
        )?;

        let stored_version: Option<i32> = conn
            .query_row("SELECT value FROM meta WHERE key = 'version'", [], |row| {
                let s: String = row.get(0)?;
                Ok(s.parse().unwrap_or(0))
            })
            .optional()?;

        if stored_version != Some(CACHE_VERSION) {
            if stored_version.is_some() {
                conn.execute("DELETE FROM results", [])?;
            }
            conn.execute(
                "INSERT OR REPLACE INTO meta (key, value) VALUES ('version', ?)",
                params![CACHE_VERSION.to_string()],
            )?;
        }

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> CacheResult<T>) -> CacheResult<T> {
        let conn = self.conn.lock().map_err(|_| CacheError::Poisoned)?;
        f(&conn)
    }

    /// Delete one entry.
    pub fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        self.with_conn(|conn| {
            let rows = conn.execute("DELETE FROM results WHERE key = ?", params![key.as_str()])?;
            Ok(rows > 0)
        })
    }

    /// Clear all entries (but keep metadata).
    pub fn clear_all(&self) -> CacheResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM results", [])?;
            Ok(())
        })
    }

    pub fn stats(&self) -> CacheResult<CacheStats> {
        self.with_conn(|conn| {
            let entry_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM results", [], |row| row.get(0))?;
            let total_size: i64 = conn.query_row(
                "SELECT COALESCE(SUM(LENGTH(value)), 0) FROM results",
                [],
                |row| row.get(0),
            )?;
            Ok(CacheStats {
                entry_count: entry_count as usize,
                total_size_bytes: total_size as usize,
            })
        })
    }
}

impl QueryCache for SqliteCache {
    fn get(&self, key: &CacheKey) -> CacheResult<Option<QueryResult>> {
        let json: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM results WHERE key = ?",
                    params![key.as_str()],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        match json {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    fn put(&self, key: &CacheKey, result: &QueryResult) -> CacheResult<()> {
        let json = serde_json::to_string(result)?;
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO results (key, value) VALUES (?, ?)",
                params![key.as_str(), json],
            )?;
            Ok(())
        })
    }
}
