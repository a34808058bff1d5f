//! Query result caching.
//!
//! Results are keyed by a [`CacheKey`], the SHA-256 of the serialized query
//! and dialect. Two backends are provided:
//!
//! - [`MemoryCache`]: a concurrent map, lost on exit
//! - [`SqliteCache`]: a key-value table in a SQLite file, versioned and
//!   cleared automatically when the stored format changes
//!
//! Entries never expire. A cache is a shared resource: concurrent writers
//! of the same key race and the last one wins.

mod hash;
mod sqlite;

pub use hash::{compute_hash, short_hash};
pub use sqlite::SqliteCache;

use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::engine::QueryResult;
use crate::query::Query;
use crate::sql::Dialect;

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cache connection poisoned")]
    Poisoned,
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Identity of a compiled query's result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Hash `query` for `dialect`. Whether the query bypasses the cache is
    /// not part of the key.
    pub fn new(query: &Query, dialect: Dialect) -> CacheResult<Self> {
        Ok(Self(compute_hash(&(query, dialect))?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Storage for query results.
pub trait QueryCache: Send + Sync {
    fn get(&self, key: &CacheKey) -> CacheResult<Option<QueryResult>>;

    fn put(&self, key: &CacheKey, result: &QueryResult) -> CacheResult<()>;
}

/// Entry counts reported by a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_size_bytes: usize,
}

/// In-process cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<CacheKey, QueryResult>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl QueryCache for MemoryCache {
    fn get(&self, key: &CacheKey) -> CacheResult<Option<QueryResult>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    fn put(&self, key: &CacheKey, result: &QueryResult) -> CacheResult<()> {
        self.entries.insert(key.clone(), result.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrator::{ResultRow, Value};
    use crate::metadata::{Aggregation, Column, MetadataModel, Table};
    use crate::query::QueryBuilder;

    fn model() -> MetadataModel {
        MetadataModel::new(vec![Table::new("players")
            .column(Column::metric("score", "{{$score}}", Aggregation::Max))
            .column(Column::dimension("rating", "{{$rating}}"))])
        .unwrap()
    }

    pub(super) fn sample_result() -> QueryResult {
        let mut values = indexmap::IndexMap::new();
        values.insert("rating".to_string(), Value::Text("A".into()));
        values.insert("score".to_string(), Value::Decimal(9.5));
        QueryResult {
            rows: vec![ResultRow { id: 0, values }],
            page_total: Some(1),
        }
    }

    #[test]
    fn test_key_ignores_bypass_flag() {
        let m = model();
        let a = QueryBuilder::new("players").select("rating").build(&m).unwrap();
        let b = QueryBuilder::new("players")
            .select("rating")
            .bypass_cache()
            .build(&m)
            .unwrap();
        assert_eq!(
            CacheKey::new(&a, Dialect::DuckDb).unwrap(),
            CacheKey::new(&b, Dialect::DuckDb).unwrap()
        );
    }

    #[test]
    fn test_key_depends_on_query_and_dialect() {
        let m = model();
        let a = QueryBuilder::new("players").select("rating").build(&m).unwrap();
        let b = QueryBuilder::new("players")
            .select("rating")
            .select("score")
            .build(&m)
            .unwrap();
        let key = CacheKey::new(&a, Dialect::DuckDb).unwrap();
        assert_eq!(key.as_str().len(), 64);
        assert_ne!(key, CacheKey::new(&b, Dialect::DuckDb).unwrap());
        assert_ne!(key, CacheKey::new(&a, Dialect::Postgres).unwrap());
    }

    #[test]
    fn test_memory_cache_roundtrip() {
        let cache = MemoryCache::new();
        let m = model();
        let q = QueryBuilder::new("players").select("rating").build(&m).unwrap();
        let key = CacheKey::new(&q, Dialect::Sqlite).unwrap();

        assert!(cache.get(&key).unwrap().is_none());
        cache.put(&key, &sample_result()).unwrap();
        assert_eq!(cache.get(&key).unwrap(), Some(sample_result()));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }
}
