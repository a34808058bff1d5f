//! Query execution engine.
//!
//! The [`Engine`] ties the pieces together: it compiles a [`Query`] for the
//! dialect of the data source its table lives in, consults the cache, runs
//! the main and count statements concurrently, and hydrates the rows.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::{CacheKey, MemoryCache, QueryCache, SqliteCache};
use crate::config::{CacheBackend, Settings};
use crate::error::{CompileResult, EngineResult};
use crate::execution::{QueryExecutor, SqliteExecutor};
use crate::generator::{CompiledQuery, SqlGenerator};
use crate::hydrator::{ResultHydrator, ResultRow};
use crate::metadata::MetadataModel;
use crate::query::Query;
use crate::sql::Dialect;

/// Rows of one query plus the unpaginated row count, when requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<ResultRow>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_total: Option<u64>,
}

/// Compiles, executes and caches queries against one metadata model.
pub struct Engine {
    model: Arc<MetadataModel>,
    executor: Arc<dyn QueryExecutor>,
    cache: Option<Arc<dyn QueryCache>>,
    default_dialect: Dialect,
    dialects: HashMap<String, Dialect>,
}

impl Engine {
    pub fn new(model: Arc<MetadataModel>, executor: Arc<dyn QueryExecutor>) -> Self {
        Self {
            model,
            executor,
            cache: None,
            default_dialect: Dialect::default(),
            dialects: HashMap::new(),
        }
    }

    /// Build an engine from settings: SQLite data sources with a path are
    /// opened, and the configured cache backend is attached.
    pub fn from_settings(model: Arc<MetadataModel>, settings: &Settings) -> EngineResult<Self> {
        let mut executor = SqliteExecutor::new();
        let mut dialects = HashMap::new();
        for (name, source) in &settings.data_sources {
            let dialect = settings.dialect_for(name);
            dialects.insert(name.clone(), dialect);
            if dialect == Dialect::Sqlite {
                if let Some(path) = source.resolved_path()? {
                    executor = executor.open(name, path)?;
                }
            }
        }

        let mut engine = Self::new(model, Arc::new(executor));
        engine.default_dialect = settings.compiler.default_dialect;
        engine.dialects = dialects;

        if settings.cache.enabled {
            let cache: Arc<dyn QueryCache> = match settings.cache.backend {
                CacheBackend::Memory => Arc::new(MemoryCache::new()),
                CacheBackend::Sqlite => Arc::new(SqliteCache::open(settings.cache.resolved_path()?)?),
            };
            engine.cache = Some(cache);
        }
        Ok(engine)
    }

    pub fn with_cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Dialect for data sources without their own.
    pub fn with_default_dialect(mut self, dialect: Dialect) -> Self {
        self.default_dialect = dialect;
        self
    }

    pub fn with_data_source(mut self, name: &str, dialect: Dialect) -> Self {
        self.dialects.insert(name.to_string(), dialect);
        self
    }

    pub fn model(&self) -> &MetadataModel {
        &self.model
    }

    pub fn dialect_for(&self, data_source: &str) -> Dialect {
        self.dialects
            .get(data_source)
            .copied()
            .unwrap_or(self.default_dialect)
    }

    /// Compile `query` for the dialect of its table's data source.
    pub fn compile(&self, query: &Query) -> CompileResult<CompiledQuery> {
        let table = self.model.require_table(query.table())?;
        let dialect = self.dialect_for(&table.data_source);
        SqlGenerator::new(&self.model, dialect).compile(query)
    }

    /// Compile, execute and hydrate `query`, going through the cache unless
    /// the query bypasses it.
    pub async fn execute(&self, query: &Query) -> EngineResult<QueryResult> {
        let started = Instant::now();
        let compiled = self.compile(query)?;

        let cache = if query.bypass_cache() {
            None
        } else {
            self.cache.as_ref()
        };
        let key = match cache {
            Some(_) => match CacheKey::new(query, compiled.dialect) {
                Ok(key) => Some(key),
                Err(e) => {
                    warn!(error = %e, "failed to compute cache key");
                    None
                }
            },
            None => None,
        };

        if let (Some(cache), Some(key)) = (cache, &key) {
            match cache.get(key) {
                Ok(Some(hit)) => {
                    debug!(key = %key, "cache hit");
                    return Ok(hit);
                }
                Ok(None) => debug!(key = %key, "cache miss"),
                Err(e) => warn!(key = %key, error = %e, "cache read failed"),
            }
        }

        let result = self.run(&compiled).await?;

        if let (Some(cache), Some(key)) = (cache, &key) {
            if let Err(e) = cache.put(key, &result) {
                warn!(key = %key, error = %e, "cache write failed");
            }
        }

        info!(
            table = query.table(),
            data_source = %compiled.data_source,
            rows = result.rows.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "executed query"
        );
        Ok(result)
    }

    /// Run the compiled statements and hydrate the rows.
    pub async fn run(&self, compiled: &CompiledQuery) -> EngineResult<QueryResult> {
        let source = compiled.data_source.as_str();
        let main = self.executor.query(source, &compiled.main);
        let total = async {
            match &compiled.count {
                Some(count) => self.executor.count(source, count).await.map(Some),
                None => Ok(None),
            }
        };
        let (cursor, page_total) = futures::try_join!(main, total)?;

        let rows = ResultHydrator::new(cursor, compiled).collect()?;
        Ok(QueryResult { rows, page_total })
    }
}
