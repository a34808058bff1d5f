//! Result cache behavior as seen through the engine.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use quarry::error::ExecutionResult;
use quarry::hydrator::RowCursor;
use quarry::prelude::*;

/// Counts the main queries that reach the database.
struct CountingExecutor {
    inner: SqliteExecutor,
    queries: AtomicUsize,
}

impl CountingExecutor {
    fn new() -> Self {
        let inner = SqliteExecutor::new().open_in_memory("default").unwrap();
        inner
            .execute_batch(
                "default",
                "CREATE TABLE players (rating TEXT, score INTEGER);
                 INSERT INTO players VALUES ('A', 10), ('A', 30), ('B', 20);",
            )
            .unwrap();
        Self {
            inner,
            queries: AtomicUsize::new(0),
        }
    }

    fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueryExecutor for CountingExecutor {
    async fn query(
        &self,
        data_source: &str,
        statement: &SqlStatement,
    ) -> ExecutionResult<Box<dyn RowCursor>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(data_source, statement).await
    }

    async fn count(&self, data_source: &str, statement: &SqlStatement) -> ExecutionResult<u64> {
        self.inner.count(data_source, statement).await
    }
}

fn model() -> Arc<MetadataModel> {
    Arc::new(
        MetadataModel::new(vec![Table::new("players")
            .column(Column::metric("score", "{{$score}}", Aggregation::Max))
            .column(Column::dimension("rating", "{{$rating}}"))])
        .unwrap(),
    )
}

fn setup(cache: Arc<dyn QueryCache>) -> (Engine, Arc<CountingExecutor>) {
    let executor = Arc::new(CountingExecutor::new());
    let engine = Engine::new(model(), executor.clone())
        .with_data_source("default", Dialect::Sqlite)
        .with_cache(cache);
    (engine, executor)
}

fn by_rating() -> QueryBuilder {
    QueryBuilder::new("players")
        .select("rating")
        .select("score")
        .order_by("rating", SortDirection::Asc)
        .with_total()
}

#[tokio::test]
async fn test_second_run_is_served_from_memory_cache() {
    let cache = Arc::new(MemoryCache::new());
    let (engine, executor) = setup(cache.clone());
    let query = by_rating().build(engine.model()).unwrap();

    let first = engine.execute(&query).await.unwrap();
    let second = engine.execute(&query).await.unwrap();

    assert_eq!(executor.queries(), 1);
    assert_eq!(cache.len(), 1);
    assert_eq!(first, second);
    assert_eq!(second.page_total, Some(2));
}

#[tokio::test]
async fn test_bypass_skips_lookup_and_store() {
    let cache = Arc::new(MemoryCache::new());
    let (engine, executor) = setup(cache.clone());
    let query = by_rating().bypass_cache().build(engine.model()).unwrap();

    engine.execute(&query).await.unwrap();
    engine.execute(&query).await.unwrap();

    assert_eq!(executor.queries(), 2);
    assert!(cache.is_empty());
}

#[test]
fn test_bypass_does_not_change_the_key() {
    let m = model();
    let cached = by_rating().build(&m).unwrap();
    let bypassed = by_rating().bypass_cache().build(&m).unwrap();
    assert_eq!(
        CacheKey::new(&cached, Dialect::Sqlite).unwrap(),
        CacheKey::new(&bypassed, Dialect::Sqlite).unwrap()
    );
    assert_ne!(
        CacheKey::new(&cached, Dialect::Sqlite).unwrap(),
        CacheKey::new(&cached, Dialect::Postgres).unwrap()
    );
}

#[tokio::test]
async fn test_different_queries_are_cached_separately() {
    let cache = Arc::new(MemoryCache::new());
    let (engine, executor) = setup(cache.clone());
    let all = by_rating().build(engine.model()).unwrap();
    let paged = by_rating().limit(1).build(engine.model()).unwrap();

    assert_eq!(engine.execute(&all).await.unwrap().rows.len(), 2);
    assert_eq!(engine.execute(&paged).await.unwrap().rows.len(), 1);
    assert_eq!(executor.queries(), 2);
    assert_eq!(cache.len(), 2);
}

#[tokio::test]
async fn test_sqlite_cache_backend() {
    let cache = Arc::new(SqliteCache::open_in_memory().unwrap());
    let (engine, executor) = setup(cache.clone());
    let query = by_rating().build(engine.model()).unwrap();

    let first = engine.execute(&query).await.unwrap();
    let second = engine.execute(&query).await.unwrap();

    assert_eq!(executor.queries(), 1);
    assert_eq!(first, second);
    assert_eq!(cache.stats().unwrap().entry_count, 1);
}
