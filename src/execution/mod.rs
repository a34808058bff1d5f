//! Execution capability.
//!
//! The engine runs compiled statements through a [`QueryExecutor`]. Data
//! sources are addressed by name; each table of the metadata model names
//! the data source it lives in.

mod sqlite;

pub use sqlite::SqliteExecutor;

use async_trait::async_trait;

use crate::error::ExecutionResult;
use crate::generator::SqlStatement;
use crate::hydrator::RowCursor;

/// Runs SQL against named data sources.
///
/// # Example
///
/// ```ignore
/// async fn total(executor: &impl QueryExecutor, stmt: &SqlStatement) -> ExecutionResult<u64> {
///     executor.count("default", stmt).await
/// }
/// ```
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run a row-returning statement.
    async fn query(
        &self,
        data_source: &str,
        statement: &SqlStatement,
    ) -> ExecutionResult<Box<dyn RowCursor>>;

    /// Run a statement returning a single count in its first column.
    async fn count(&self, data_source: &str, statement: &SqlStatement) -> ExecutionResult<u64>;
}
