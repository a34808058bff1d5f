//! SQLite executor.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tracing::debug;

use super::QueryExecutor;
use crate::error::{ExecutionError, ExecutionResult};
use crate::generator::{BoundValue, SqlStatement};
use crate::hydrator::{RawValue, RowCursor, VecCursor};

/// Executes statements on SQLite connections, one per named data source.
///
/// rusqlite is synchronous, so every statement runs on the blocking pool
/// while holding its connection's lock.
#[derive(Default, Clone)]
pub struct SqliteExecutor {
    sources: HashMap<String, Arc<Mutex<Connection>>>,
}

impl SqliteExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an open connection under `name`.
    pub fn with_connection(mut self, name: &str, conn: Connection) -> Self {
        self.sources
            .insert(name.to_string(), Arc::new(Mutex::new(conn)));
        self
    }

    /// Open the database file at `path` under `name`.
    pub fn open(self, name: &str, path: impl AsRef<Path>) -> ExecutionResult<Self> {
        Ok(self.with_connection(name, Connection::open(path)?))
    }

    /// Register a fresh in-memory database under `name`.
    pub fn open_in_memory(self, name: &str) -> ExecutionResult<Self> {
        Ok(self.with_connection(name, Connection::open_in_memory()?))
    }

    pub fn data_sources(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Run a batch of statements directly, e.g. to create and seed tables.
    pub fn execute_batch(&self, data_source: &str, sql: &str) -> ExecutionResult<()> {
        let conn = self.connection(data_source)?;
        let guard = conn
            .lock()
            .map_err(|_| ExecutionError::Poisoned(data_source.to_string()))?;
        guard.execute_batch(sql)?;
        Ok(())
    }

    fn connection(&self, data_source: &str) -> ExecutionResult<Arc<Mutex<Connection>>> {
        self.sources
            .get(data_source)
            .cloned()
            .ok_or_else(|| ExecutionError::UnknownDataSource(data_source.to_string()))
    }

    async fn run<T, F>(&self, data_source: &str, statement: &SqlStatement, f: F) -> ExecutionResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, &str, Vec<SqlValue>) -> ExecutionResult<T> + Send + 'static,
    {
        let conn = self.connection(data_source)?;
        let name = data_source.to_string();
        let sql = statement.sql.clone();
        let params: Vec<SqlValue> = statement.params.iter().map(to_sql_value).collect();

        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| ExecutionError::Poisoned(name))?;
            f(&guard, &sql, params)
        })
        .await?
    }
}

#[async_trait]
impl QueryExecutor for SqliteExecutor {
    async fn query(
        &self,
        data_source: &str,
        statement: &SqlStatement,
    ) -> ExecutionResult<Box<dyn RowCursor>> {
        let cursor = self
            .run(data_source, statement, |conn, sql, params| {
                let mut stmt = conn.prepare(sql)?;
                let columns: Vec<String> =
                    stmt.column_names().iter().map(|c| c.to_string()).collect();
                let width = columns.len();
                let mut rows = stmt.query(params_from_iter(params))?;
                let mut fetched = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut cells = Vec::with_capacity(width);
                    for i in 0..width {
                        cells.push(to_raw(row.get_ref(i)?));
                    }
                    fetched.push(cells);
                }
                Ok(VecCursor::new(columns, fetched))
            })
            .await?;
        debug!(data_source, rows = cursor.len(), "fetched rows");
        Ok(Box::new(cursor))
    }

    async fn count(&self, data_source: &str, statement: &SqlStatement) -> ExecutionResult<u64> {
        self.run(data_source, statement, |conn, sql, params| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query(params_from_iter(params))?;
            let row = rows.next()?.ok_or(ExecutionError::EmptyCount)?;
            let total: i64 = row.get(0)?;
            Ok(total.max(0) as u64)
        })
        .await
    }
}

fn to_sql_value(value: &BoundValue) -> SqlValue {
    match value {
        BoundValue::Null => SqlValue::Null,
        BoundValue::Bool(b) => SqlValue::Integer(i64::from(*b)),
        BoundValue::Int(i) => SqlValue::Integer(*i),
        BoundValue::Float(f) => SqlValue::Real(*f),
        BoundValue::Text(s) => SqlValue::Text(s.clone()),
    }
}

fn to_raw(value: ValueRef<'_>) -> RawValue {
    match value {
        ValueRef::Null => RawValue::Null,
        ValueRef::Integer(i) => RawValue::Integer(i),
        ValueRef::Real(f) => RawValue::Real(f),
        ValueRef::Text(t) => RawValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => RawValue::Blob(b.to_vec()),
    }
}
