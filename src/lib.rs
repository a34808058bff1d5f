//! # Quarry
//!
//! An analytic query compiler: requests against a metadata model of tables,
//! metrics and dimensions compile to multi-dialect SQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        MetadataModel (tables, columns, joins)            │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [query builder]
//! ┌─────────────────────────────────────────────────────────┐
//! │     Query (projections, filters, sorting, pagination)    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [resolver + filter classifier]
//! ┌─────────────────────────────────────────────────────────┐
//! │        SqlGenerator (single pass or nested, count)       │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [executor + hydrator]
//! ┌─────────────────────────────────────────────────────────┐
//! │                QueryResult (typed rows)                  │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use quarry::prelude::*;
//!
//! let model = MetadataModel::new(vec![Table::new("players")
//!     .column(Column::metric("score", "{{$score}}", Aggregation::Max))
//!     .column(Column::dimension("rating", "{{$rating}}"))])
//! .unwrap();
//!
//! let query = QueryBuilder::new("players")
//!     .select("rating")
//!     .select("score")
//!     .filter(FilterExpr::predicate("score", Operator::Gt, vec![100.into()]))
//!     .build(&model)
//!     .unwrap();
//!
//! let compiled = SqlGenerator::new(&model, Dialect::Postgres).compile(&query).unwrap();
//! assert!(compiled.main.sql.contains("HAVING MAX(\"players\".\"score\") > $1"));
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod execution;
pub mod filter;
pub mod generator;
pub mod hydrator;
pub mod metadata;
pub mod query;
pub mod resolver;
pub mod sql;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::cache::{CacheKey, MemoryCache, QueryCache, SqliteCache};
    pub use crate::engine::{Engine, QueryResult};
    pub use crate::error::{CompileError, CompileResult, EngineError, EngineResult};
    pub use crate::execution::{QueryExecutor, SqliteExecutor};
    pub use crate::generator::{BoundValue, CompiledQuery, SqlGenerator, SqlStatement};
    pub use crate::hydrator::{GrainValue, ResultHydrator, ResultRow, Value};
    pub use crate::metadata::{
        Aggregation, ArgumentDef, Column, Join, JoinKind, MetadataModel, Table, TimeGrain,
        ValueType,
    };
    pub use crate::query::{
        ColumnPath, FilterExpr, Operator, Query, QueryBuilder, QueryRequest, SortDirection,
    };
    pub use crate::sql::{Dialect, SqlDialect};
}

pub use error::{CompileError, EngineError};
pub use generator::SqlGenerator;
pub use metadata::MetadataModel;
pub use query::{Query, QueryBuilder};
pub use sql::Dialect;
