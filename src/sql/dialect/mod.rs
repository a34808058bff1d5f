//! SQL Dialect definitions and formatting rules.
//!
//! This module provides a trait-based abstraction for SQL dialect differences.
//! Each dialect implements `SqlDialect` to handle its specific syntax:
//!
//! - Identifier quoting: `"` (PG/DuckDB/Snowflake/SQLite), `` ` `` (MySQL), `[]` (T-SQL)
//! - Bind placeholders: `?`, `$n` (Postgres), `@pn` (T-SQL)
//! - Pagination: LIMIT/OFFSET vs OFFSET FETCH
//! - COUNT(DISTINCT) over several columns: native tuple syntax or a subquery
//! - Time truncation per grain
//! - Identifier length limits
//!
//! # Usage
//!
//! ```ignore
//! use quarry::dialect::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::Postgres;
//! let quoted = dialect.quote_identifier("user");  // "user"
//! ```
//!
//! # Capability matrix
//!
//! | Feature | PostgreSQL | SQL Server | MySQL | DuckDB | Snowflake | SQLite |
//! |---------|-----------|------------|-------|--------|-----------|--------|
//! | Alias in ORDER BY | ✓ | ❌ | ✓ | ✓ | ❌ | ✓ |
//! | COUNT(DISTINCT a, b) | `(a, b)` | ❌ | `a, b` | ❌ | `a, b` | ❌ |
//! | Collection predicates | ✓ | ❌ | ❌ | ✓ | ❌ | ❌ |
//! | Identifier limit | 63 | 128 | 64 | - | 255 | - |
//!
//! `ORDER BY` falls back to the full expression where aliases are not
//! accepted, and tuple count-distinct falls back to a counted subquery.

mod duckdb;
pub mod helpers;
mod mysql;
mod postgres;
mod snowflake;
mod sqlite;
mod tsql;

pub use duckdb::DuckDb;
pub use mysql::MySql;
pub use postgres::Postgres;
pub use snowflake::Snowflake;
pub use sqlite::Sqlite;
pub use tsql::TSql;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::token::TokenStream;
use crate::metadata::TimeGrain;

/// How a dialect counts distinct tuples of several columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountDistinctTuple {
    /// `COUNT(DISTINCT (a, b))`
    Parenthesized,
    /// `COUNT(DISTINCT a, b)`
    ArgumentList,
    /// No native form; count rows of a grouped subquery instead.
    Subquery,
}

impl CountDistinctTuple {
    pub fn is_native(&self) -> bool {
        !matches!(self, CountDistinctTuple::Subquery)
    }
}

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// Implementations handle dialect-specific syntax differences.
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug + Send + Sync {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    ///
    /// - PostgreSQL/DuckDB/Snowflake/SQLite: `"identifier"`
    /// - MySQL: `` `identifier` ``
    /// - T-SQL: `[identifier]`
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    ///
    /// All dialects use single quotes with `''` for escaping.
    /// Override for Unicode prefix (T-SQL N'...').
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    /// Format a boolean literal.
    ///
    /// - PostgreSQL/DuckDB/Snowflake: `true`/`false`
    /// - MySQL/T-SQL/SQLite: `1`/`0`
    fn format_bool(&self, b: bool) -> &'static str;

    /// Bind-parameter placeholder for the 1-based position `index`.
    fn placeholder(&self, index: usize) -> String {
        helpers::placeholder_question(index)
    }

    // =========================================================================
    // Aliases
    // =========================================================================

    /// Whether `AS` precedes a table alias.
    fn use_as_before_table_alias(&self) -> bool {
        true
    }

    /// Whether ORDER BY may reference a select-list alias.
    fn use_alias_in_order_by(&self) -> bool {
        true
    }

    /// Longest identifier the database accepts, if limited.
    fn max_identifier_length(&self) -> Option<usize> {
        None
    }

    // =========================================================================
    // Aggregation
    // =========================================================================

    /// Syntax for counting distinct tuples of more than one column.
    fn count_distinct_tuple(&self) -> CountDistinctTuple {
        CountDistinctTuple::Subquery
    }

    // =========================================================================
    // Pagination
    // =========================================================================

    /// Emit LIMIT/OFFSET or equivalent pagination clause.
    ///
    /// - PostgreSQL/DuckDB/MySQL/Snowflake/SQLite: `LIMIT n OFFSET m` (default)
    /// - T-SQL: `OFFSET m ROWS FETCH NEXT n ROWS ONLY` (override)
    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_standard(limit, offset)
    }

    /// Whether this dialect requires ORDER BY for OFFSET/LIMIT.
    ///
    /// T-SQL requires ORDER BY when using OFFSET FETCH.
    fn requires_order_by_for_offset(&self) -> bool {
        false
    }

    // =========================================================================
    // Date/Time
    // =========================================================================

    /// Expression truncating `expr` to `grain`, or `None` when the dialect
    /// cannot express the grain.
    fn truncate_time(&self, grain: TimeGrain, expr: &str) -> Option<String>;

    // =========================================================================
    // Collections
    // =========================================================================

    /// Predicate that is true when the collection `expr` contains `value`.
    fn collection_contains(&self, expr: &str, value: &str) -> Option<String> {
        let _ = (expr, value);
        None
    }

    /// Predicate that is true when the collection `expr` is NULL or empty.
    fn collection_is_empty(&self, expr: &str) -> Option<String> {
        let _ = expr;
        None
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    DuckDb,
    TSql,
    MySql,
    Postgres,
    Snowflake,
    Sqlite,
}

impl Dialect {
    pub const ALL: [Dialect; 6] = [
        Dialect::DuckDb,
        Dialect::TSql,
        Dialect::MySql,
        Dialect::Postgres,
        Dialect::Snowflake,
        Dialect::Sqlite,
    ];

    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::DuckDb => &DuckDb,
            Dialect::Postgres => &Postgres,
            Dialect::TSql => &TSql,
            Dialect::MySql => &MySql,
            Dialect::Snowflake => &Snowflake,
            Dialect::Sqlite => &Sqlite,
        }
    }
}

// Implement SqlDialect for Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        self.dialect().format_bool(b)
    }

    fn placeholder(&self, index: usize) -> String {
        self.dialect().placeholder(index)
    }

    fn use_as_before_table_alias(&self) -> bool {
        self.dialect().use_as_before_table_alias()
    }

    fn use_alias_in_order_by(&self) -> bool {
        self.dialect().use_alias_in_order_by()
    }

    fn max_identifier_length(&self) -> Option<usize> {
        self.dialect().max_identifier_length()
    }

    fn count_distinct_tuple(&self) -> CountDistinctTuple {
        self.dialect().count_distinct_tuple()
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        self.dialect().emit_limit_offset(limit, offset)
    }

    fn requires_order_by_for_offset(&self) -> bool {
        self.dialect().requires_order_by_for_offset()
    }

    fn truncate_time(&self, grain: TimeGrain, expr: &str) -> Option<String> {
        self.dialect().truncate_time(grain, expr)
    }

    fn collection_contains(&self, expr: &str, value: &str) -> Option<String> {
        self.dialect().collection_contains(expr, value)
    }

    fn collection_is_empty(&self, expr: &str) -> Option<String> {
        self.dialect().collection_is_empty(expr)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "duckdb" => Ok(Dialect::DuckDb),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "tsql" | "mssql" | "sqlserver" => Ok(Dialect::TSql),
            "mysql" => Ok(Dialect::MySql),
            "snowflake" => Ok(Dialect::Snowflake),
            "sqlite" => Ok(Dialect::Sqlite),
            other => Err(format!("unknown dialect '{}'", other)),
        }
    }
}
