//! DuckDB SQL dialect.
//!
//! DuckDB is PostgreSQL-compatible with extensions:
//! - ANSI identifier quoting (`"`)
//! - `?` bind parameters
//! - LIST columns (`LIST_CONTAINS`, `LEN`)
//! - No row-value count-distinct, so tuple counts use a subquery

use super::helpers;
use super::SqlDialect;
use crate::metadata::TimeGrain;

/// DuckDB SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct DuckDb;

impl SqlDialect for DuckDb {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn truncate_time(&self, grain: TimeGrain, expr: &str) -> Option<String> {
        Some(helpers::truncate_time_date_trunc(grain, expr))
    }

    fn collection_contains(&self, expr: &str, value: &str) -> Option<String> {
        Some(format!("LIST_CONTAINS({}, {})", expr, value))
    }

    fn collection_is_empty(&self, expr: &str) -> Option<String> {
        Some(format!("COALESCE(LEN({}), 0) = 0", expr))
    }
}
