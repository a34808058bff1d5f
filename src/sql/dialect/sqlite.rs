//! SQLite SQL dialect.
//!
//! SQLite differences:
//! - ANSI identifier quoting (`"`)
//! - No boolean type, 1/0
//! - Timestamps are text, so grains render with `strftime` / `date`
//! - No tuple count-distinct

use super::helpers;
use super::SqlDialect;
use crate::metadata::TimeGrain;

/// SQLite SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Sqlite;

impl SqlDialect for Sqlite {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn truncate_time(&self, grain: TimeGrain, expr: &str) -> Option<String> {
        Some(helpers::truncate_time_sqlite(grain, expr))
    }
}
