//! PostgreSQL SQL dialect.
//!
//! PostgreSQL features:
//! - ANSI identifier quoting (`"`)
//! - Numbered `$n` bind parameters
//! - Row-value `COUNT(DISTINCT (a, b))`
//! - `DATE_TRUNC` for time grains
//! - Array columns (`= ANY`, `CARDINALITY`)
//! - 63-byte identifier limit (NAMEDATALEN - 1)

use super::helpers;
use super::{CountDistinctTuple, SqlDialect};
use crate::metadata::TimeGrain;

/// PostgreSQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn placeholder(&self, index: usize) -> String {
        helpers::placeholder_dollar(index)
    }

    fn max_identifier_length(&self) -> Option<usize> {
        Some(63)
    }

    fn count_distinct_tuple(&self) -> CountDistinctTuple {
        CountDistinctTuple::Parenthesized
    }

    fn truncate_time(&self, grain: TimeGrain, expr: &str) -> Option<String> {
        Some(helpers::truncate_time_date_trunc(grain, expr))
    }

    fn collection_contains(&self, expr: &str, value: &str) -> Option<String> {
        Some(format!("{} = ANY({})", value, expr))
    }

    fn collection_is_empty(&self, expr: &str) -> Option<String> {
        Some(format!("COALESCE(CARDINALITY({}), 0) = 0", expr))
    }
}
