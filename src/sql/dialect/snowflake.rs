//! Snowflake SQL dialect.
//!
//! Snowflake features:
//! - ANSI identifier quoting (`"`)
//! - `COUNT(DISTINCT a, b)` over several arguments
//! - `DATE_TRUNC` plus `DATEADD` for Sunday weeks
//! - ORDER BY expressions do not see select aliases reliably

use super::helpers;
use super::{CountDistinctTuple, SqlDialect};
use crate::metadata::TimeGrain;

/// Snowflake SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Snowflake;

impl SqlDialect for Snowflake {
    fn name(&self) -> &'static str {
        "snowflake"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn use_alias_in_order_by(&self) -> bool {
        false
    }

    fn max_identifier_length(&self) -> Option<usize> {
        Some(255)
    }

    fn count_distinct_tuple(&self) -> CountDistinctTuple {
        CountDistinctTuple::ArgumentList
    }

    fn truncate_time(&self, grain: TimeGrain, expr: &str) -> Option<String> {
        Some(helpers::truncate_time_snowflake(grain, expr))
    }
}
