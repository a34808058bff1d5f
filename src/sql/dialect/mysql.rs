//! MySQL SQL dialect.
//!
//! MySQL differences from ANSI:
//! - Backtick identifier quoting (`` `name` ``)
//! - Boolean is TINYINT(1), returns 1/0
//! - `||` is logical OR by default (use CONCAT())
//! - `COUNT(DISTINCT a, b)` takes several arguments
//! - OFFSET is only valid after LIMIT
//! - No DATE_TRUNC; grains use DATE_FORMAT and date arithmetic

use super::helpers;
use super::{CountDistinctTuple, SqlDialect};
use crate::metadata::TimeGrain;
use crate::sql::token::TokenStream;

/// MySQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_numeric(b)
    }

    fn max_identifier_length(&self) -> Option<usize> {
        Some(64)
    }

    fn count_distinct_tuple(&self) -> CountDistinctTuple {
        CountDistinctTuple::ArgumentList
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_mysql(limit, offset)
    }

    fn truncate_time(&self, grain: TimeGrain, expr: &str) -> Option<String> {
        Some(helpers::truncate_time_mysql(grain, expr))
    }
}
