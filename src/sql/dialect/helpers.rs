//! Shared helper functions for SQL dialect implementations.
//!
//! This module provides reusable building blocks that dialects can compose
//! to implement the `SqlDialect` trait with minimal duplication.

use super::super::token::{Token, TokenStream};
use crate::metadata::TimeGrain;

// =============================================================================
// Identifier Quoting
// =============================================================================

/// Quote identifier with double quotes (ANSI style).
/// Used by: Postgres, DuckDB, Snowflake, SQLite
pub fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote identifier with backticks.
/// Used by: MySQL
pub fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Quote identifier with square brackets.
/// Used by: T-SQL (SQL Server, Azure SQL)
pub fn quote_bracket(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

// =============================================================================
// String Quoting
// =============================================================================

/// Quote string with single quotes (standard SQL).
pub fn quote_string_single(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Quote string with N prefix for Unicode (T-SQL).
pub fn quote_string_unicode(s: &str) -> String {
    format!("N'{}'", s.replace('\'', "''"))
}

// =============================================================================
// Boolean Formatting
// =============================================================================

/// Format boolean as literal true/false.
/// Used by: Postgres, DuckDB, Snowflake
pub fn format_bool_literal(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

/// Format boolean as numeric 1/0.
/// Used by: T-SQL, MySQL, SQLite
pub fn format_bool_numeric(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

// =============================================================================
// Bind Parameters
// =============================================================================

/// Anonymous `?` placeholder.
pub fn placeholder_question(_index: usize) -> String {
    "?".into()
}

/// Numbered `$n` placeholder (Postgres).
pub fn placeholder_dollar(index: usize) -> String {
    format!("${}", index)
}

/// Named `@pn` placeholder (T-SQL).
pub fn placeholder_at(index: usize) -> String {
    format!("@p{}", index)
}

// =============================================================================
// Pagination
// =============================================================================

/// Emit LIMIT ... OFFSET ... (standard SQL).
/// Used by: Postgres, DuckDB, Snowflake, SQLite
pub fn emit_limit_offset_standard(limit: Option<u64>, offset: Option<u64>) -> TokenStream {
    let mut ts = TokenStream::new();

    if let Some(lim) = limit {
        ts.push(Token::Limit)
            .space()
            .push(Token::LitInt(lim as i64));
    }

    if let Some(off) = offset {
        if limit.is_some() {
            ts.space();
        }
        ts.push(Token::Offset)
            .space()
            .push(Token::LitInt(off as i64));
    }

    ts
}

/// MySQL cannot express OFFSET without LIMIT, so a bare offset gets the
/// largest row count MySQL accepts.
pub fn emit_limit_offset_mysql(limit: Option<u64>, offset: Option<u64>) -> TokenStream {
    match (limit, offset) {
        (None, Some(off)) => {
            let mut ts = TokenStream::new();
            ts.push(Token::Limit)
                .space()
                .push(Token::Raw(u64::MAX.to_string()))
                .space()
                .push(Token::Offset)
                .space()
                .push(Token::LitInt(off as i64));
            ts
        }
        _ => emit_limit_offset_standard(limit, offset),
    }
}

/// Emit OFFSET ... ROWS FETCH NEXT ... ROWS ONLY (T-SQL style).
/// Note: Requires ORDER BY clause in T-SQL
pub fn emit_limit_offset_tsql(limit: Option<u64>, offset: Option<u64>) -> TokenStream {
    let mut ts = TokenStream::new();

    let off = offset.unwrap_or(0);
    ts.push(Token::Offset)
        .space()
        .push(Token::LitInt(off as i64))
        .space()
        .push(Token::Rows);

    if let Some(lim) = limit {
        ts.space()
            .push(Token::Fetch)
            .space()
            .push(Token::Next)
            .space()
            .push(Token::LitInt(lim as i64))
            .space()
            .push(Token::Rows)
            .space()
            .push(Token::Only);
    }

    ts
}

// =============================================================================
// Time Truncation
// =============================================================================

/// `DATE_TRUNC('unit', expr)` family shared by Postgres and DuckDB.
///
/// Sunday-start weeks shift forward a day, truncate, and shift back.
pub fn truncate_time_date_trunc(grain: TimeGrain, expr: &str) -> String {
    match grain {
        TimeGrain::IsoWeek => format!("DATE_TRUNC('week', {})", expr),
        TimeGrain::Week => format!(
            "DATE_TRUNC('week', {} + INTERVAL '1 day') - INTERVAL '1 day'",
            expr
        ),
        other => format!("DATE_TRUNC('{}', {})", other.as_str(), expr),
    }
}

/// Snowflake has `DATE_TRUNC` but shifts weeks with `DATEADD`.
pub fn truncate_time_snowflake(grain: TimeGrain, expr: &str) -> String {
    match grain {
        TimeGrain::IsoWeek => format!("DATE_TRUNC('week', {})", expr),
        TimeGrain::Week => format!(
            "DATEADD(day, -1, DATE_TRUNC('week', DATEADD(day, 1, {})))",
            expr
        ),
        other => format!("DATE_TRUNC('{}', {})", other.as_str(), expr),
    }
}

pub fn truncate_time_mysql(grain: TimeGrain, expr: &str) -> String {
    match grain {
        TimeGrain::Second => format!("DATE_FORMAT({}, '%Y-%m-%d %H:%i:%s')", expr),
        TimeGrain::Minute => format!("DATE_FORMAT({}, '%Y-%m-%d %H:%i:00')", expr),
        TimeGrain::Hour => format!("DATE_FORMAT({}, '%Y-%m-%d %H:00:00')", expr),
        TimeGrain::Day => format!("DATE({})", expr),
        TimeGrain::IsoWeek => format!("DATE_SUB(DATE({0}), INTERVAL WEEKDAY({0}) DAY)", expr),
        TimeGrain::Week => format!(
            "DATE_SUB(DATE({0}), INTERVAL DAYOFWEEK({0}) - 1 DAY)",
            expr
        ),
        TimeGrain::Month => format!("DATE_FORMAT({}, '%Y-%m-01')", expr),
        TimeGrain::Quarter => format!(
            "MAKEDATE(YEAR({0}), 1) + INTERVAL QUARTER({0}) - 1 QUARTER",
            expr
        ),
        TimeGrain::Year => format!("DATE_FORMAT({}, '%Y-01-01')", expr),
    }
}

/// T-SQL has no DATE_TRUNC before 2022; second precision is not offered.
pub fn truncate_time_tsql(grain: TimeGrain, expr: &str) -> Option<String> {
    let sql = match grain {
        TimeGrain::Second => return None,
        TimeGrain::Minute => format!("DATEADD(MINUTE, DATEDIFF(MINUTE, 0, {}), 0)", expr),
        TimeGrain::Hour => format!("DATEADD(HOUR, DATEDIFF(HOUR, 0, {}), 0)", expr),
        TimeGrain::Day => format!("CAST({} AS DATE)", expr),
        // 1900-01-01 was a Monday, 1899-12-31 a Sunday.
        TimeGrain::IsoWeek => format!(
            "DATEADD(DAY, -(DATEDIFF(DAY, '19000101', {0}) % 7), CAST({0} AS DATE))",
            expr
        ),
        TimeGrain::Week => format!(
            "DATEADD(DAY, -(DATEDIFF(DAY, '18991231', {0}) % 7), CAST({0} AS DATE))",
            expr
        ),
        TimeGrain::Month => format!("DATEFROMPARTS(YEAR({0}), MONTH({0}), 1)", expr),
        TimeGrain::Quarter => format!(
            "DATEFROMPARTS(YEAR({0}), (DATEPART(QUARTER, {0}) - 1) * 3 + 1, 1)",
            expr
        ),
        TimeGrain::Year => format!("DATEFROMPARTS(YEAR({}), 1, 1)", expr),
    };
    Some(sql)
}

/// SQLite stores timestamps as text, so grains are `strftime` / `date` renderings.
pub fn truncate_time_sqlite(grain: TimeGrain, expr: &str) -> String {
    match grain {
        TimeGrain::Second => format!("strftime('%Y-%m-%d %H:%M:%S', {})", expr),
        TimeGrain::Minute => format!("strftime('%Y-%m-%d %H:%M:00', {})", expr),
        TimeGrain::Hour => format!("strftime('%Y-%m-%d %H:00:00', {})", expr),
        TimeGrain::Day => format!("date({})", expr),
        TimeGrain::IsoWeek => format!("date({}, 'weekday 0', '-6 days')", expr),
        TimeGrain::Week => format!("date({}, '+1 day', 'weekday 0', '-7 days')", expr),
        TimeGrain::Month => format!("strftime('%Y-%m-01', {})", expr),
        TimeGrain::Quarter => format!(
            "printf('%04d-%02d-01', CAST(strftime('%Y', {0}) AS INTEGER), ((CAST(strftime('%m', {0}) AS INTEGER) - 1) / 3) * 3 + 1)",
            expr
        ),
        TimeGrain::Year => format!("strftime('%Y-01-01', {})", expr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::dialect::Dialect;

    #[test]
    fn test_limit_offset_standard() {
        let ts = emit_limit_offset_standard(Some(10), Some(20));
        assert_eq!(ts.serialize(Dialect::Postgres), "LIMIT 10 OFFSET 20");
        let ts = emit_limit_offset_standard(None, Some(5));
        assert_eq!(ts.serialize(Dialect::Postgres), "OFFSET 5");
    }

    #[test]
    fn test_limit_offset_mysql_bare_offset() {
        let ts = emit_limit_offset_mysql(None, Some(5));
        assert_eq!(
            ts.serialize(Dialect::MySql),
            "LIMIT 18446744073709551615 OFFSET 5"
        );
    }

    #[test]
    fn test_limit_offset_tsql() {
        let ts = emit_limit_offset_tsql(Some(10), None);
        assert_eq!(
            ts.serialize(Dialect::TSql),
            "OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        );
    }

    #[test]
    fn test_date_trunc_family() {
        assert_eq!(
            truncate_time_date_trunc(TimeGrain::Month, "x"),
            "DATE_TRUNC('month', x)"
        );
        assert_eq!(
            truncate_time_date_trunc(TimeGrain::IsoWeek, "x"),
            "DATE_TRUNC('week', x)"
        );
    }

    #[test]
    fn test_tsql_second_unsupported() {
        assert!(truncate_time_tsql(TimeGrain::Second, "x").is_none());
        assert_eq!(
            truncate_time_tsql(TimeGrain::Day, "x").unwrap(),
            "CAST(x AS DATE)"
        );
    }
}
