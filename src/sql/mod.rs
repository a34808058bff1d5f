//! SQL generation module.
//!
//! This module provides a type-safe SQL builder that generates multi-dialect SQL.
//! It includes:
//!
//! - [`query`] - SELECT statement builder
//! - [`expr`] - Expression AST and builder DSL
//! - [`token`] - Token types for SQL generation
//! - [`dialect`] - SQL dialect implementations

pub mod dialect;
pub mod expr;
pub mod query;
pub mod token;

#[doc(hidden)]
pub mod test_utils;

// Re-export commonly used types at the sql module level
pub use dialect::{CountDistinctTuple, Dialect, SqlDialect};
pub use expr::{
    and_all, avg, col, count, count_distinct, count_star, lower, max, min, or_all, raw_sql, sum,
    table_col, BinaryOperator, Expr, ExprExt, UnaryOperator,
};
pub use query::{
    Join, JoinType, LimitOffset, OrderByExpr, SelectExpr, SelectStatement, SortDir, TableRef,
    RelationSource,
};
pub use token::{Token, TokenStream};
