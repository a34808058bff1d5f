//! Compiler output types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::metadata::{TimeGrain, ValueType};
use crate::query::{ColumnRole, FilterValue};
use crate::sql::Dialect;

/// A positional bind parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BoundValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<&FilterValue> for BoundValue {
    fn from(value: &FilterValue) -> Self {
        match value {
            FilterValue::Null => BoundValue::Null,
            FilterValue::Bool(b) => BoundValue::Bool(*b),
            FilterValue::Int(i) => BoundValue::Int(*i),
            FilterValue::Float(f) => BoundValue::Float(*f),
            FilterValue::Text(s) => BoundValue::Text(s.clone()),
        }
    }
}

impl fmt::Display for BoundValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundValue::Null => f.write_str("NULL"),
            BoundValue::Bool(b) => write!(f, "{}", b),
            BoundValue::Int(i) => write!(f, "{}", i),
            BoundValue::Float(x) => write!(f, "{}", x),
            BoundValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// SQL text plus its parameters, in placeholder order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<BoundValue>,
}

/// How one result column maps back to a projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputColumn {
    /// Projection alias, used as the key of hydrated rows.
    pub alias: String,
    /// Column label in the SQL result, possibly shortened for the dialect.
    pub sql_alias: String,
    pub role: ColumnRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grain: Option<TimeGrain>,
    pub value_type: ValueType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
}

/// Everything needed to execute a query and hydrate its rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub main: SqlStatement,
    /// Total-row count for pagination, when requested and meaningful.
    pub count: Option<SqlStatement>,
    /// Whether the main statement is a two-pass aggregation.
    pub nested: bool,
    pub dialect: Dialect,
    pub data_source: String,
    pub columns: Vec<OutputColumn>,
}
