//! Serializable query requests, as read by the CLI.

use serde::{Deserialize, Serialize};

use super::filter::{ColumnPath, FilterExpr};
use super::{Pagination, Sort};
use crate::metadata::Arguments;

/// One requested projection. Deserializes from a bare path string or a
/// struct with an explicit alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ProjectionRepr")]
pub struct ProjectionRequest {
    pub column: ColumnPath,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProjectionRepr {
    Short(String),
    Full {
        column: ColumnPath,
        #[serde(default)]
        alias: Option<String>,
    },
}

impl TryFrom<ProjectionRepr> for ProjectionRequest {
    type Error = String;

    fn try_from(repr: ProjectionRepr) -> Result<Self, Self::Error> {
        match repr {
            ProjectionRepr::Short(s) => Ok(ProjectionRequest::new(s.parse()?)),
            ProjectionRepr::Full { column, alias } => Ok(ProjectionRequest { column, alias }),
        }
    }
}

impl ProjectionRequest {
    pub fn new(column: ColumnPath) -> Self {
        Self {
            column,
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: &str) -> Self {
        self.alias = Some(alias.into());
        self
    }
}

/// An unvalidated analytic request.
///
/// ```json
/// {
///   "table": "players",
///   "select": ["rating", "score", {"column": "played_at@month", "alias": "month"}],
///   "filter": {"predicate": {"column": "score", "op": "gt", "values": [100]}},
///   "order_by": [{"key": "score", "direction": "desc"}],
///   "pagination": {"limit": 10, "want_total": true}
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub table: String,
    #[serde(default)]
    pub table_arguments: Arguments,
    #[serde(default)]
    pub select: Vec<ProjectionRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterExpr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<FilterExpr>,
    #[serde(default)]
    pub order_by: Vec<Sort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pagination: Option<Pagination>,
    #[serde(default)]
    pub bypass_cache: bool,
}

impl QueryRequest {
    pub fn from_json(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }
}
