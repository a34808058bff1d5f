//! Tables and their join relationships.

use serde::{Deserialize, Serialize};

use super::column::{ArgumentDef, Column};

/// Where a table's rows come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableSource {
    /// A physical table or view.
    Physical {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        schema: Option<String>,
        table: String,
    },
    /// A derived table given as SQL text.
    Subquery { sql: String },
}

/// Join kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JoinKind {
    Inner,
    #[default]
    Left,
    Full,
    Cross,
}

/// A named, directed edge to another table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub name: String,
    /// Target table name.
    pub table: String,
    #[serde(default)]
    pub kind: JoinKind,
    /// ON condition in the template language, resolved in the parent
    /// context. Ignored for cross joins.
    #[serde(default)]
    pub on: String,
}

impl Join {
    pub fn new(name: &str, table: &str, kind: JoinKind, on: &str) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            kind,
            on: on.into(),
        }
    }
}

fn default_data_source() -> String {
    "default".into()
}

/// A named analytic source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub name: String,
    pub source: TableSource,
    /// Selects the connection and the dialect.
    #[serde(default = "default_data_source")]
    pub data_source: String,
    #[serde(default)]
    pub arguments: Vec<ArgumentDef>,
    #[serde(default)]
    pub columns: Vec<Column>,
    #[serde(default)]
    pub joins: Vec<Join>,
}

impl Table {
    /// A table reading the physical table of the same name.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            source: TableSource::Physical {
                schema: None,
                table: name.into(),
            },
            data_source: default_data_source(),
            arguments: Vec::new(),
            columns: Vec::new(),
            joins: Vec::new(),
        }
    }

    pub fn physical(mut self, schema: Option<&str>, table: &str) -> Self {
        self.source = TableSource::Physical {
            schema: schema.map(Into::into),
            table: table.into(),
        };
        self
    }

    pub fn subquery(mut self, sql: &str) -> Self {
        self.source = TableSource::Subquery { sql: sql.into() };
        self
    }

    pub fn data_source(mut self, name: &str) -> Self {
        self.data_source = name.into();
        self
    }

    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn argument(mut self, argument: ArgumentDef) -> Self {
        self.arguments.push(argument);
        self
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn get_join(&self, name: &str) -> Option<&Join> {
        self.joins.iter().find(|j| j.name == name)
    }

    /// Position of a join in declaration order.
    pub fn join_index(&self, name: &str) -> Option<usize> {
        self.joins.iter().position(|j| j.name == name)
    }

    pub fn get_argument(&self, name: &str) -> Option<&ArgumentDef> {
        self.arguments.iter().find(|a| a.name == name)
    }
}
