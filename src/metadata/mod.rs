//! Metadata model.
//!
//! The read-only graph of tables, columns, arguments and joins that every
//! compilation runs against. A [`MetadataModel`] is validated once when it is
//! built: names are checked for uniqueness, join targets must exist and every
//! column formula, grain formula and join condition is resolved with its
//! defaults so that broken templates and cycles surface at load time.
//!
//! # Example
//!
//! ```rust
//! use quarry::metadata::{Aggregation, Column, MetadataModel, Table};
//!
//! let model = MetadataModel::new(vec![Table::new("players")
//!     .column(Column::metric("score", "{{$score}}", Aggregation::Max))
//!     .column(Column::dimension("rating", "{{$rating}}"))])
//! .unwrap();
//! assert!(model.table("players").is_some());
//! ```

mod column;
mod grain;
mod table;

pub use column::{
    embeds_aggregate, Aggregation, ArgumentDef, Column, ColumnKind, GrainDef, NestBy, ValueType,
};
pub use grain::TimeGrain;
pub use table::{Join, JoinKind, Table, TableSource};

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Deserialize;
use tracing::debug;

use crate::error::{CompileError, CompileResult};
use crate::resolver::{ColumnResolver, Scope};

/// Argument values by name. Ordered so that signatures and cache keys are
/// deterministic.
pub type Arguments = BTreeMap<String, String>;

/// Default limit on nested formula expansion.
pub const DEFAULT_MAX_RESOLUTION_DEPTH: usize = 64;

#[derive(Debug, Deserialize)]
struct ModelFile {
    #[serde(default)]
    tables: Vec<Table>,
}

/// Validated, immutable metadata graph.
#[derive(Debug, Clone)]
pub struct MetadataModel {
    tables: Vec<Table>,
    index: HashMap<String, usize>,
    max_resolution_depth: usize,
}

impl MetadataModel {
    pub fn new(tables: Vec<Table>) -> CompileResult<Self> {
        Self::with_max_depth(tables, DEFAULT_MAX_RESOLUTION_DEPTH)
    }

    pub fn with_max_depth(mut tables: Vec<Table>, max_resolution_depth: usize) -> CompileResult<Self> {
        let mut index = HashMap::new();
        for (i, table) in tables.iter_mut().enumerate() {
            if index.insert(table.name.clone(), i).is_some() {
                return Err(CompileError::InvalidModel(format!(
                    "duplicate table '{}'",
                    table.name
                )));
            }
            for column in &mut table.columns {
                if column.formula.trim().is_empty() {
                    column.formula = format!("{{{{${}}}}}", column.name);
                }
            }
        }

        let model = Self {
            tables,
            index,
            max_resolution_depth,
        };
        for table in &model.tables {
            model.check_table(table)?;
        }
        model.resolve_all()?;

        debug!(tables = model.tables.len(), "metadata model validated");
        Ok(model)
    }

    /// Parse a model from TOML with a top-level `[[tables]]` array.
    pub fn from_toml_str(input: &str) -> CompileResult<Self> {
        Self::from_toml_str_with_depth(input, DEFAULT_MAX_RESOLUTION_DEPTH)
    }

    pub fn from_toml_str_with_depth(input: &str, max_resolution_depth: usize) -> CompileResult<Self> {
        let file: ModelFile =
            toml::from_str(input).map_err(|e| CompileError::InvalidModel(e.to_string()))?;
        Self::with_max_depth(file.tables, max_resolution_depth)
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.index.get(name).map(|&i| &self.tables[i])
    }

    /// Like [`table`](Self::table) but reports a missing table as an error.
    pub fn require_table(&self, name: &str) -> CompileResult<&Table> {
        self.table(name)
            .ok_or_else(|| CompileError::InvalidModel(format!("unknown table '{}'", name)))
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn max_resolution_depth(&self) -> usize {
        self.max_resolution_depth
    }

    fn check_table(&self, table: &Table) -> CompileResult<()> {
        let invalid = |msg: String| CompileError::InvalidModel(format!("table '{}': {}", table.name, msg));

        let mut columns = HashSet::new();
        for column in &table.columns {
            if !columns.insert(column.name.as_str()) {
                return Err(invalid(format!("duplicate column '{}'", column.name)));
            }
            let mut args = HashSet::new();
            for arg in &column.arguments {
                if !args.insert(arg.name.as_str()) {
                    return Err(invalid(format!(
                        "column '{}' declares argument '{}' twice",
                        column.name, arg.name
                    )));
                }
            }
            match &column.kind {
                ColumnKind::TimeDimension { grains } if grains.is_empty() => {
                    return Err(invalid(format!(
                        "time dimension '{}' declares no grains",
                        column.name
                    )));
                }
                ColumnKind::Metric { nest_by, .. } => {
                    for nest in nest_by {
                        self.check_nest_by(table, column, nest)?;
                    }
                }
                _ => {}
            }
        }

        let mut joins = HashSet::new();
        for join in &table.joins {
            if !joins.insert(join.name.as_str()) {
                return Err(invalid(format!("duplicate join '{}'", join.name)));
            }
            if columns.contains(join.name.as_str()) {
                return Err(invalid(format!(
                    "join '{}' has the same name as a column",
                    join.name
                )));
            }
            if self.table(&join.table).is_none() {
                return Err(invalid(format!(
                    "join '{}' targets unknown table '{}'",
                    join.name, join.table
                )));
            }
        }
        Ok(())
    }

    fn check_nest_by(&self, table: &Table, metric: &Column, nest: &NestBy) -> CompileResult<()> {
        let invalid = |msg: String| {
            CompileError::InvalidModel(format!(
                "metric '{}.{}' nest_by '{}': {}",
                table.name, metric.name, nest.column, msg
            ))
        };
        let column = table
            .get_column(&nest.column)
            .ok_or_else(|| invalid("unknown column".into()))?;
        if column.is_metric() {
            return Err(invalid("must be a dimension".into()));
        }
        match (nest.grain, column.is_time_dimension()) {
            (Some(g), true) if column.grain(g).is_none() => {
                Err(invalid(format!("grain '{}' is not declared", g)))
            }
            (Some(_), false) => Err(invalid("grain given for a non-time dimension".into())),
            _ => Ok(()),
        }
    }

    /// Resolve every column, grain and join condition with defaults only.
    fn resolve_all(&self) -> CompileResult<()> {
        let resolver = ColumnResolver::for_validation(self, self.max_resolution_depth);
        let none = Arguments::new();
        for table in &self.tables {
            let scope = Scope::new(table, &none);
            for column in &table.columns {
                resolver.resolve_column(&scope, &[], &column.name, &none, None)?;
                if let ColumnKind::TimeDimension { grains } = &column.kind {
                    for def in grains.iter().filter(|g| g.formula.is_some()) {
                        resolver.resolve_column(&scope, &[], &column.name, &none, Some(def.grain))?;
                    }
                }
            }
            for join in table.joins.iter().filter(|j| j.kind != JoinKind::Cross) {
                resolver.resolve_template(&scope, &[], &join.on, &format!("join:{}", join.name))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn players() -> Table {
        Table::new("players")
            .column(Column::metric("score", "{{$score}}", Aggregation::Max))
            .column(Column::dimension("rating", ""))
    }

    #[test]
    fn test_default_formula_filled_in() {
        let model = MetadataModel::new(vec![players()]).unwrap();
        let rating = model.table("players").unwrap().get_column("rating").unwrap();
        assert_eq!(rating.formula, "{{$rating}}");
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = MetadataModel::new(vec![players(), players()]).unwrap_err();
        assert!(matches!(err, CompileError::InvalidModel(_)));

        let err = MetadataModel::new(vec![players().column(Column::dimension("rating", ""))])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate column"));

        let err = MetadataModel::new(vec![
            players().join(Join::new("rating", "players", JoinKind::Left, "1 = 1")),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("same name as a column"));
    }

    #[test]
    fn test_unknown_join_target() {
        let err = MetadataModel::new(vec![
            players().join(Join::new("team", "teams", JoinKind::Left, "{{$team_id}} = {{team.$id}}")),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("unknown table 'teams'"));
    }

    #[test]
    fn test_unresolvable_reference_is_eager() {
        let err = MetadataModel::new(vec![players().column(Column::dimension("bad", "{{missing}}"))])
            .unwrap_err();
        assert!(matches!(err, CompileError::UnresolvableReference { .. }));

        let err = MetadataModel::new(vec![players().column(Column::dimension("bad", "{{$x"))])
            .unwrap_err();
        assert!(matches!(
            err,
            CompileError::UnresolvableReference { ref context, .. } if context.starts_with("unparseable")
        ));
    }

    #[test]
    fn test_self_cycle_detected() {
        let err = MetadataModel::new(vec![players().column(Column::dimension("loop", "{{loop}} + 1"))])
            .unwrap_err();
        match err {
            CompileError::CyclicReference { chain } => {
                assert_eq!(chain, vec!["players.loop", "players.loop"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_mutual_cycle_detected() {
        let err = MetadataModel::new(vec![players()
            .column(Column::dimension("a", "{{b}}"))
            .column(Column::dimension("b", "{{a}}"))])
        .unwrap_err();
        match err {
            CompileError::CyclicReference { chain } => {
                assert_eq!(chain, vec!["players.a", "players.b", "players.a"]);
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_depth_limit() {
        let mut table = Table::new("chain").column(Column::dimension("c0", "{{$v}}"));
        for i in 1..10 {
            table = table.column(Column::dimension(&format!("c{}", i), &format!("{{{{c{}}}}}", i - 1)));
        }
        assert!(MetadataModel::with_max_depth(vec![table.clone()], 16).is_ok());
        let err = MetadataModel::with_max_depth(vec![table], 4).unwrap_err();
        assert!(matches!(err, CompileError::CyclicReference { .. }));
    }

    #[test]
    fn test_nest_by_validation() {
        let table = Table::new("games")
            .column(Column::time_dimension("played_at", "", &[TimeGrain::Day]))
            .column(
                Column::metric("peak", "MAX({{$points}})", Aggregation::Sum)
                    .nest_by("played_at", Some(TimeGrain::Month)),
            );
        let err = MetadataModel::new(vec![table]).unwrap_err();
        assert!(err.to_string().contains("grain 'month' is not declared"));
    }

    #[test]
    fn test_from_toml() {
        let model = MetadataModel::from_toml_str(
            r#"
[[tables]]
name = "players"
source = { table = "player_stats" }

[[tables.columns]]
name = "score"
kind = "metric"
aggregation = "max"

[[tables.columns]]
name = "played_at"
kind = "time_dimension"
grains = [{ grain = "day" }, { grain = "month" }]

[[tables.joins]]
name = "country"
table = "countries"
on = "{{$country_id}} = {{country.$id}}"

[[tables]]
name = "countries"
source = { table = "countries" }

[[tables.columns]]
name = "name"
kind = "dimension"
"#,
        )
        .unwrap();
        let players = model.require_table("players").unwrap();
        assert_eq!(players.columns.len(), 2);
        assert_eq!(players.joins[0].kind, JoinKind::Left);
        assert!(model.require_table("teams").is_err());
    }
}
