//! Loading metadata models from TOML.

use quarry::error::CompileError;
use quarry::metadata::{Aggregation, ColumnKind, JoinKind, MetadataModel, TableSource, TimeGrain};
use quarry::query::{QueryBuilder, QueryRequest};

const PLAYERS: &str = include_str!("../../demos/players.toml");

#[test]
fn test_demo_model_loads() {
    let model = MetadataModel::from_toml_str(PLAYERS).unwrap();
    assert_eq!(model.tables().len(), 3);

    let players = model.require_table("players").unwrap();
    assert_eq!(
        players.source,
        TableSource::Physical {
            schema: None,
            table: "player_stats".into()
        }
    );
    assert_eq!(players.data_source, "default");

    let best_day = players.get_column("best_day").unwrap();
    assert_eq!(best_day.aggregation(), Some(Aggregation::Max));
    assert_eq!(best_day.nest_by_list()[0].grain, Some(TimeGrain::Day));

    let played_at = players.get_column("played_at").unwrap();
    assert!(played_at.is_time_dimension());
    assert_eq!(played_at.default_grain(), Some(TimeGrain::Day));

    let countries = model.require_table("countries").unwrap();
    assert_eq!(countries.get_join("continent").unwrap().kind, JoinKind::Inner);
    assert_eq!(countries.data_source, "default");
}

#[test]
fn test_empty_formula_defaults_to_physical_column() {
    let model = MetadataModel::from_toml_str(PLAYERS).unwrap();
    let rating = model.require_table("players").unwrap().get_column("rating").unwrap();
    assert_eq!(rating.formula, "{{$rating}}");
    assert!(matches!(rating.kind, ColumnKind::Dimension));
    assert_eq!(rating.values.as_deref().map(|v| v.len()), Some(3));
}

#[test]
fn test_demo_request_builds() {
    let model = MetadataModel::from_toml_str(PLAYERS).unwrap();
    let request = QueryRequest::from_json(include_str!("../../demos/top_ratings.json")).unwrap();
    let query = QueryBuilder::from(request).build(&model).unwrap();

    assert!(query.is_aggregated());
    let aliases: Vec<_> = query.projections().iter().map(|p| p.alias.as_str()).collect();
    assert_eq!(aliases, ["rating", "country_name", "month", "points", "best_day"]);
    assert_eq!(query.pagination().map(|p| p.want_total), Some(true));
}

#[test]
fn test_cycle_through_join_is_reported() {
    let err = MetadataModel::from_toml_str(
        r#"
[[tables]]
name = "a"
source = { table = "a" }

[[tables.columns]]
name = "x"
kind = "dimension"
formula = "{{b_rel.y}}"

[[tables.joins]]
name = "b_rel"
table = "b"
on = "{{$b_id}} = {{b_rel.$id}}"

[[tables]]
name = "b"
source = { table = "b" }

[[tables.columns]]
name = "y"
kind = "dimension"
formula = "{{a_rel.x}}"

[[tables.joins]]
name = "a_rel"
table = "a"
on = "{{$a_id}} = {{a_rel.$id}}"
"#,
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::CyclicReference { .. }));
}

#[test]
fn test_unknown_reference_names_the_table() {
    let err = MetadataModel::from_toml_str(
        r#"
[[tables]]
name = "games"
source = { table = "games" }

[[tables.columns]]
name = "margin"
kind = "metric"
aggregation = "sum"
formula = "{{home_points}} - {{$away_points}}"
"#,
    )
    .unwrap_err();
    match err {
        CompileError::UnresolvableReference { table, reference, .. } => {
            assert_eq!(table, "games");
            assert_eq!(reference, "home_points");
        }
        other => panic!("expected unresolvable reference, got {:?}", other),
    }
}

#[test]
fn test_subquery_source() {
    let model = MetadataModel::from_toml_str(
        r#"
[[tables]]
name = "recent"
source = { sql = "SELECT * FROM games WHERE season = 2024" }
data_source = "warehouse"

[[tables.columns]]
name = "home"
kind = "dimension"
"#,
    )
    .unwrap();
    let recent = model.require_table("recent").unwrap();
    assert!(matches!(recent.source, TableSource::Subquery { .. }));
    assert_eq!(recent.data_source, "warehouse");
}

#[test]
fn test_malformed_toml_is_invalid_model() {
    let err = MetadataModel::from_toml_str("[[tables]]\nname = ").unwrap_err();
    assert!(matches!(err, CompileError::InvalidModel(_)));

    let err = MetadataModel::from_toml_str(
        "[[tables]]\nname = \"t\"\nsource = { table = \"t\" }\n\n[[tables.columns]]\nname = \"c\"\nkind = \"gauge\"\n",
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::InvalidModel(_)));
}

#[test]
fn test_depth_limit_from_toml() {
    let mut toml = String::from("[[tables]]\nname = \"t\"\nsource = { table = \"t\" }\n");
    toml.push_str("\n[[tables.columns]]\nname = \"c0\"\nkind = \"dimension\"\nformula = \"{{$v}}\"\n");
    for i in 1..8 {
        toml.push_str(&format!(
            "\n[[tables.columns]]\nname = \"c{}\"\nkind = \"dimension\"\nformula = \"{{{{c{}}}}} + 1\"\n",
            i,
            i - 1
        ));
    }
    assert!(MetadataModel::from_toml_str(&toml).is_ok());
    let err = MetadataModel::from_toml_str_with_depth(&toml, 3).unwrap_err();
    assert!(matches!(err, CompileError::CyclicReference { .. }));
}
