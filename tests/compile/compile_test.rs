//! Compiling requests against the demo players model.

use quarry::error::CompileError;
use quarry::generator::{BoundValue, CompiledQuery};
use quarry::metadata::{Aggregation, Column, Join, JoinKind, MetadataModel, Table};
use quarry::query::{FilterExpr, Operator, QueryBuilder, QueryRequest, SortDirection};
use quarry::sql::test_utils::validate_sql;
use quarry::sql::Dialect;
use quarry::SqlGenerator;

fn model() -> MetadataModel {
    MetadataModel::from_toml_str(include_str!("../../demos/players.toml")).unwrap()
}

fn compile(builder: QueryBuilder, dialect: Dialect) -> Result<CompiledQuery, CompileError> {
    let m = model();
    let query = builder.build(&m)?;
    SqlGenerator::new(&m, dialect).compile(&query)
}

fn demo_request() -> QueryBuilder {
    QueryBuilder::from(QueryRequest::from_json(include_str!("../../demos/top_ratings.json")).unwrap())
}

#[test]
fn test_metric_filter_is_promoted_to_having() {
    let c = compile(
        QueryBuilder::new("players")
            .select("rating")
            .select("score")
            .filter(FilterExpr::predicate("score", Operator::Gt, vec![100.into()])),
        Dialect::Postgres,
    )
    .unwrap();

    insta::assert_snapshot!(c.main.sql, @r#"
    SELECT
      "players"."rating" AS "rating",
      MAX("players"."score") AS "score"
    FROM "player_stats" AS "players"
    GROUP BY "players"."rating"
    HAVING MAX("players"."score") > $1
    "#);
    assert!(!c.main.sql.contains("WHERE"));
    assert_eq!(c.main.params, vec![BoundValue::Int(100)]);
}

#[test]
fn test_demo_request_is_nested() {
    let c = compile(demo_request(), Dialect::Postgres).unwrap();
    assert!(c.nested);

    let sql = &c.main.sql;
    assert_eq!(sql.matches("FROM (").count(), 1);
    assert!(sql.contains("LEFT JOIN \"countries\" AS \"players_country\""));
    assert!(sql.contains("INNER JOIN \"continents\" AS \"players_country_continent\""));
    assert!(sql.contains("WHERE \"players_country_continent\".\"name\" = $1"));
    assert!(sql.contains("HAVING SUM(\"players_inner\".\"points\") > $2"));
    assert!(sql.contains("DATE_TRUNC('month', \"players\".\"played_at\") AS \"month\""));
    assert!(sql.contains("DATE_TRUNC('day', \"players\".\"played_at\") AS \"nest_played_at_day\""));
    assert!(sql.ends_with("LIMIT 10"));
    assert_eq!(
        c.main.params,
        vec![BoundValue::Text("Oceania".into()), BoundValue::Int(10)]
    );

    let count = c.count.unwrap();
    assert!(count.sql.contains("AS \"pagination_subquery\""));
    assert!(!count.sql.contains("LIMIT"));
    assert_eq!(count.params, c.main.params);
}

#[test]
fn test_single_pass_has_no_subquery() {
    let c = compile(
        QueryBuilder::new("players")
            .select("rating")
            .select("points")
            .select("avg_points"),
        Dialect::DuckDb,
    )
    .unwrap();
    assert!(!c.nested);
    assert!(!c.main.sql.contains("FROM ("));
    assert!(c.main.sql.contains("AVG(\"players\".\"points\") AS \"avg_points\""));
}

#[test]
fn test_total_without_dimensions() {
    let c = compile(
        QueryBuilder::new("players")
            .select("points")
            .limit(5)
            .with_total(),
        Dialect::Sqlite,
    )
    .unwrap();
    assert!(c.count.is_none());
    assert!(c.main.sql.ends_with("LIMIT 5"));
}

#[test]
fn test_day_and_month_of_one_dimension() {
    let c = compile(
        QueryBuilder::new("players")
            .select("played_at@day")
            .select("played_at@month")
            .select("points"),
        Dialect::DuckDb,
    )
    .unwrap();

    assert_ne!(c.columns[0].alias, c.columns[1].alias);
    assert!(c.main.sql.contains("DATE_TRUNC('day', \"players\".\"played_at\")"));
    assert!(c.main.sql.contains("DATE_TRUNC('month', \"players\".\"played_at\")"));
}

#[test]
fn test_table_argument_default_and_override() {
    let by_default = compile(
        QueryBuilder::new("players")
            .select("rating")
            .select("qualified_games"),
        Dialect::Postgres,
    )
    .unwrap();
    assert!(by_default.main.sql.contains(">= 0 THEN 1"));

    let overridden = compile(
        QueryBuilder::new("players")
            .table_argument("min_games", "5")
            .select("rating")
            .select("qualified_games"),
        Dialect::Postgres,
    )
    .unwrap();
    assert!(overridden.main.sql.contains(">= 5 THEN 1"));

    let err = compile(
        QueryBuilder::new("players")
            .table_argument("min_games", "five")
            .select("qualified_games"),
        Dialect::Postgres,
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::InvalidArgument { .. }));
}

#[test]
fn test_ungrouped_filter_only_when_aggregated() {
    let team = || FilterExpr::predicate("team", Operator::Eq, vec!["red".into()]);

    let err = compile(
        QueryBuilder::new("players")
            .select("rating")
            .select("points")
            .filter(team()),
        Dialect::DuckDb,
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::UngroupedFilter { ref column, .. } if column == "team"));
    assert!(err.is_request_error());

    let c = compile(QueryBuilder::new("players").select("rating").filter(team()), Dialect::DuckDb)
        .unwrap();
    assert!(c.main.sql.contains("WHERE \"players\".\"team\" = ?"));
}

#[test]
fn test_mixed_or_goes_to_having_whole() {
    let c = compile(
        QueryBuilder::new("players")
            .select("rating")
            .select("points")
            .filter(
                FilterExpr::predicate("rating", Operator::Eq, vec!["A".into()])
                    .or(FilterExpr::predicate("points", Operator::Ge, vec![50.into()])),
            ),
        Dialect::Sqlite,
    )
    .unwrap();
    assert!(!c.main.sql.contains("WHERE"));
    assert!(c
        .main
        .sql
        .contains("HAVING \"players\".\"rating\" = ? OR SUM(\"players\".\"points\") >= ?"));
}

#[test]
fn test_sort_errors() {
    let err = compile(
        QueryBuilder::new("players")
            .select("rating")
            .order_by("team", SortDirection::Asc),
        Dialect::DuckDb,
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::UnprojectedSort(ref key) if key == "team"));

    let err = compile(
        QueryBuilder::new("players")
            .select("rating")
            .select("points")
            .order_by("id", SortDirection::Asc),
        Dialect::DuckDb,
    )
    .unwrap_err();
    assert!(matches!(err, CompileError::InvalidSort(_)));
}

#[test]
fn test_tsql_pagination() {
    let c = compile(
        QueryBuilder::new("players")
            .select("rating")
            .select("points")
            .order_by("points", SortDirection::Desc)
            .offset(20)
            .limit(10),
        Dialect::TSql,
    )
    .unwrap();
    assert!(c.main.sql.contains("FROM [player_stats] AS [players]"));
    assert!(c.main.sql.ends_with("OFFSET 20 ROWS FETCH NEXT 10 ROWS ONLY"));
    validate_sql(&c.main.sql, Dialect::TSql).unwrap();
}

#[test]
fn test_compilation_is_deterministic_for_every_dialect() {
    for dialect in Dialect::ALL {
        let a = compile(demo_request(), dialect);
        let b = compile(demo_request(), dialect);
        assert_eq!(a, b, "{} output differs between runs", dialect);
    }
}

#[test]
fn test_explain_lists_main_then_count() {
    let m = model();
    let query = demo_request().build(&m).unwrap();
    let statements = SqlGenerator::new(&m, Dialect::Snowflake).explain(&query).unwrap();
    assert_eq!(statements.len(), 2);
    assert!(statements[0].contains("FROM ("));
    assert!(statements[1].starts_with("SELECT\n  COUNT(*)"));
}

/// `country` is declared first but its ON condition reads through `region`.
fn sibling_dependency_model() -> MetadataModel {
    MetadataModel::new(vec![
        Table::new("players")
            .column(Column::metric("points", "{{$points}}", Aggregation::Sum))
            .join(Join::new(
                "country",
                "countries",
                JoinKind::Left,
                "{{region.$country_id}} = {{country.$id}}",
            ))
            .join(Join::new(
                "region",
                "regions",
                JoinKind::Left,
                "{{$region_id}} = {{region.$id}}",
            )),
        Table::new("countries").column(Column::dimension("name", "{{$name}}")),
        Table::new("regions").column(Column::dimension("name", "{{$name}}")),
    ])
    .unwrap()
}

#[test]
fn test_join_follows_the_join_its_condition_reads() {
    let m = sibling_dependency_model();
    let query = QueryBuilder::new("players")
        .select("country.name")
        .select("points")
        .build(&m)
        .unwrap();

    for dialect in Dialect::ALL {
        let c = SqlGenerator::new(&m, dialect).compile(&query).unwrap();
        let sql = &c.main.sql;
        let region = sql.find("regions").unwrap();
        let country = sql.find("countries").unwrap();
        assert!(region < country, "{}: {}", dialect, sql);
        validate_sql(sql, dialect).unwrap();
    }

    let c = SqlGenerator::new(&m, Dialect::Postgres).compile(&query).unwrap();
    insta::assert_snapshot!(c.main.sql, @r#"
    SELECT
      "players_country"."name" AS "country_name",
      SUM("players"."points") AS "points"
    FROM "players" AS "players"
    LEFT JOIN "regions" AS "players_region" ON "players"."region_id" = "players_region"."id"
    LEFT JOIN "countries" AS "players_country" ON "players_region"."country_id" = "players_country"."id"
    GROUP BY "players_country"."name"
    "#);
}

#[test]
fn test_joins_referencing_each_other_are_cyclic() {
    let m = MetadataModel::new(vec![
        Table::new("players")
            .column(Column::metric("points", "{{$points}}", Aggregation::Sum))
            .join(Join::new(
                "country",
                "countries",
                JoinKind::Left,
                "{{region.$country_id}} = {{country.$id}}",
            ))
            .join(Join::new(
                "region",
                "regions",
                JoinKind::Left,
                "{{country.$region_id}} = {{region.$id}}",
            )),
        Table::new("countries").column(Column::dimension("name", "{{$name}}")),
        Table::new("regions").column(Column::dimension("name", "{{$name}}")),
    ])
    .unwrap();
    let query = QueryBuilder::new("players")
        .select("country.name")
        .select("points")
        .build(&m)
        .unwrap();

    let err = SqlGenerator::new(&m, Dialect::DuckDb).compile(&query).unwrap_err();
    assert!(matches!(err, CompileError::CyclicReference { .. }));
}
