//! Compile-then-hydrate round trips against an in-memory SQLite database.

use std::sync::Arc;

use chrono::NaiveDate;
use quarry::error::{EngineError, ExecutionError, HydrationError};
use quarry::execution::QueryExecutor;
use quarry::prelude::*;

const SEED: &str = "
CREATE TABLE countries (id INTEGER, name TEXT);
INSERT INTO countries VALUES (1, 'NZ'), (2, 'AU');

CREATE TABLE players (rating TEXT, points INTEGER, score INTEGER, played_at TEXT, country_id INTEGER);
INSERT INTO players VALUES
  ('A', 10, 5, '2024-01-15 10:00:00', 1),
  ('A', 20, 7, '2024-01-15 18:00:00', 1),
  ('A',  5, 9, '2024-02-03 09:00:00', 2),
  ('B',  8, 3, '2024-01-20 12:00:00', 2),
  ('B', 12, 4, '2024-02-10 12:00:00', 2),
  ('C',  1, 1, '2024-02-11 12:00:00', 1);
";

fn model() -> Arc<MetadataModel> {
    Arc::new(
        MetadataModel::new(vec![
            Table::new("players")
                .column(Column::metric("score", "{{$score}}", Aggregation::Max))
                .column(Column::metric("points", "{{$points}}", Aggregation::Sum))
                .column(Column::metric("avg_points", "{{$points}}", Aggregation::Avg))
                .column(
                    Column::metric("best_day", "SUM({{$points}})", Aggregation::Max)
                        .nest_by("played_at", Some(TimeGrain::Day)),
                )
                .column(Column::dimension("rating", "{{$rating}}").with_values(&["A", "B", "C"]))
                .column(Column::time_dimension(
                    "played_at",
                    "{{$played_at}}",
                    &[TimeGrain::Day, TimeGrain::Month],
                ))
                .join(Join::new(
                    "country",
                    "countries",
                    JoinKind::Left,
                    "{{$country_id}} = {{country.$id}}",
                )),
            Table::new("countries").column(Column::dimension("name", "{{$name}}")),
        ])
        .unwrap(),
    )
}

fn executor() -> SqliteExecutor {
    let executor = SqliteExecutor::new().open_in_memory("default").unwrap();
    executor.execute_batch("default", SEED).unwrap();
    executor
}

fn engine() -> Engine {
    Engine::new(model(), Arc::new(executor())).with_data_source("default", Dialect::Sqlite)
}

async fn run(builder: QueryBuilder) -> QueryResult {
    let engine = engine();
    let query = builder.build(engine.model()).unwrap();
    engine.execute(&query).await.unwrap()
}

fn month(y: i32, m: u32) -> Value {
    let start = NaiveDate::from_ymd_opt(y, m, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    Value::Time(GrainValue::new(TimeGrain::Month, start))
}

fn number(row: &ResultRow, alias: &str) -> f64 {
    row.get(alias).and_then(Value::as_f64).unwrap()
}

#[tokio::test]
async fn test_single_pass_by_rating() {
    let result = run(QueryBuilder::new("players")
        .select("rating")
        .select("points")
        .order_by("rating", SortDirection::Asc))
    .await;

    let rows = &result.rows;
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].id, 0);
    assert_eq!(rows[2].id, 2);
    assert_eq!(rows[0].get("rating"), Some(&Value::Enum("A".into())));
    assert_eq!(number(&rows[0], "points"), 35.0);
    assert_eq!(number(&rows[1], "points"), 20.0);
    assert_eq!(number(&rows[2], "points"), 1.0);
    assert_eq!(result.page_total, None);
}

#[tokio::test]
async fn test_month_grain_rows() {
    let result = run(QueryBuilder::new("players")
        .select("played_at@month")
        .select("points")
        .order_by("played_at", SortDirection::Asc))
    .await;

    let rows = &result.rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("played_at"), Some(&month(2024, 1)));
    assert_eq!(number(&rows[0], "points"), 38.0);
    assert_eq!(rows[1].get("played_at"), Some(&month(2024, 2)));
    assert_eq!(number(&rows[1], "points"), 18.0);
}

#[tokio::test]
async fn test_nested_two_pass_metric() {
    let result = run(QueryBuilder::new("players")
        .select("rating")
        .select("best_day")
        .select("avg_points")
        .order_by("rating", SortDirection::Asc))
    .await;

    let rows = &result.rows;
    assert_eq!(rows.len(), 3);
    // A: 30 on 2024-01-15, 5 on 2024-02-03
    assert_eq!(number(&rows[0], "best_day"), 30.0);
    assert_eq!(number(&rows[1], "best_day"), 12.0);
    assert_eq!(number(&rows[2], "best_day"), 1.0);

    assert!((number(&rows[0], "avg_points") - 35.0 / 3.0).abs() < 1e-9);
    assert!((number(&rows[1], "avg_points") - 10.0).abs() < 1e-9);
    assert!((number(&rows[2], "avg_points") - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_nested_matches_single_pass_totals() {
    let nested = run(QueryBuilder::new("players")
        .select("rating")
        .select("best_day")
        .select("points")
        .order_by("rating", SortDirection::Asc))
    .await;
    let single = run(QueryBuilder::new("players")
        .select("rating")
        .select("points")
        .order_by("rating", SortDirection::Asc))
    .await;

    let totals = |r: &QueryResult| r.rows.iter().map(|row| number(row, "points")).collect::<Vec<_>>();
    assert_eq!(totals(&nested), totals(&single));
}

#[tokio::test]
async fn test_joined_dimension() {
    let result = run(QueryBuilder::new("players")
        .select("country.name")
        .select("points")
        .order_by("country_name", SortDirection::Asc))
    .await;

    let rows = &result.rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("country_name").and_then(Value::as_str), Some("AU"));
    assert_eq!(number(&rows[0], "points"), 25.0);
    assert_eq!(rows[1].get("country_name").and_then(Value::as_str), Some("NZ"));
    assert_eq!(number(&rows[1], "points"), 31.0);
}

#[tokio::test]
async fn test_where_on_metric_is_promoted_to_having() {
    let result = run(QueryBuilder::new("players")
        .select("rating")
        .select("score")
        .filter(FilterExpr::predicate("score", Operator::Gt, vec![3.into()]))
        .order_by("rating", SortDirection::Asc))
    .await;

    let ratings: Vec<_> = result
        .rows
        .iter()
        .map(|r| r.get("rating").cloned().unwrap())
        .collect();
    assert_eq!(ratings, vec![Value::Enum("A".into()), Value::Enum("B".into())]);
}

#[tokio::test]
async fn test_joined_prefix_filter() {
    let result = run(QueryBuilder::new("players")
        .select("rating")
        .select("points")
        .filter(FilterExpr::predicate("country.name", Operator::Prefix, vec!["N".into()]))
        .order_by("rating", SortDirection::Asc))
    .await;

    let rows = &result.rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(number(&rows[0], "points"), 30.0);
    assert_eq!(rows[1].get("rating"), Some(&Value::Enum("C".into())));
    assert_eq!(number(&rows[1], "points"), 1.0);
}

#[tokio::test]
async fn test_raw_metric_filter_without_aggregation() {
    let result = run(QueryBuilder::new("players")
        .select("rating")
        .filter(FilterExpr::predicate("points", Operator::Gt, vec![10.into()]))
        .order_by("rating", SortDirection::Asc))
    .await;

    let ratings: Vec<_> = result
        .rows
        .iter()
        .map(|r| r.get("rating").cloned().unwrap())
        .collect();
    assert_eq!(ratings, vec![Value::Enum("A".into()), Value::Enum("B".into())]);
}

#[tokio::test]
async fn test_pagination_with_total() {
    let result = run(QueryBuilder::new("players")
        .select("rating")
        .select("score")
        .order_by("score", SortDirection::Desc)
        .limit(2)
        .with_total())
    .await;

    assert_eq!(result.page_total, Some(3));
    assert_eq!(result.rows.len(), 2);
    assert_eq!(number(&result.rows[0], "score"), 9.0);
    assert_eq!(number(&result.rows[1], "score"), 4.0);
}

#[tokio::test]
async fn test_nested_pagination_total() {
    let result = run(QueryBuilder::new("players")
        .select("rating")
        .select("best_day")
        .order_by("rating", SortDirection::Asc)
        .offset(1)
        .limit(1)
        .with_total())
    .await;

    assert_eq!(result.page_total, Some(3));
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0].get("rating"), Some(&Value::Enum("B".into())));
}

#[tokio::test]
async fn test_total_without_dimensions_is_skipped() {
    let result = run(QueryBuilder::new("players")
        .select("points")
        .limit(1)
        .with_total())
    .await;

    assert_eq!(result.page_total, None);
    assert_eq!(result.rows.len(), 1);
    assert_eq!(number(&result.rows[0], "points"), 56.0);
}

#[tokio::test]
async fn test_hydrator_reads_once() {
    let m = model();
    let query = QueryBuilder::new("players").select("rating").build(&m).unwrap();
    let compiled = SqlGenerator::new(&m, Dialect::Sqlite).compile(&query).unwrap();
    let cursor = executor().query("default", &compiled.main).await.unwrap();

    let mut hydrator = ResultHydrator::new(cursor, &compiled);
    assert_eq!(hydrator.collect().unwrap().len(), 3);
    assert!(matches!(hydrator.rows(), Err(HydrationError::ExhaustedResult)));
}

#[tokio::test]
async fn test_unknown_data_source_passes_through() {
    let model = Arc::new(
        MetadataModel::new(vec![Table::new("events")
            .data_source("warehouse")
            .column(Column::dimension("kind", "{{$kind}}"))])
        .unwrap(),
    );
    let engine = Engine::new(model, Arc::new(executor()));
    let query = QueryBuilder::new("events").select("kind").build(engine.model()).unwrap();

    let err = engine.execute(&query).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Execution(ExecutionError::UnknownDataSource(ref name)) if name == "warehouse"
    ));
}

#[tokio::test]
async fn test_compile_errors_surface_before_execution() {
    let engine = engine();
    let query = QueryBuilder::new("players")
        .select("rating")
        .select("score")
        .order_by("id", SortDirection::Asc)
        .build(engine.model())
        .unwrap();

    let err = engine.execute(&query).await.unwrap_err();
    assert!(matches!(err, EngineError::Compile(CompileError::InvalidSort(_))));
}

#[tokio::test]
async fn test_join_declared_before_its_dependency() {
    let model = Arc::new(
        MetadataModel::new(vec![
            Table::new("visits")
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
        .unwrap(),
    );
    let executor = executor();
    executor
        .execute_batch(
            "default",
            "CREATE TABLE regions (id INTEGER, name TEXT, country_id INTEGER);
             INSERT INTO regions VALUES (10, 'Otago', 1), (20, 'Victoria', 2);
             CREATE TABLE visits (points INTEGER, region_id INTEGER);
             INSERT INTO visits VALUES (3, 10), (4, 10), (5, 20);",
        )
        .unwrap();
    let engine = Engine::new(model, Arc::new(executor)).with_data_source("default", Dialect::Sqlite);
    let query = QueryBuilder::new("visits")
        .select("country.name")
        .select("points")
        .order_by("country_name", SortDirection::Asc)
        .build(engine.model())
        .unwrap();

    let rows = engine.execute(&query).await.unwrap().rows;
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("country_name").and_then(Value::as_str), Some("AU"));
    assert_eq!(number(&rows[0], "points"), 5.0);
    assert_eq!(rows[1].get("country_name").and_then(Value::as_str), Some("NZ"));
    assert_eq!(number(&rows[1], "points"), 7.0);
}
