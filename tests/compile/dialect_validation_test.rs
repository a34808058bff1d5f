//! Generated SQL must parse in every dialect it is generated for.

use quarry::generator::CompiledQuery;
use quarry::metadata::MetadataModel;
use quarry::query::{FilterExpr, Operator, QueryBuilder, QueryRequest, SortDirection};
use quarry::sql::test_utils::validate_sql;
use quarry::sql::Dialect;
use quarry::SqlGenerator;

fn model() -> MetadataModel {
    MetadataModel::from_toml_str(include_str!("../../demos/players.toml")).unwrap()
}

fn check(name: &str, builder: impl Fn() -> QueryBuilder) {
    let m = model();
    for dialect in Dialect::ALL {
        let query = builder().build(&m).unwrap();
        let compiled: CompiledQuery = SqlGenerator::new(&m, dialect)
            .compile(&query)
            .unwrap_or_else(|e| panic!("{} on {}: {}", name, dialect, e));
        validate_sql(&compiled.main.sql, dialect)
            .unwrap_or_else(|e| panic!("{} main: {}", name, e));
        if let Some(count) = &compiled.count {
            validate_sql(&count.sql, dialect).unwrap_or_else(|e| panic!("{} count: {}", name, e));
        }
    }
}

#[test]
fn test_demo_request() {
    check("demo", || {
        QueryBuilder::from(
            QueryRequest::from_json(include_str!("../../demos/top_ratings.json")).unwrap(),
        )
    });
}

#[test]
fn test_joined_filters_and_total() {
    check("joined", || {
        QueryBuilder::new("players")
            .select("rating")
            .select("country.name")
            .select("points")
            .filter(FilterExpr::predicate(
                "country.name",
                Operator::PrefixInsensitive,
                vec!["new".into()],
            ))
            .filter(FilterExpr::predicate(
                "rating",
                Operator::In,
                vec!["A".into(), "B".into()],
            ))
            .filter(FilterExpr::predicate(
                "points",
                Operator::Between,
                vec![10.into(), 500.into()],
            ))
            .order_by("points", SortDirection::Desc)
            .limit(25)
            .with_total()
    });
}

#[test]
fn test_dimensions_only() {
    check("distinct", || {
        QueryBuilder::new("players")
            .select("team")
            .select("played_at@month")
            .filter(FilterExpr::predicate("team", Operator::NotNull, vec![]))
            .order_by("team", SortDirection::Asc)
            .offset(5)
            .limit(5)
            .with_total()
    });
}

#[test]
fn test_nested_with_outer_having() {
    check("nested", || {
        QueryBuilder::new("players")
            .select("rating")
            .select("best_day")
            .select("avg_points")
            .having(FilterExpr::predicate("best_day", Operator::Gt, vec![3.into()]))
            .order_by("best_day", SortDirection::Desc)
    });
}
