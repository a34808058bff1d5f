//! Join planning.
//!
//! Starts from the join paths the resolved fragments read through, adds the
//! paths their ON conditions need, and orders the result so every join comes
//! after the joins it references.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use crate::error::{CompileError, CompileResult};
use crate::metadata::{JoinKind, MetadataModel, Table, TableSource};
use crate::resolver::{ColumnResolver, Scope};
use crate::sql::{JoinType, SelectStatement, TableRef};

#[derive(Debug, Clone)]
pub(crate) struct PlannedJoin<'a> {
    pub kind: JoinKind,
    pub table: &'a Table,
    pub alias: String,
    pub on: Option<String>,
}

/// Plan every join reachable from `required`.
///
/// A join is emitted after its parent and after every join its ON condition
/// reads through. Among joins that are ready at the same time, declaration
/// order wins.
pub(crate) fn plan_joins<'a>(
    model: &'a MetadataModel,
    resolver: &ColumnResolver<'a>,
    scope: &Scope<'a>,
    required: &BTreeSet<Vec<String>>,
) -> CompileResult<Vec<PlannedJoin<'a>>> {
    let mut queue: VecDeque<Vec<String>> = required.iter().cloned().collect();
    let mut nodes: HashMap<Vec<String>, Node<'a>> = HashMap::new();

    while let Some(path) = queue.pop_front() {
        if path.is_empty() || nodes.contains_key(&path) {
            continue;
        }
        for i in 1..path.len() {
            queue.push_back(path[..i].to_vec());
        }

        let parent_path = &path[..path.len() - 1];
        let name = &path[path.len() - 1];
        let (mut key, parent) = order_key(model, scope.root, parent_path)?;
        let join = parent.get_join(name).ok_or_else(|| CompileError::UnresolvableReference {
            table: parent.name.clone(),
            reference: name.clone(),
            context: "unknown join".into(),
        })?;
        key.push(parent.join_index(name).unwrap_or_default());
        let target = model.require_table(&join.table)?;

        let mut deps = BTreeSet::new();
        if !parent_path.is_empty() {
            deps.insert(parent_path.to_vec());
        }
        let on = if join.kind == JoinKind::Cross {
            None
        } else {
            let resolved =
                resolver.resolve_template(scope, parent_path, &join.on, &format!("join:{}", name))?;
            for dep in resolved.joins {
                if !dep.is_empty() && dep != path {
                    queue.push_back(dep.clone());
                    deps.insert(dep);
                }
            }
            Some(resolved.sql)
        };

        nodes.insert(
            path.clone(),
            Node {
                key,
                deps,
                join: PlannedJoin {
                    kind: join.kind,
                    table: target,
                    alias: resolver.alias_for(scope.root, &path),
                    on,
                },
            },
        );
    }

    let mut emitted: HashSet<Vec<String>> = HashSet::new();
    let mut aliases = HashSet::new();
    let mut planned = Vec::with_capacity(nodes.len());
    while !nodes.is_empty() {
        let next = nodes
            .iter()
            .filter(|(_, node)| node.deps.iter().all(|d| emitted.contains(d)))
            .min_by(|(_, a), (_, b)| a.key.cmp(&b.key))
            .map(|(path, _)| path.clone());

        let Some(path) = next else {
            let mut chain: Vec<String> = nodes.keys().map(|p| p.join(".")).collect();
            chain.sort();
            return Err(CompileError::CyclicReference { chain });
        };
        if let Some(node) = nodes.remove(&path) {
            if aliases.insert(node.join.alias.clone()) {
                planned.push(node.join);
            }
        }
        emitted.insert(path);
    }
    Ok(planned)
}

struct Node<'a> {
    key: Vec<usize>,
    deps: BTreeSet<Vec<String>>,
    join: PlannedJoin<'a>,
}

/// Declaration indices along `path` and the table it ends at.
fn order_key<'a>(
    model: &'a MetadataModel,
    root: &'a Table,
    path: &[String],
) -> CompileResult<(Vec<usize>, &'a Table)> {
    let mut table = root;
    let mut key = Vec::with_capacity(path.len() + 1);
    for name in path {
        let join = table.get_join(name).ok_or_else(|| CompileError::UnresolvableReference {
            table: table.name.clone(),
            reference: name.clone(),
            context: "unknown join".into(),
        })?;
        key.push(table.join_index(name).unwrap_or_default());
        table = model.require_table(&join.table)?;
    }
    Ok((key, table))
}

/// FROM/JOIN item for a table under `alias`.
pub(crate) fn table_ref(table: &Table, alias: &str) -> TableRef {
    match &table.source {
        TableSource::Physical { schema, table } => {
            let mut tref = TableRef::new(table);
            if let Some(schema) = schema {
                tref = tref.with_schema(schema);
            }
            tref.with_alias(alias)
        }
        TableSource::Subquery { sql } => TableRef::sql(sql).with_alias(alias),
    }
}

/// Attach planned joins to a statement.
pub(crate) fn apply_joins(mut stmt: SelectStatement, joins: &[PlannedJoin<'_>]) -> SelectStatement {
    for join in joins {
        let join_type = match join.kind {
            JoinKind::Inner => JoinType::Inner,
            JoinKind::Left => JoinType::Left,
            JoinKind::Full => JoinType::Full,
            JoinKind::Cross => JoinType::Cross,
        };
        stmt = stmt.join(
            join_type,
            table_ref(join.table, &join.alias),
            join.on.as_deref().map(crate::sql::raw_sql),
        );
    }
    stmt
}
