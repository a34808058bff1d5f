//! Column expression resolver.
//!
//! Expands a column's formula template into a dialect-quoted SQL fragment,
//! following references to other columns of the same table and of joined
//! tables. Expansion runs on an explicit stack of frames rather than native
//! recursion: every frame in progress is keyed by (alias, column, argument
//! signature), and meeting a key that is already in progress is a cycle.
//!
//! ```text
//! players.points_per_game  =  {{points}} / {{games}}
//!     ├── players.points   =  SUM({{$pts}})
//!     └── players.games    =  COUNT({{$game_id}})
//! ```
//!
//! Arguments are late-bound: a referenced column's argument takes the value
//! pinned by an `{{sql ...}}` helper, else the invoking column's value of the
//! same name, else the referenced column's own default.

pub mod template;

use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::trace;

use crate::cache::short_hash;
use crate::error::{CompileError, CompileResult};
use crate::metadata::{ArgumentDef, Arguments, Column, MetadataModel, Table, TimeGrain, ValueType};
use crate::sql::dialect::{Dialect, SqlDialect};
use template::{Segment, Target};

/// A fully expanded fragment plus the joins it reads through.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Resolved {
    pub sql: String,
    /// Join paths from the source table, including every prefix.
    pub joins: BTreeSet<Vec<String>>,
}

/// The source table of a compilation and its table arguments.
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    pub root: &'a Table,
    /// Root table arguments, defaults already applied.
    pub table_arguments: Arguments,
}

impl<'a> Scope<'a> {
    /// Build a scope, overlaying `arguments` on the table's declared defaults.
    pub fn new(root: &'a Table, arguments: &Arguments) -> Self {
        let mut table_arguments = defaults_of(root);
        for (name, value) in arguments {
            table_arguments.insert(name.clone(), value.clone());
        }
        Self {
            root,
            table_arguments,
        }
    }
}

fn defaults_of(table: &Table) -> Arguments {
    table
        .arguments
        .iter()
        .filter_map(|a| a.default.clone().map(|d| (a.name.clone(), d)))
        .collect()
}

type FrameKey = (String, String, String);

/// Root table, its argument signature, join path, column, argument
/// signature and grain.
type MemoKey = (String, String, Vec<String>, String, String, Option<TimeGrain>);

struct Frame<'a> {
    table: &'a Table,
    path: Vec<String>,
    column: Option<&'a Column>,
    arguments: Arguments,
    segments: Vec<Segment>,
    pos: usize,
    out: String,
    /// Base expansion, available to grain formulas as `{{$$column.expr}}`.
    base: Option<String>,
    /// Grain to apply once the base expansion completes.
    pending_grain: Option<TimeGrain>,
    key: Option<FrameKey>,
    label: String,
}

enum Step<'a> {
    Text(String),
    Push(Frame<'a>),
}

/// Expands column formulas against a metadata model for one dialect.
pub struct ColumnResolver<'a> {
    model: &'a MetadataModel,
    dialect: Dialect,
    max_depth: usize,
    lenient: bool,
    memo: RefCell<HashMap<MemoKey, Resolved>>,
}

impl<'a> ColumnResolver<'a> {
    pub fn new(model: &'a MetadataModel, dialect: Dialect) -> Self {
        Self {
            model,
            dialect,
            max_depth: model.max_resolution_depth(),
            lenient: false,
            memo: RefCell::default(),
        }
    }

    /// Resolver used while validating a model: missing argument values are
    /// replaced by their names so that only structure is checked.
    pub(crate) fn for_validation(model: &'a MetadataModel, max_depth: usize) -> Self {
        Self {
            model,
            dialect: Dialect::default(),
            max_depth,
            lenient: true,
            memo: RefCell::default(),
        }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Resolve `column` on the table reached from the root through `path`.
    ///
    /// `arguments` are the caller's values; `grain` applies to time
    /// dimensions only. Results are memoized for the life of the resolver.
    pub fn resolve_column(
        &self,
        scope: &Scope<'a>,
        path: &[String],
        column: &str,
        arguments: &Arguments,
        grain: Option<TimeGrain>,
    ) -> CompileResult<Resolved> {
        let key = (
            scope.root.name.clone(),
            signature(&scope.table_arguments, None),
            path.to_vec(),
            column.to_string(),
            signature(arguments, None),
            grain,
        );
        if let Some(hit) = self.memo.borrow().get(&key) {
            return Ok(hit.clone());
        }
        let resolved = self.expand_column(scope, path, column, arguments, grain)?;
        self.memo.borrow_mut().insert(key, resolved.clone());
        Ok(resolved)
    }

    /// Number of memoized column expansions.
    pub fn memoized(&self) -> usize {
        self.memo.borrow().len()
    }

    fn expand_column(
        &self,
        scope: &Scope<'a>,
        path: &[String],
        column: &str,
        arguments: &Arguments,
        grain: Option<TimeGrain>,
    ) -> CompileResult<Resolved> {
        let mut joins = BTreeSet::new();
        let reference = display_path(path, column);
        let (table, path) = self.walk(scope.root, Vec::new(), path, &reference)?;
        record_prefixes(&mut joins, &path);
        let frame = self.column_frame(
            table,
            path,
            column,
            &Arguments::new(),
            arguments,
            grain,
            &reference,
        )?;
        self.run(scope, frame, joins)
    }

    /// Resolve a free-standing template (a join ON condition) in the context
    /// of the table at `path`.
    pub fn resolve_template(
        &self,
        scope: &Scope<'a>,
        path: &[String],
        template: &str,
        label: &str,
    ) -> CompileResult<Resolved> {
        let mut joins = BTreeSet::new();
        let (table, path) = self.walk(scope.root, Vec::new(), path, label)?;
        record_prefixes(&mut joins, &path);
        let segments = template::parse(template).map_err(|reason| {
            CompileError::UnresolvableReference {
                table: table.name.clone(),
                reference: label.to_string(),
                context: format!("unparseable template: {}", reason),
            }
        })?;
        let frame = Frame {
            table,
            label: format!("{}.{}", self.alias_for(scope.root, &path), label),
            path,
            column: None,
            arguments: Arguments::new(),
            segments,
            pos: 0,
            out: String::new(),
            base: None,
            pending_grain: None,
            key: None,
        };
        self.run(scope, frame, joins)
    }

    /// Table reached from `root` through `path`.
    pub fn table_at(&self, root: &'a Table, path: &[String]) -> CompileResult<&'a Table> {
        let label = path.join(".");
        self.walk(root, Vec::new(), path, &label).map(|(t, _)| t)
    }

    /// SQL alias of the table reached through `path`: the root name followed
    /// by each join name, shortened to the dialect's identifier limit.
    pub fn alias_for(&self, root: &Table, path: &[String]) -> String {
        let mut alias = root.name.clone();
        for join in path {
            alias.push('_');
            alias.push_str(join);
        }
        fit_identifier(&alias, self.dialect)
    }

    fn run(
        &self,
        scope: &Scope<'a>,
        root: Frame<'a>,
        mut joins: BTreeSet<Vec<String>>,
    ) -> CompileResult<Resolved> {
        let mut in_progress: HashSet<FrameKey> = HashSet::new();
        if let Some(key) = &root.key {
            in_progress.insert(key.clone());
        }
        let mut stack = vec![root];

        loop {
            let segment = match stack.last_mut() {
                Some(frame) if frame.pos < frame.segments.len() => {
                    frame.pos += 1;
                    Some(frame.segments[frame.pos - 1].clone())
                }
                Some(_) => None,
                None => return Err(CompileError::InvalidModel("empty resolver stack".into())),
            };

            if let Some(segment) = segment {
                let step = match stack.last() {
                    Some(frame) => self.expand(scope, frame, segment, &mut joins)?,
                    None => continue,
                };
                match step {
                    Step::Text(text) => {
                        if let Some(frame) = stack.last_mut() {
                            frame.out.push_str(&text);
                        }
                    }
                    Step::Push(child) => {
                        self.check_push(&stack, &in_progress, &child)?;
                        trace!(frame = %child.label, depth = stack.len(), "resolving");
                        if let Some(key) = &child.key {
                            in_progress.insert(key.clone());
                        }
                        stack.push(child);
                    }
                }
                continue;
            }

            // Top frame is complete.
            let Some(mut frame) = stack.pop() else {
                continue;
            };
            if let Some(grain) = frame.pending_grain.take() {
                match self.grain_step(&frame, grain)? {
                    Step::Text(sql) => frame.out = sql,
                    Step::Push(grain_frame) => {
                        stack.push(grain_frame);
                        continue;
                    }
                }
            }
            if let Some(key) = &frame.key {
                in_progress.remove(key);
            }
            match stack.last_mut() {
                Some(parent) => parent.out.push_str(&frame.out),
                None => {
                    return Ok(Resolved {
                        sql: frame.out,
                        joins,
                    })
                }
            }
        }
    }

    fn check_push(
        &self,
        stack: &[Frame<'a>],
        in_progress: &HashSet<FrameKey>,
        child: &Frame<'a>,
    ) -> CompileResult<()> {
        let chain = || {
            stack
                .iter()
                .filter(|f| f.key.is_some())
                .map(|f| f.label.clone())
                .chain(std::iter::once(child.label.clone()))
                .collect::<Vec<_>>()
        };
        if let Some(key) = &child.key {
            if in_progress.contains(key) {
                return Err(CompileError::CyclicReference { chain: chain() });
            }
        }
        if stack.len() >= self.max_depth {
            let mut chain = chain();
            chain.push(format!("depth limit {} exceeded", self.max_depth));
            return Err(CompileError::CyclicReference { chain });
        }
        Ok(())
    }

    fn expand(
        &self,
        scope: &Scope<'a>,
        frame: &Frame<'a>,
        segment: Segment,
        joins: &mut BTreeSet<Vec<String>>,
    ) -> CompileResult<Step<'a>> {
        match segment {
            Segment::Literal(text) => Ok(Step::Text(text)),

            Segment::Reference { joins: via, target } => {
                let reference = match &target {
                    Target::Logical(name) => display_path(&via, name),
                    Target::Physical(name) => display_path(&via, &format!("${}", name)),
                };
                let (table, path) = self.walk(frame.table, frame.path.clone(), &via, &reference)?;
                record_prefixes(joins, &path);
                match target {
                    Target::Physical(name) => {
                        let alias = self.alias_for(scope.root, &path);
                        Ok(Step::Text(format!(
                            "{}.{}",
                            self.dialect.quote_identifier(&alias),
                            self.dialect.quote_identifier(&name)
                        )))
                    }
                    Target::Logical(name) => self
                        .column_frame(
                            table,
                            path,
                            &name,
                            &Arguments::new(),
                            &frame.arguments,
                            None,
                            &reference,
                        )
                        .map(Step::Push),
                }
            }

            Segment::Helper {
                joins: via,
                column,
                pinned,
            } => {
                let reference = format!("sql {}", display_path(&via, &column));
                let (table, path) = self.walk(frame.table, frame.path.clone(), &via, &reference)?;
                record_prefixes(joins, &path);
                self.column_frame(
                    table,
                    path,
                    &column,
                    &pinned,
                    &frame.arguments,
                    None,
                    &reference,
                )
                .map(Step::Push)
            }

            Segment::ColumnArg(name) => {
                if let Some(value) = frame.arguments.get(&name) {
                    let def = frame.column.and_then(|c| c.argument(&name));
                    return Ok(Step::Text(self.argument_literal(def, value)));
                }
                self.table_argument(scope, frame, &name, "$$column.args")
            }

            Segment::TableArg(name) => self.table_argument(scope, frame, &name, "$$table.args"),

            Segment::ColumnExpr => match &frame.base {
                Some(base) => Ok(Step::Text(base.clone())),
                None => Err(CompileError::UnresolvableReference {
                    table: frame.table.name.clone(),
                    reference: "$$column.expr".into(),
                    context: format!("only valid inside a grain formula (in {})", frame.label),
                }),
            },
        }
    }

    fn table_argument(
        &self,
        scope: &Scope<'a>,
        frame: &Frame<'a>,
        name: &str,
        prefix: &str,
    ) -> CompileResult<Step<'a>> {
        let value = if frame.path.is_empty() {
            scope.table_arguments.get(name).cloned()
        } else {
            frame
                .table
                .get_argument(name)
                .and_then(|a| a.default.clone())
        };
        match value {
            Some(v) => Ok(Step::Text(self.argument_literal(frame.table.get_argument(name), &v))),
            None if self.lenient => Ok(Step::Text(name.to_string())),
            None => Err(CompileError::UnresolvableReference {
                table: frame.table.name.clone(),
                reference: format!("{}.{}", prefix, name),
                context: format!("argument has no value and no default (in {})", frame.label),
            }),
        }
    }

    /// Booleans take the dialect's literal form; other values are validated
    /// text and pass through.
    fn argument_literal(&self, def: Option<&ArgumentDef>, value: &str) -> String {
        match def.map(|d| d.value_type) {
            Some(ValueType::Boolean) => self.dialect.format_bool(value == "true").to_string(),
            _ => value.to_string(),
        }
    }

    /// Follow join names from `table`, extending `path`.
    fn walk(
        &self,
        table: &'a Table,
        mut path: Vec<String>,
        joins: &[String],
        reference: &str,
    ) -> CompileResult<(&'a Table, Vec<String>)> {
        let mut current = table;
        for name in joins {
            let join = current.get_join(name).ok_or_else(|| CompileError::UnresolvableReference {
                table: current.name.clone(),
                reference: reference.to_string(),
                context: format!("unknown join '{}'", name),
            })?;
            current = self.model.table(&join.table).ok_or_else(|| {
                CompileError::UnresolvableReference {
                    table: current.name.clone(),
                    reference: reference.to_string(),
                    context: format!("join '{}' targets unknown table '{}'", name, join.table),
                }
            })?;
            path.push(name.clone());
        }
        Ok((current, path))
    }

    #[allow(clippy::too_many_arguments)]
    fn column_frame(
        &self,
        table: &'a Table,
        path: Vec<String>,
        name: &str,
        pinned: &Arguments,
        invoking: &Arguments,
        mut grain: Option<TimeGrain>,
        reference: &str,
    ) -> CompileResult<Frame<'a>> {
        let column = table
            .get_column(name)
            .ok_or_else(|| CompileError::UnresolvableReference {
                table: table.name.clone(),
                reference: reference.to_string(),
                context: format!("unknown column '{}'", name),
            })?;
        let qualified = format!("{}.{}", table.name, column.name);

        let mut arguments = Arguments::new();
        for decl in &column.arguments {
            let value = pinned
                .get(&decl.name)
                .or_else(|| invoking.get(&decl.name))
                .cloned()
                .or_else(|| decl.default.clone());
            if let Some(value) = value {
                decl.validate(&value)
                    .map_err(|reason| CompileError::InvalidArgument {
                        column: qualified.clone(),
                        argument: decl.name.clone(),
                        reason,
                    })?;
                arguments.insert(decl.name.clone(), value);
            }
        }

        for (key, value) in pinned {
            if column.argument(key).is_some() {
                continue;
            }
            if key == "grain" && column.is_time_dimension() {
                grain = Some(value.parse().map_err(|reason| CompileError::InvalidArgument {
                    column: qualified.clone(),
                    argument: key.clone(),
                    reason,
                })?);
            } else {
                return Err(CompileError::InvalidArgument {
                    column: qualified.clone(),
                    argument: key.clone(),
                    reason: "not declared by the column".into(),
                });
            }
        }

        if let Some(g) = grain {
            if column.grain(g).is_none() {
                return Err(CompileError::InvalidArgument {
                    column: qualified,
                    argument: "grain".into(),
                    reason: format!("grain '{}' is not declared", g),
                });
            }
        }

        let segments =
            template::parse(&column.formula).map_err(|reason| CompileError::UnresolvableReference {
                table: table.name.clone(),
                reference: column.name.clone(),
                context: format!("unparseable template: {}", reason),
            })?;

        let alias = self.alias_for_table_path(table, &path);
        let signature = signature(&arguments, grain);
        Ok(Frame {
            table,
            label: format!("{}.{}", alias, column.name),
            key: Some((alias, column.name.clone(), signature)),
            path,
            column: Some(column),
            arguments,
            segments,
            pos: 0,
            out: String::new(),
            base: None,
            pending_grain: grain,
        })
    }

    /// Frame keys only need to be unique per compilation, so the unshortened
    /// path is enough.
    fn alias_for_table_path(&self, table: &Table, path: &[String]) -> String {
        if path.is_empty() {
            table.name.clone()
        } else {
            path.join("_")
        }
    }

    /// Wrap a finished base expansion in its grain.
    fn grain_step(&self, frame: &Frame<'a>, grain: TimeGrain) -> CompileResult<Step<'a>> {
        let Some(column) = frame.column else {
            return Ok(Step::Text(frame.out.clone()));
        };
        let override_formula = column.grain(grain).and_then(|g| g.formula.clone());
        match override_formula {
            Some(formula) => {
                let segments = template::parse(&formula).map_err(|reason| {
                    CompileError::UnresolvableReference {
                        table: frame.table.name.clone(),
                        reference: format!("{}[grain:{}]", column.name, grain),
                        context: format!("unparseable template: {}", reason),
                    }
                })?;
                Ok(Step::Push(Frame {
                    table: frame.table,
                    path: frame.path.clone(),
                    column: frame.column,
                    arguments: frame.arguments.clone(),
                    segments,
                    pos: 0,
                    out: String::new(),
                    base: Some(frame.out.clone()),
                    pending_grain: None,
                    key: frame.key.clone(),
                    label: format!("{}[{}]", frame.label, grain),
                }))
            }
            None => self
                .dialect
                .truncate_time(grain, &frame.out)
                .map(Step::Text)
                .ok_or_else(|| CompileError::UnsupportedByDialect {
                    dialect: self.dialect.to_string(),
                    feature: format!("{} grain on '{}'", grain, column.name),
                }),
        }
    }
}

/// Canonical argument signature: sorted `name=value` pairs plus the grain.
pub fn signature(arguments: &Arguments, grain: Option<TimeGrain>) -> String {
    let mut sig = arguments
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    if let Some(g) = grain {
        if !sig.is_empty() {
            sig.push(',');
        }
        sig.push_str("@grain=");
        sig.push_str(g.as_str());
    }
    sig
}

/// Shorten an identifier to the dialect limit, keeping a readable prefix and
/// a SHA-256 suffix of the full name.
pub fn fit_identifier(name: &str, dialect: Dialect) -> String {
    match dialect.max_identifier_length() {
        Some(limit) if name.len() > limit => {
            let keep = limit.saturating_sub(9);
            let mut end = keep.min(name.len());
            while !name.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}_{}", &name[..end], short_hash(name))
        }
        _ => name.to_string(),
    }
}

fn record_prefixes(joins: &mut BTreeSet<Vec<String>>, path: &[String]) {
    for i in 1..=path.len() {
        joins.insert(path[..i].to_vec());
    }
}

fn display_path(path: &[String], last: &str) -> String {
    if path.is_empty() {
        last.to_string()
    } else {
        format!("{}.{}", path.join("."), last)
    }
}
