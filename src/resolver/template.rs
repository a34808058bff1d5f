//! Formula template parsing.
//!
//! A formula is SQL text with `{{ ... }}` placeholders:
//!
//! ```text
//! {{$physical}}                       physical column of the current table
//! {{logical}}                         another column of the current table
//! {{rel.column}} {{a.b.$physical}}    column reached through joins
//! {{sql from='rel' column='c[k:v]'}}  column with pinned arguments
//! {{$$column.args.name}}              argument of the column being expanded
//! {{$$table.args.name}}               argument of the current table
//! {{$$column.expr}}                   base expansion, inside grain formulas
//! ```

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{(.*?)\}\}").expect("placeholder pattern is valid"));

static HELPER_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\w+)\s*=\s*'([^']*)'").expect("helper attribute pattern is valid")
});

static HELPER_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)((?:\[[^\]]*\])*)$").expect("helper column pattern is valid")
});

static PINNED_ARG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([A-Za-z_][A-Za-z0-9_]*):([^\]]*)\]").expect("pinned argument pattern is valid")
});

static IDENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// The column a reference lands on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// A logical column, expanded recursively.
    Logical(String),
    /// A physical column, quoted as-is.
    Physical(String),
}

/// One piece of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// Column reference, possibly through joins.
    Reference {
        joins: Vec<String>,
        target: Target,
    },
    /// `{{sql ...}}` helper with pinned arguments.
    Helper {
        joins: Vec<String>,
        column: String,
        pinned: BTreeMap<String, String>,
    },
    ColumnArg(String),
    TableArg(String),
    ColumnExpr,
}

/// Parse a template into segments. Errors carry a human-readable reason.
pub fn parse(template: &str) -> Result<Vec<Segment>, String> {
    let mut segments = Vec::new();
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        push_literal(&mut segments, &template[last..whole.start()])?;
        segments.push(parse_placeholder(inner.as_str().trim())?);
        last = whole.end();
    }
    push_literal(&mut segments, &template[last..])?;

    Ok(segments)
}

fn push_literal(segments: &mut Vec<Segment>, text: &str) -> Result<(), String> {
    if text.contains("{{") || text.contains("}}") {
        return Err(format!("unbalanced placeholder braces in '{}'", text));
    }
    if !text.is_empty() {
        segments.push(Segment::Literal(text.to_string()));
    }
    Ok(())
}

fn parse_placeholder(inner: &str) -> Result<Segment, String> {
    if let Some(name) = inner.strip_prefix("$$column.args.") {
        return ident(name).map(|n| Segment::ColumnArg(n.to_string()));
    }
    if let Some(name) = inner.strip_prefix("$$table.args.") {
        return ident(name).map(|n| Segment::TableArg(n.to_string()));
    }
    if inner == "$$column.expr" {
        return Ok(Segment::ColumnExpr);
    }
    if inner.starts_with("$$") {
        return Err(format!("unknown context reference '{{{{{}}}}}'", inner));
    }
    if let Some(attrs) = inner.strip_prefix("sql ") {
        return parse_helper(attrs);
    }
    parse_path(inner)
}

fn ident(s: &str) -> Result<&str, String> {
    if IDENT.is_match(s) {
        Ok(s)
    } else {
        Err(format!("'{}' is not a valid identifier", s))
    }
}

fn parse_path(inner: &str) -> Result<Segment, String> {
    let parts: Vec<&str> = inner.split('.').collect();
    let Some((last, joins)) = parts.split_last() else {
        return Err("empty placeholder".into());
    };
    let joins = joins
        .iter()
        .map(|j| ident(j).map(str::to_string))
        .collect::<Result<Vec<_>, _>>()?;
    let target = match last.strip_prefix('$') {
        Some(physical) => Target::Physical(ident(physical)?.to_string()),
        None => Target::Logical(ident(last)?.to_string()),
    };
    Ok(Segment::Reference { joins, target })
}

fn parse_helper(attrs: &str) -> Result<Segment, String> {
    let mut from = None;
    let mut column = None;
    for caps in HELPER_ATTR.captures_iter(attrs) {
        match (&caps[1], caps[2].trim()) {
            ("from", v) => from = Some(v.to_string()),
            ("column", v) => column = Some(v.to_string()),
            (other, _) => return Err(format!("unknown sql helper attribute '{}'", other)),
        }
    }
    let column = column.ok_or("sql helper requires a column attribute")?;

    let joins = match from.as_deref() {
        None | Some("") => Vec::new(),
        Some(path) => path
            .split('.')
            .map(|j| ident(j).map(str::to_string))
            .collect::<Result<Vec<_>, _>>()?,
    };

    let caps = HELPER_COLUMN
        .captures(&column)
        .ok_or_else(|| format!("malformed helper column '{}'", column))?;
    let name = caps[1].to_string();
    let mut pinned = BTreeMap::new();
    if let Some(args) = caps.get(2) {
        for arg in PINNED_ARG.captures_iter(args.as_str()) {
            pinned.insert(arg[1].to_string(), arg[2].trim().to_string());
        }
    }

    Ok(Segment::Helper {
        joins,
        column: name,
        pinned,
    })
}
