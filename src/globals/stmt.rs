//! Lowering of `globals` blocks to statements.
//!
//! Statements are the sole unit the globals engine manipulates: a flat
//! ordered list of `(lhs path, rhs)` records per directory, where the lhs
//! is the fully-qualified dotted path under the `global` namespace. Block
//! labels contribute path prefixes; an empty labeled block lowers to an
//! `extend` statement; the `unset` bareword lowers to a delete statement;
//! nested `map` blocks lower to generator statements.
//!
//! Lowering never aborts on the first problem: schema violations and
//! redefinitions are collected as issues keyed by the offending path, so
//! one bad binding does not hide its siblings.

use crate::error::{Origin, TerrastackError};
use crate::project::ProjectPath;
use crate::tree::{DirConfig, Expr, RawBlock, RefPath};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn ident_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^[a-zA-Z_][a-zA-Z0-9_-]*$").unwrap())
}

/// The default iterator namespace of `map` blocks.
pub const DEFAULT_ITERATOR: &str = "element";

/// The right-hand side of a statement.
#[derive(Debug, Clone)]
pub enum Rhs {
    /// Bind the lhs to the value of an expression.
    Expr(Expr),
    /// Guarantee the lhs exists as an object without binding keys.
    Extend,
    /// Delete the lhs binding for this scope's descendants.
    Unset,
    /// Generate one key per `for_each` element under the lhs.
    Map(MapBlock),
}

/// A lowered `map` generator block.
#[derive(Debug, Clone)]
pub struct MapBlock {
    /// The key bound under the enclosing scope.
    pub label: String,
    /// Must evaluate to a list; iterated in input order.
    pub for_each: Expr,
    /// Iterator namespace name (`element` unless overridden).
    pub iterator: String,
    /// Key expression, evaluated per element; must yield a string.
    pub key: Expr,
    /// Value expression or long-form object.
    pub value: MapValue,
    /// The block's declaration site.
    pub origin: Origin,
}

/// The value form of a `map` block.
#[derive(Debug, Clone)]
pub enum MapValue {
    /// `value = <expr>`.
    Single(Expr),
    /// `value { ... }` with attributes and nested generators.
    Object(Vec<MapEntry>),
}

/// One entry of a long-form `value { ... }` body.
#[derive(Debug, Clone)]
pub enum MapEntry {
    /// A plain attribute.
    Attr(String, Expr),
    /// A nested generator.
    Map(MapBlock),
}

/// One lowered statement.
#[derive(Debug, Clone)]
pub struct Statement {
    /// Path components under the `global` namespace.
    pub lhs: Vec<String>,
    /// What to do at the path.
    pub rhs: Rhs,
    /// The directory the statement was declared at.
    pub scope: ProjectPath,
    /// Declaration site.
    pub origin: Origin,
    /// Declaration index within the scope, for stable ordering.
    pub decl: usize,
}

impl Statement {
    /// The dotted rendering of the lhs, including the namespace root.
    #[must_use]
    pub fn dotted_lhs(&self) -> String {
        let mut out = String::from("global");
        for comp in &self.lhs {
            out.push('.');
            out.push_str(comp);
        }
        out
    }

    /// Whether this statement binds (or deletes) its path. Extend
    /// statements only materialize objects and never conflict or shadow.
    #[must_use]
    pub fn is_binding(&self) -> bool {
        !matches!(self.rhs, Rhs::Extend)
    }

    /// Every `global.…` reference the rhs depends on.
    #[must_use]
    pub fn references(&self) -> Vec<Vec<String>> {
        let mut refs = Vec::new();
        match &self.rhs {
            Rhs::Expr(expr) => collect_global_refs(expr, &mut refs),
            Rhs::Extend | Rhs::Unset => {}
            Rhs::Map(map) => collect_map_refs(map, &mut refs),
        }
        refs
    }
}

fn collect_global_refs(expr: &Expr, out: &mut Vec<Vec<String>>) {
    for RefPath { root, path } in expr.variables() {
        if root == "global" {
            out.push(path);
        }
    }
}

fn collect_map_refs(map: &MapBlock, out: &mut Vec<Vec<String>>) {
    collect_global_refs(&map.for_each, out);
    collect_global_refs(&map.key, out);
    match &map.value {
        MapValue::Single(expr) => collect_global_refs(expr, out),
        MapValue::Object(entries) => {
            for entry in entries {
                match entry {
                    MapEntry::Attr(_, expr) => collect_global_refs(expr, out),
                    MapEntry::Map(nested) => collect_map_refs(nested, out),
                }
            }
        }
    }
}

/// A lowering problem, kept in a clonable form so cached lowering results
/// can be shared across resolutions.
#[derive(Debug, Clone)]
pub struct Issue {
    /// The dotted path the issue is keyed by.
    pub path: String,
    /// What went wrong.
    pub kind: IssueKind,
    /// Declaration site of the offending item.
    pub origin: Origin,
    /// First definition site, for redefinitions.
    pub previous: Option<Origin>,
    /// Human-readable message for schema issues.
    pub message: String,
}

/// The kind of a lowering [`Issue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueKind {
    /// Malformed block structure.
    Schema,
    /// Same path bound twice in the same scope.
    Redefined,
}

impl Issue {
    /// Materializes the issue as an error.
    #[must_use]
    pub fn to_error(&self) -> TerrastackError {
        match self.kind {
            IssueKind::Schema => TerrastackError::Schema {
                file: self.origin.file.clone(),
                message: self.message.clone(),
            },
            IssueKind::Redefined => TerrastackError::Redefined {
                path: self.path.clone(),
                origin: self.origin.clone(),
                previous: self.previous.clone().unwrap_or_else(Origin::synthetic),
            },
        }
    }
}

/// The lowering result of one directory.
#[derive(Debug, Clone, Default)]
pub struct LoweredDir {
    /// Statements in declaration order.
    pub statements: Vec<Statement>,
    /// Collected schema/redefinition issues.
    pub issues: Vec<Issue>,
}

/// Lowers every `globals` block of a directory.
#[must_use]
pub fn lower_dir(dir: &ProjectPath, cfg: &DirConfig) -> LoweredDir {
    let mut lowered = LoweredDir::default();
    // Binding statements seen so far, for same-scope redefinition checks.
    let mut seen: HashMap<String, Origin> = HashMap::new();
    let mut decl = 0usize;

    for block in &cfg.globals {
        lower_block(dir, block, &mut lowered, &mut seen, &mut decl);
    }

    tracing::trace!(
        dir = %dir,
        statements = lowered.statements.len(),
        issues = lowered.issues.len(),
        "lowered globals blocks"
    );
    lowered
}

fn lower_block(
    dir: &ProjectPath,
    block: &RawBlock,
    lowered: &mut LoweredDir,
    seen: &mut HashMap<String, Origin>,
    decl: &mut usize,
) {
    if let Err(issue) = validate_labels(&block.labels, &block.origin) {
        lowered.issues.push(issue);
        return;
    }
    let base: Vec<String> = block.labels.clone();

    let mut produced = false;

    for (name, expr) in &block.attrs {
        produced = true;
        let mut lhs = base.clone();
        lhs.push(name.clone());
        let rhs = if expr.is_unset_keyword() { Rhs::Unset } else { Rhs::Expr(expr.clone()) };
        push_binding(dir, lhs, rhs, expr.origin().clone(), lowered, seen, decl);
    }

    for nested in &block.nested {
        produced = true;
        if nested.kind != "map" {
            lowered.issues.push(Issue {
                path: dotted(&base),
                kind: IssueKind::Schema,
                origin: nested.origin.clone(),
                previous: None,
                message: format!("unexpected block '{}' inside globals", nested.kind),
            });
            continue;
        }
        match lower_map(nested) {
            Ok(map) => {
                let mut lhs = base.clone();
                lhs.push(map.label.clone());
                push_binding(dir, lhs, Rhs::Map(map), nested.origin.clone(), lowered, seen, decl);
            }
            Err(issue) => lowered.issues.push(issue),
        }
    }

    // An empty labeled block guarantees the subpath exists as an object.
    if !produced && !base.is_empty() {
        lowered.statements.push(Statement {
            lhs: base,
            rhs: Rhs::Extend,
            scope: dir.clone(),
            origin: block.origin.clone(),
            decl: *decl,
        });
        *decl += 1;
    }
}

fn push_binding(
    dir: &ProjectPath,
    lhs: Vec<String>,
    rhs: Rhs,
    origin: Origin,
    lowered: &mut LoweredDir,
    seen: &mut HashMap<String, Origin>,
    decl: &mut usize,
) {
    let path = dotted(&lhs);
    if let Some(previous) = seen.get(&path) {
        lowered.issues.push(Issue {
            path,
            kind: IssueKind::Redefined,
            origin,
            previous: Some(previous.clone()),
            message: String::new(),
        });
        return;
    }
    seen.insert(path, origin.clone());
    lowered.statements.push(Statement { lhs, rhs, scope: dir.clone(), origin, decl: *decl });
    *decl += 1;
}

fn validate_labels(labels: &[String], origin: &Origin) -> Result<(), Issue> {
    let Some(first) = labels.first() else {
        return Ok(());
    };
    if !ident_regex().is_match(first) {
        return Err(Issue {
            path: dotted(labels),
            kind: IssueKind::Schema,
            origin: origin.clone(),
            previous: None,
            message: format!("first label '{first}' must be a valid identifier"),
        });
    }
    for inner in &labels[1..] {
        if inner.is_empty() {
            return Err(Issue {
                path: dotted(labels),
                kind: IssueKind::Schema,
                origin: origin.clone(),
                previous: None,
                message: "labels must not be empty".to_string(),
            });
        }
    }
    Ok(())
}

fn lower_map(block: &RawBlock) -> Result<MapBlock, Issue> {
    let schema = |message: String| Issue {
        path: dotted(&block.labels),
        kind: IssueKind::Schema,
        origin: block.origin.clone(),
        previous: None,
        message,
    };

    if block.labels.len() != 1 {
        return Err(schema("map blocks take exactly one label".to_string()));
    }
    let label = block.labels[0].clone();
    if !ident_regex().is_match(&label) {
        return Err(schema(format!("map label '{label}' must be a valid identifier")));
    }

    let mut for_each = None;
    let mut key = None;
    let mut value_expr = None;
    let mut iterator = DEFAULT_ITERATOR.to_string();

    for (name, expr) in &block.attrs {
        match name.as_str() {
            "for_each" => for_each = Some(expr.clone()),
            "key" => key = Some(expr.clone()),
            "value" => value_expr = Some(expr.clone()),
            "iterator" => match expr.as_expression() {
                hcl::Expression::Variable(v) => iterator = v.as_str().to_string(),
                _ => return Err(schema("iterator must be a bare identifier".to_string())),
            },
            other => return Err(schema(format!("unknown map attribute '{other}'"))),
        }
    }

    let mut value_block = None;
    for nested in &block.nested {
        if nested.kind != "value" {
            return Err(schema(format!("unexpected block '{}' inside map", nested.kind)));
        }
        if value_block.is_some() {
            return Err(schema("map takes at most one value block".to_string()));
        }
        value_block = Some(lower_value_block(nested)?);
    }

    let value = match (value_expr, value_block) {
        (Some(expr), None) => MapValue::Single(expr),
        (None, Some(entries)) => MapValue::Object(entries),
        (Some(_), Some(_)) => {
            return Err(schema("map cannot have both a value attribute and a value block".to_string()))
        }
        (None, None) => return Err(schema("map requires a value attribute or value block".to_string())),
    };

    let for_each = for_each.ok_or_else(|| schema("map requires for_each".to_string()))?;
    let key = key.ok_or_else(|| schema("map requires key".to_string()))?;

    Ok(MapBlock { label, for_each, iterator, key, value, origin: block.origin.clone() })
}

fn lower_value_block(block: &RawBlock) -> Result<Vec<MapEntry>, Issue> {
    if !block.labels.is_empty() {
        return Err(Issue {
            path: dotted(&block.labels),
            kind: IssueKind::Schema,
            origin: block.origin.clone(),
            previous: None,
            message: "value blocks do not take labels".to_string(),
        });
    }
    let mut entries = Vec::new();
    for (name, expr) in &block.attrs {
        entries.push(MapEntry::Attr(name.clone(), expr.clone()));
    }
    for nested in &block.nested {
        if nested.kind != "map" {
            return Err(Issue {
                path: String::new(),
                kind: IssueKind::Schema,
                origin: nested.origin.clone(),
                previous: None,
                message: format!("unexpected block '{}' inside value", nested.kind),
            });
        }
        entries.push(MapEntry::Map(lower_map(nested)?));
    }
    Ok(entries)
}

fn dotted(path: &[String]) -> String {
    let mut out = String::from("global");
    for comp in path {
        out.push('.');
        out.push_str(comp);
    }
    out
}
