//! Dependency-ordered evaluation of globals statements.
//!
//! Resolution for a directory works in four phases:
//!
//! 1. collect the statements visible from the directory up to the root,
//!    dropping statements shadowed by closer scopes;
//! 2. order them canonically (root scope first, shorter paths first,
//!    declaration order last) so evaluation is deterministic;
//! 3. run a fixed point over the pending set: a statement only evaluates
//!    once no pending statement could still affect any subtree its rhs
//!    references (so `global.use[k]` waits for every pending `use.*`
//!    binding, not just `use` itself);
//! 4. apply `unset` deletions.
//!
//! Errors are collected per lhs path; a failing statement never stops its
//! siblings, and statements left pending when the fixed point stalls are
//! reported as cycles.

use crate::error::{ErrorCollector, Origin, Result, TerrastackError};
use crate::eval::{Evaluator, Frame};
use crate::globals::stmt::{MapBlock, MapEntry, MapValue, Rhs, Statement};
use crate::project::ProjectPath;
use crate::tree::Root;
use hcl::Value;
use serde::Serialize;
use std::sync::Arc;

type Map = hcl::value::Map<String, Value>;

/// The outcome of resolving globals for one directory: the evaluated
/// object tree plus every error keyed by the lhs path it belongs to.
#[derive(Debug, Serialize)]
pub struct EvalReport {
    /// The evaluated `global` object. Paths whose statements failed are
    /// simply absent.
    pub globals: Value,
    /// Errors keyed by dotted lhs path (`global.a.b`).
    #[serde(skip)]
    pub errors: Vec<(String, TerrastackError)>,
}

impl EvalReport {
    /// Whether every visible statement evaluated.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Reads a value by dotted path (`a.b` or `global.a.b`). Returns
    /// `None` for unset or failed paths.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        let path = path.strip_prefix("global.").unwrap_or(path);
        let mut current = &self.globals;
        for comp in path.split('.') {
            match current {
                Value::Object(map) => current = map.get(comp)?,
                _ => return None,
            }
        }
        Some(current)
    }

    /// The errors recorded for one dotted path.
    #[must_use]
    pub fn errors_for(&self, path: &str) -> Vec<&TerrastackError> {
        self.errors.iter().filter(|(p, _)| p == path).map(|(_, e)| e).collect()
    }

    /// Folds the report into a result: the evaluated globals, or the
    /// aggregated error set.
    ///
    /// # Errors
    ///
    /// A single statement error, or `Multiple` preserving all of them.
    pub fn into_result(self) -> Result<Value> {
        let mut collector = ErrorCollector::new();
        for (_, error) in self.errors {
            collector.add(error);
        }
        collector.into_result()?;
        Ok(self.globals)
    }
}

struct Item<'a> {
    stmt: &'a Statement,
    depth: usize,
    refs: Vec<Vec<String>>,
}

/// Resolves the globals visible at `dir`. The evaluator carries the
/// caller's namespaces (`terrastack`) and function table; the `global`
/// namespace is managed here.
pub(crate) fn resolve(root: &Root, dir: &ProjectPath, evaluator: &mut Evaluator) -> EvalReport {
    let chain = dir.chain_from_root();
    let lowered: Vec<_> = chain.iter().map(|d| root.lowered_globals(d)).collect();

    let mut errors: Vec<(String, TerrastackError)> = Vec::new();
    for scope in &lowered {
        for issue in &scope.issues {
            errors.push((issue.path.clone(), issue.to_error()));
        }
    }

    let items = visible_statements(&lowered);
    tracing::debug!(dir = %dir, statements = items.len(), "resolving globals");

    let mut tree = Map::new();
    let mut deletions: Vec<Vec<String>> = Vec::new();
    let mut resolved = vec![false; items.len()];

    loop {
        let mut progressed = false;
        for i in 0..items.len() {
            if resolved[i] || !is_ready(i, &items, &resolved) {
                continue;
            }
            resolved[i] = true;
            progressed = true;
            if let Err(error) = evaluate_statement(evaluator, &mut tree, &mut deletions, items[i].stmt)
            {
                errors.push((items[i].stmt.dotted_lhs(), error));
            }
        }
        if !progressed {
            break;
        }
    }

    // Whatever is still pending is stuck on other pending statements: a
    // dependency cycle. Statements outside the cycle have already
    // evaluated.
    for (i, item) in items.iter().enumerate() {
        if !resolved[i] {
            errors.push((
                item.stmt.dotted_lhs(),
                TerrastackError::Cycle {
                    path: item.stmt.dotted_lhs(),
                    origin: item.stmt.origin.clone(),
                },
            ));
        }
    }

    for path in &deletions {
        delete_path(&mut tree, path);
    }

    EvalReport { globals: Value::Object(tree), errors }
}

/// Collects statements from every scope on the chain, dropping those
/// shadowed by a closer scope. A closer *binding* statement shadows any
/// farther statement whose lhs it equals or prefixes; extend statements
/// never shadow.
fn visible_statements(lowered: &[Arc<crate::globals::stmt::LoweredDir>]) -> Vec<Item<'_>> {
    let mut items = Vec::new();
    for (depth, scope) in lowered.iter().enumerate() {
        'statements: for stmt in &scope.statements {
            for closer_scope in &lowered[depth + 1..] {
                for closer in &closer_scope.statements {
                    if closer.is_binding() && is_prefix(&closer.lhs, &stmt.lhs) {
                        tracing::trace!(
                            path = %stmt.dotted_lhs(),
                            scope = %stmt.scope,
                            shadowed_by = %closer.scope,
                            "statement shadowed"
                        );
                        continue 'statements;
                    }
                }
            }
            let refs = stmt.references();
            items.push(Item { stmt, depth, refs });
        }
    }
    items.sort_by(|a, b| {
        (a.depth, a.stmt.lhs.len(), a.stmt.decl).cmp(&(b.depth, b.stmt.lhs.len(), b.stmt.decl))
    });
    items
}

fn is_prefix(prefix: &[String], path: &[String]) -> bool {
    prefix.len() <= path.len() && prefix.iter().zip(path).all(|(a, b)| a == b)
}

fn prefix_related(a: &[String], b: &[String]) -> bool {
    is_prefix(a, b) || is_prefix(b, a)
}

/// A statement is ready when (a) no pending binding still has to
/// materialize an ancestor of its lhs, and (b) no pending statement could
/// still affect a subtree its rhs references. The reference check
/// includes the statement itself, which turns self-references into
/// cycles.
fn is_ready(i: usize, items: &[Item<'_>], resolved: &[bool]) -> bool {
    for (j, other) in items.iter().enumerate() {
        if resolved[j] {
            continue;
        }
        if j != i
            && matches!(other.stmt.rhs, Rhs::Expr(_) | Rhs::Map(_))
            && other.stmt.lhs.len() < items[i].stmt.lhs.len()
            && is_prefix(&other.stmt.lhs, &items[i].stmt.lhs)
        {
            return false;
        }
        for reference in &items[i].refs {
            if prefix_related(&other.stmt.lhs, reference) {
                return false;
            }
        }
    }
    true
}

fn evaluate_statement(
    evaluator: &mut Evaluator,
    tree: &mut Map,
    deletions: &mut Vec<Vec<String>>,
    stmt: &Statement,
) -> Result<()> {
    match &stmt.rhs {
        Rhs::Unset => {
            deletions.push(stmt.lhs.clone());
            Ok(())
        }
        Rhs::Extend => {
            descend(tree, &stmt.lhs, &stmt.dotted_lhs(), &stmt.origin)?;
            Ok(())
        }
        Rhs::Expr(expr) => {
            evaluator.set_namespace("global", Value::Object(tree.clone()));
            let value = evaluator.eval(expr)?;
            let (last, prefix) = stmt
                .lhs
                .split_last()
                .ok_or_else(|| TerrastackError::internal("statement with empty lhs"))?;
            let target = descend(tree, prefix, &stmt.dotted_lhs(), &stmt.origin)?;
            target.insert(last.clone(), value);
            Ok(())
        }
        Rhs::Map(map) => {
            evaluator.set_namespace("global", Value::Object(tree.clone()));
            let target = descend(tree, &stmt.lhs, &stmt.dotted_lhs(), &stmt.origin)?;
            generate_map(evaluator, target, map, &[])
        }
    }
}

/// Walks `path` inside `tree`, materializing missing intermediate objects.
/// A non-object on the way is a `CannotExtendObject` for `dotted`.
fn descend<'a>(
    tree: &'a mut Map,
    path: &[String],
    dotted: &str,
    origin: &Origin,
) -> Result<&'a mut Map> {
    let mut current = tree;
    for comp in path {
        if !current.contains_key(comp) {
            current.insert(comp.clone(), Value::Object(Map::new()));
        }
        match current.get_mut(comp) {
            Some(Value::Object(next)) => current = next,
            Some(_) => {
                return Err(TerrastackError::CannotExtendObject {
                    path: dotted.to_string(),
                    origin: origin.clone(),
                })
            }
            None => return Err(TerrastackError::internal("map entry vanished during descent")),
        }
    }
    Ok(current)
}

/// Runs one `map` generator into `out`. `frames` carries enclosing
/// iterator scopes for nested generators.
fn generate_map(
    evaluator: &Evaluator,
    out: &mut Map,
    map: &MapBlock,
    frames: &[Frame],
) -> Result<()> {
    let for_each = evaluator.eval_with_frames(&map.for_each, frames)?;
    let Value::Array(elements) = for_each else {
        return Err(TerrastackError::eval(
            "for_each must evaluate to a list",
            map.for_each.origin().clone(),
        ));
    };

    for element in elements {
        let mut iterator = Map::new();
        iterator.insert("new".to_string(), element.clone());

        let mut key_frames = frames.to_vec();
        key_frames.push(iterator_frame(&map.iterator, iterator.clone()));
        let key = match evaluator.eval_with_frames(&map.key, &key_frames)? {
            Value::String(key) => key,
            other => {
                return Err(TerrastackError::eval(
                    format!("map key must be a string, got {other:?}"),
                    map.key.origin().clone(),
                ))
            }
        };

        // `old` is the value already bound at this key during this
        // generation, undefined on first touch.
        if let Some(old) = out.get(&key) {
            iterator.insert("old".to_string(), old.clone());
        }
        let mut value_frames = frames.to_vec();
        value_frames.push(iterator_frame(&map.iterator, iterator));

        let value = match &map.value {
            MapValue::Single(expr) => evaluator.eval_with_frames(expr, &value_frames)?,
            MapValue::Object(entries) => {
                let mut object = Map::new();
                for entry in entries {
                    match entry {
                        MapEntry::Attr(name, expr) => {
                            let value = evaluator.eval_with_frames(expr, &value_frames)?;
                            object.insert(name.clone(), value);
                        }
                        MapEntry::Map(nested) => {
                            let mut nested_out = Map::new();
                            generate_map(evaluator, &mut nested_out, nested, &value_frames)?;
                            object.insert(nested.label.clone(), Value::Object(nested_out));
                        }
                    }
                }
                Value::Object(object)
            }
        };

        out.insert(key, value);
    }
    Ok(())
}

fn iterator_frame(name: &str, iterator: Map) -> Frame {
    let mut frame = Frame::new();
    frame.insert(name.to_string(), Value::Object(iterator));
    frame
}

/// Deletes the leaf at `path`, silently ignoring missing intermediates.
fn delete_path(tree: &mut Map, path: &[String]) {
    let Some((last, prefix)) = path.split_last() else {
        return;
    };
    let mut current = tree;
    for comp in prefix {
        match current.get_mut(comp) {
            Some(Value::Object(next)) => current = next,
            _ => return,
        }
    }
    // Rebuild without the deleted key; keeps us independent of the map
    // implementation's removal semantics.
    let entries = std::mem::take(current);
    for (key, value) in entries {
        if key != *last {
            current.insert(key, value);
        }
    }
}
