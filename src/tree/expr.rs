//! Retained configuration expressions.
//!
//! Attribute expressions are kept post-parse as [`Expr`]: the raw
//! `hcl::Expression` plus the origin it was declared at. Expressions are
//! opaque to the rest of the crate except for two operations: evaluation
//! (see [`crate::eval`]) and [`Expr::variables`], which extracts the set of
//! namespace traversals the expression references. The globals engine
//! drives its dependency ordering entirely off that extraction.

use crate::error::Origin;
use hcl::expr::{
    Expression, ForExpr, ObjectKey, Operation, TemplateExpr, Traversal, TraversalOperator,
};
use hcl::template::{Directive, Element, Template};

/// The reserved bareword marking a globals binding for deletion.
pub const UNSET_KEYWORD: &str = "unset";

/// A parsed expression plus its declaration site.
#[derive(Debug, Clone)]
pub struct Expr {
    expr: Expression,
    origin: Origin,
}

/// A namespace traversal referenced by an expression: a root identifier and
/// the dotted/indexed path below it, e.g. `global.a.b` or `global.use["aws"]`.
///
/// Only statically-known components are kept: a dynamic index truncates the
/// path at the point it appears, which makes the reference cover the whole
/// subtree below the truncation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefPath {
    /// The root identifier (`global`, `terrastack`, an iterator name, ...).
    pub root: String,
    /// Statically-known components below the root.
    pub path: Vec<String>,
}

impl RefPath {
    /// The dotted rendering, e.g. `global.a.b`.
    #[must_use]
    pub fn dotted(&self) -> String {
        let mut out = self.root.clone();
        for comp in &self.path {
            out.push('.');
            out.push_str(comp);
        }
        out
    }
}

impl Expr {
    /// Wraps a parsed expression with its origin.
    #[must_use]
    pub fn new(expr: Expression, origin: Origin) -> Self {
        Self { expr, origin }
    }

    /// The declaration site.
    #[must_use]
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// The underlying HCL expression.
    #[must_use]
    pub fn as_expression(&self) -> &Expression {
        &self.expr
    }

    /// Whether this expression is exactly the reserved `unset` bareword.
    #[must_use]
    pub fn is_unset_keyword(&self) -> bool {
        matches!(&self.expr, Expression::Variable(v) if v.as_str() == UNSET_KEYWORD)
    }

    /// The literal string value, when the expression is a plain quoted
    /// string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.expr {
            Expression::String(s) => Some(s),
            _ => None,
        }
    }

    /// Every namespace traversal this expression references.
    ///
    /// Variables bound by `for` expressions and template directives are
    /// excluded. Dynamic indexes truncate the recorded path but their index
    /// expressions are themselves scanned for references.
    #[must_use]
    pub fn variables(&self) -> Vec<RefPath> {
        let mut out = Vec::new();
        let mut bound = Vec::new();
        collect_refs(&self.expr, &mut bound, &mut out);
        out
    }
}

fn collect_refs(expr: &Expression, bound: &mut Vec<String>, out: &mut Vec<RefPath>) {
    match expr {
        Expression::Null | Expression::Bool(_) | Expression::Number(_) | Expression::String(_) => {}
        Expression::Array(items) => {
            for item in items {
                collect_refs(item, bound, out);
            }
        }
        Expression::Object(object) => {
            for (key, value) in object {
                if let ObjectKey::Expression(key_expr) = key {
                    collect_refs(key_expr, bound, out);
                }
                collect_refs(value, bound, out);
            }
        }
        Expression::TemplateExpr(template) => collect_template_refs(template, bound, out),
        Expression::Variable(var) => {
            let name = var.as_str();
            if !bound.iter().any(|b| b == name) {
                out.push(RefPath { root: name.to_string(), path: Vec::new() });
            }
        }
        Expression::Traversal(traversal) => collect_traversal_refs(traversal, bound, out),
        Expression::FuncCall(call) => {
            for arg in &call.args {
                collect_refs(arg, bound, out);
            }
        }
        Expression::Parenthesis(inner) => collect_refs(inner, bound, out),
        Expression::Conditional(cond) => {
            collect_refs(&cond.cond_expr, bound, out);
            collect_refs(&cond.true_expr, bound, out);
            collect_refs(&cond.false_expr, bound, out);
        }
        Expression::Operation(op) => match op.as_ref() {
            Operation::Unary(unary) => collect_refs(&unary.expr, bound, out),
            Operation::Binary(binary) => {
                collect_refs(&binary.lhs_expr, bound, out);
                collect_refs(&binary.rhs_expr, bound, out);
            }
        },
        Expression::ForExpr(for_expr) => collect_for_refs(for_expr, bound, out),
        _ => {}
    }
}

fn collect_for_refs(for_expr: &ForExpr, bound: &mut Vec<String>, out: &mut Vec<RefPath>) {
    collect_refs(&for_expr.collection_expr, bound, out);

    let mut pushed = 0;
    if let Some(key_var) = &for_expr.key_var {
        bound.push(key_var.as_str().to_string());
        pushed += 1;
    }
    bound.push(for_expr.value_var.as_str().to_string());
    pushed += 1;

    if let Some(key_expr) = &for_expr.key_expr {
        collect_refs(key_expr, bound, out);
    }
    collect_refs(&for_expr.value_expr, bound, out);
    if let Some(cond_expr) = &for_expr.cond_expr {
        collect_refs(cond_expr, bound, out);
    }

    for _ in 0..pushed {
        bound.pop();
    }
}

fn collect_traversal_refs(traversal: &Traversal, bound: &mut Vec<String>, out: &mut Vec<RefPath>) {
    let root = match &traversal.expr {
        Expression::Variable(var) => {
            let name = var.as_str();
            if bound.iter().any(|b| b == name) {
                None
            } else {
                Some(name.to_string())
            }
        }
        other => {
            collect_refs(other, bound, out);
            None
        }
    };

    let mut path = Vec::new();
    let mut extending = root.is_some();
    for operator in &traversal.operators {
        match operator {
            TraversalOperator::GetAttr(name) => {
                if extending {
                    path.push(name.as_str().to_string());
                }
            }
            TraversalOperator::Index(Expression::String(s)) => {
                if extending {
                    path.push(s.clone());
                }
            }
            TraversalOperator::Index(index_expr) => {
                // Dynamic index: the reference covers the whole subtree.
                collect_refs(index_expr, bound, out);
                extending = false;
            }
            TraversalOperator::LegacyIndex(_)
            | TraversalOperator::AttrSplat
            | TraversalOperator::FullSplat => {
                extending = false;
            }
        }
    }

    if let Some(root) = root {
        out.push(RefPath { root, path });
    }
}

fn collect_template_refs(template_expr: &TemplateExpr, bound: &mut Vec<String>, out: &mut Vec<RefPath>) {
    let Ok(template) = Template::from_expr(template_expr) else {
        return;
    };
    collect_template(&template, bound, out);
}

fn collect_template(template: &Template, bound: &mut Vec<String>, out: &mut Vec<RefPath>) {
    for element in template.elements() {
        match element {
            Element::Literal(_) => {}
            Element::Interpolation(interp) => collect_refs(&interp.expr, bound, out),
            Element::Directive(Directive::If(directive)) => {
                collect_refs(&directive.cond_expr, bound, out);
                collect_template(&directive.true_template, bound, out);
                if let Some(false_template) = &directive.false_template {
                    collect_template(false_template, bound, out);
                }
            }
            Element::Directive(Directive::For(directive)) => {
                collect_refs(&directive.collection_expr, bound, out);
                let mut pushed = 0;
                if let Some(key_var) = &directive.key_var {
                    bound.push(key_var.as_str().to_string());
                    pushed += 1;
                }
                bound.push(directive.value_var.as_str().to_string());
                pushed += 1;
                collect_template(&directive.template, bound, out);
                for _ in 0..pushed {
                    bound.pop();
                }
            }
        }
    }
}
