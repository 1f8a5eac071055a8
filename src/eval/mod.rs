//! Typed expression evaluation.
//!
//! [`Evaluator`] evaluates retained HCL expressions against a set of named
//! namespaces (`global`, `terrastack`, iterator scopes) and a table of pure
//! `tm_*` functions. Evaluation is fully recursive over the expression
//! tree rather than delegated to `hcl-rs`' own evaluator: the lazy special
//! forms (`tm_ternary`, `tm_try`) need to intercept their arguments before
//! evaluation, and iterator scopes need lexical nesting.
//!
//! Conditionals and `tm_ternary` evaluate only the chosen branch. `tm_try`
//! returns the first argument that evaluates without error, which is also
//! the supported idiom for "value may not exist yet" reads such as
//! `tm_try(element.old, 0)`.

mod funcs;

use crate::error::{Result, TerrastackError};
use crate::tree::expr::{Expr, UNSET_KEYWORD};
use hcl::expr::{
    BinaryOperator, Conditional, Expression, ForExpr, FuncCall, ObjectKey, Operation,
    TemplateExpr, Traversal, TraversalOperator, UnaryOperator,
};
use hcl::template::{Directive, Element, Template};
use hcl::{Number, Value};
use std::collections::BTreeMap;

/// Implementation of a pure function: evaluated arguments in, value out.
pub type FuncImpl = fn(&[Value]) -> std::result::Result<Value, String>;

/// A lexical scope frame (iterator bindings, `for` variables).
pub(crate) type Frame = hcl::value::Map<String, Value>;

type EvalResult = std::result::Result<Value, String>;

/// Deep value equality with numbers compared numerically (`1 == 1.0`).
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| values_equal(v, w)))
        }
        _ => a == b,
    }
}

/// Builds a number from an f64, normalizing integral results back to
/// integers so arithmetic over integers stays integral.
pub(crate) fn number_from_f64(f: f64) -> std::result::Result<Number, String> {
    if !f.is_finite() {
        return Err("arithmetic produced a non-finite number".to_string());
    }
    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        return Ok(Number::from(f as i64));
    }
    Number::from_f64(f).ok_or_else(|| "arithmetic produced an unrepresentable number".to_string())
}

/// An expression evaluator holding namespaces and a function table.
pub struct Evaluator {
    namespaces: BTreeMap<String, Value>,
    funcs: BTreeMap<String, FuncImpl>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    /// Creates an evaluator with the standard `tm_*` library registered
    /// and no namespaces.
    #[must_use]
    pub fn new() -> Self {
        Self { namespaces: BTreeMap::new(), funcs: funcs::stdlib() }
    }

    /// Registers (or replaces) a namespace.
    pub fn set_namespace(&mut self, name: &str, value: Value) {
        self.namespaces.insert(name.to_string(), value);
    }

    /// Reads a namespace.
    #[must_use]
    pub fn get_namespace(&self, name: &str) -> Option<&Value> {
        self.namespaces.get(name)
    }

    /// Registers (or replaces) a function.
    pub fn register_func(&mut self, name: &str, func: FuncImpl) {
        self.funcs.insert(name.to_string(), func);
    }

    /// Evaluates an expression to a value.
    ///
    /// # Errors
    ///
    /// `Eval` carrying the expression's origin when a referenced namespace
    /// or attribute is missing, a type conversion fails, or a function
    /// rejects its arguments.
    pub fn eval(&self, expr: &Expr) -> Result<Value> {
        self.eval_with_frames(expr, &[])
    }

    /// Evaluates with additional innermost lexical frames (iterator
    /// scopes). Later frames shadow earlier ones.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`Evaluator::eval`].
    pub fn eval_with_frames(&self, expr: &Expr, frames: &[Frame]) -> Result<Value> {
        let mut stack: Vec<Frame> = frames.to_vec();
        self.eval_expression(expr.as_expression(), &mut stack)
            .map_err(|message| TerrastackError::eval(message, expr.origin().clone()))
    }

    fn lookup(&self, name: &str, frames: &[Frame]) -> Option<Value> {
        for frame in frames.iter().rev() {
            if let Some(value) = frame.get(name) {
                return Some(value.clone());
            }
        }
        self.namespaces.get(name).cloned()
    }

    fn eval_expression(&self, expr: &Expression, frames: &mut Vec<Frame>) -> EvalResult {
        match expr {
            Expression::Null => Ok(Value::Null),
            Expression::Bool(b) => Ok(Value::Bool(*b)),
            Expression::Number(n) => Ok(Value::Number(n.clone())),
            Expression::String(s) => Ok(Value::String(s.clone())),
            Expression::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval_expression(item, frames)?);
                }
                Ok(Value::Array(out))
            }
            Expression::Object(object) => {
                let mut out = hcl::value::Map::new();
                for (key, value) in object {
                    let key = self.eval_object_key(key, frames)?;
                    let value = self.eval_expression(value, frames)?;
                    out.insert(key, value);
                }
                Ok(Value::Object(out))
            }
            Expression::TemplateExpr(template) => self.eval_template_expr(template, frames),
            Expression::Variable(var) => {
                let name = var.as_str();
                if name == UNSET_KEYWORD {
                    return Err(format!(
                        "'{UNSET_KEYWORD}' is only allowed as the whole value of a globals attribute"
                    ));
                }
                self.lookup(name, frames)
                    .ok_or_else(|| format!("undefined reference '{name}'"))
            }
            Expression::Traversal(traversal) => self.eval_traversal(traversal, frames),
            Expression::FuncCall(call) => self.eval_func_call(call, frames),
            Expression::Parenthesis(inner) => self.eval_expression(inner, frames),
            Expression::Conditional(cond) => self.eval_conditional(cond, frames),
            Expression::Operation(operation) => match operation.as_ref() {
                Operation::Unary(unary) => {
                    let value = self.eval_expression(&unary.expr, frames)?;
                    match unary.operator {
                        UnaryOperator::Not => Ok(Value::Bool(!as_bool(&value)?)),
                        UnaryOperator::Neg => {
                            let n = as_number(&value)?;
                            Ok(Value::Number(number_from_f64(-n)?))
                        }
                    }
                }
                Operation::Binary(binary) => self.eval_binary(
                    &binary.lhs_expr,
                    binary.operator,
                    &binary.rhs_expr,
                    frames,
                ),
            },
            Expression::ForExpr(for_expr) => self.eval_for(for_expr, frames),
            other => Err(format!("unsupported expression form: {other:?}")),
        }
    }

    fn eval_object_key(
        &self,
        key: &ObjectKey,
        frames: &mut Vec<Frame>,
    ) -> std::result::Result<String, String> {
        match key {
            ObjectKey::Identifier(ident) => Ok(ident.as_str().to_string()),
            ObjectKey::Expression(expr) => {
                let value = self.eval_expression(expr, frames)?;
                value_to_string(&value)
            }
            other => Err(format!("unsupported object key: {other:?}")),
        }
    }

    fn eval_conditional(&self, cond: &Conditional, frames: &mut Vec<Frame>) -> EvalResult {
        // Only the chosen branch is evaluated.
        let chosen = if as_bool(&self.eval_expression(&cond.cond_expr, frames)?)? {
            &cond.true_expr
        } else {
            &cond.false_expr
        };
        self.eval_expression(chosen, frames)
    }

    fn eval_binary(
        &self,
        lhs_expr: &Expression,
        operator: BinaryOperator,
        rhs_expr: &Expression,
        frames: &mut Vec<Frame>,
    ) -> EvalResult {
        // Logical operators short-circuit.
        match operator {
            BinaryOperator::And => {
                if !as_bool(&self.eval_expression(lhs_expr, frames)?)? {
                    return Ok(Value::Bool(false));
                }
                return Ok(Value::Bool(as_bool(&self.eval_expression(rhs_expr, frames)?)?));
            }
            BinaryOperator::Or => {
                if as_bool(&self.eval_expression(lhs_expr, frames)?)? {
                    return Ok(Value::Bool(true));
                }
                return Ok(Value::Bool(as_bool(&self.eval_expression(rhs_expr, frames)?)?));
            }
            _ => {}
        }

        let lhs = self.eval_expression(lhs_expr, frames)?;
        let rhs = self.eval_expression(rhs_expr, frames)?;

        match operator {
            BinaryOperator::Eq => Ok(Value::Bool(values_equal(&lhs, &rhs))),
            BinaryOperator::NotEq => Ok(Value::Bool(!values_equal(&lhs, &rhs))),
            BinaryOperator::Less
            | BinaryOperator::LessEq
            | BinaryOperator::Greater
            | BinaryOperator::GreaterEq => {
                let (a, b) = (as_number(&lhs)?, as_number(&rhs)?);
                Ok(Value::Bool(match operator {
                    BinaryOperator::Less => a < b,
                    BinaryOperator::LessEq => a <= b,
                    BinaryOperator::Greater => a > b,
                    _ => a >= b,
                }))
            }
            BinaryOperator::Plus | BinaryOperator::Minus | BinaryOperator::Mul => {
                // Integer arithmetic stays integral as long as it is closed.
                if let (Value::Number(x), Value::Number(y)) = (&lhs, &rhs) {
                    if let (Some(a), Some(b)) = (x.as_i64(), y.as_i64()) {
                        let exact = match operator {
                            BinaryOperator::Plus => a.checked_add(b),
                            BinaryOperator::Minus => a.checked_sub(b),
                            _ => a.checked_mul(b),
                        };
                        if let Some(result) = exact {
                            return Ok(Value::Number(Number::from(result)));
                        }
                    }
                }
                let (a, b) = (as_number(&lhs)?, as_number(&rhs)?);
                let result = match operator {
                    BinaryOperator::Plus => a + b,
                    BinaryOperator::Minus => a - b,
                    _ => a * b,
                };
                Ok(Value::Number(number_from_f64(result)?))
            }
            BinaryOperator::Div => {
                let (a, b) = (as_number(&lhs)?, as_number(&rhs)?);
                if b == 0.0 {
                    return Err("division by zero".to_string());
                }
                Ok(Value::Number(number_from_f64(a / b)?))
            }
            BinaryOperator::Mod => {
                let (a, b) = (as_number(&lhs)?, as_number(&rhs)?);
                if b == 0.0 {
                    return Err("modulo by zero".to_string());
                }
                Ok(Value::Number(number_from_f64(a % b)?))
            }
            BinaryOperator::And | BinaryOperator::Or => unreachable!("handled above"),
        }
    }

    fn eval_traversal(&self, traversal: &Traversal, frames: &mut Vec<Frame>) -> EvalResult {
        let mut value = self.eval_expression(&traversal.expr, frames)?;
        let mut operators = traversal.operators.iter();

        while let Some(operator) = operators.next() {
            match operator {
                TraversalOperator::GetAttr(name) => {
                    value = index_attr(&value, name.as_str())?;
                }
                TraversalOperator::Index(index_expr) => {
                    let index = self.eval_expression(index_expr, frames)?;
                    value = match index {
                        Value::String(key) => index_attr(&value, &key)?,
                        Value::Number(n) => {
                            let idx = n
                                .as_u64()
                                .ok_or_else(|| format!("invalid index {n}"))?;
                            index_element(&value, idx as usize)?
                        }
                        other => return Err(format!("cannot index with {other:?}")),
                    };
                }
                TraversalOperator::LegacyIndex(idx) => {
                    value = index_element(&value, *idx as usize)?;
                }
                TraversalOperator::AttrSplat | TraversalOperator::FullSplat => {
                    // Splat maps the remaining operators over every element.
                    let items = match value {
                        Value::Array(items) => items,
                        Value::Null => Vec::new(),
                        single => vec![single],
                    };
                    let rest: Vec<&TraversalOperator> = operators.collect();
                    let mut out = Vec::with_capacity(items.len());
                    for mut item in items {
                        for op in &rest {
                            item = match op {
                                TraversalOperator::GetAttr(name) => {
                                    index_attr(&item, name.as_str())?
                                }
                                TraversalOperator::Index(index_expr) => {
                                    let index = self.eval_expression(index_expr, frames)?;
                                    match index {
                                        Value::String(key) => index_attr(&item, &key)?,
                                        Value::Number(n) => index_element(
                                            &item,
                                            n.as_u64().ok_or("invalid index")? as usize,
                                        )?,
                                        other => {
                                            return Err(format!("cannot index with {other:?}"))
                                        }
                                    }
                                }
                                TraversalOperator::LegacyIndex(idx) => {
                                    index_element(&item, *idx as usize)?
                                }
                                TraversalOperator::AttrSplat | TraversalOperator::FullSplat => {
                                    return Err("nested splat is not supported".to_string())
                                }
                            };
                        }
                        out.push(item);
                    }
                    return Ok(Value::Array(out));
                }
            }
        }
        Ok(value)
    }

    fn eval_func_call(&self, call: &FuncCall, frames: &mut Vec<Frame>) -> EvalResult {
        let name = call.name.name.as_str();

        // Lazy special forms intercept their arguments unevaluated.
        match name {
            "tm_ternary" => {
                if call.args.len() != 3 {
                    return Err(format!(
                        "tm_ternary expects 3 arguments, got {}",
                        call.args.len()
                    ));
                }
                let cond = as_bool(&self.eval_expression(&call.args[0], frames)?)?;
                let chosen = if cond { &call.args[1] } else { &call.args[2] };
                return self.eval_expression(chosen, frames);
            }
            "tm_try" => {
                if call.args.is_empty() {
                    return Err("tm_try expects at least one argument".to_string());
                }
                let mut last_error = String::new();
                for arg in &call.args {
                    match self.eval_expression(arg, frames) {
                        Ok(value) => return Ok(value),
                        Err(message) => last_error = message,
                    }
                }
                return Err(format!("tm_try: all arguments failed: {last_error}"));
            }
            _ => {}
        }

        let mut args = Vec::with_capacity(call.args.len());
        for (idx, arg) in call.args.iter().enumerate() {
            let value = self.eval_expression(arg, frames)?;
            if call.expand_final && idx == call.args.len() - 1 {
                match value {
                    Value::Array(items) => args.extend(items),
                    other => {
                        return Err(format!("cannot expand non-list final argument {other:?}"))
                    }
                }
            } else {
                args.push(value);
            }
        }

        let func = self
            .funcs
            .get(name)
            .ok_or_else(|| format!("unknown function '{name}'"))?;
        func(&args).map_err(|message| format!("{name}: {message}"))
    }

    fn eval_for(&self, for_expr: &ForExpr, frames: &mut Vec<Frame>) -> EvalResult {
        let collection = self.eval_expression(&for_expr.collection_expr, frames)?;
        let entries: Vec<(Value, Value)> = match collection {
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(idx, item)| (Value::Number(Number::from(idx as u64)), item))
                .collect(),
            Value::Object(map) => {
                map.into_iter().map(|(k, v)| (Value::String(k), v)).collect()
            }
            other => return Err(format!("cannot iterate over {other:?}")),
        };

        let mut array_out = Vec::new();
        let mut object_out = hcl::value::Map::new();

        for (key, value) in entries {
            let mut frame = Frame::new();
            if let Some(key_var) = &for_expr.key_var {
                frame.insert(key_var.as_str().to_string(), key);
            }
            frame.insert(for_expr.value_var.as_str().to_string(), value);
            frames.push(frame);

            let result = (|| -> std::result::Result<(), String> {
                if let Some(cond) = &for_expr.cond_expr {
                    if !as_bool(&self.eval_expression(cond, frames)?)? {
                        return Ok(());
                    }
                }
                let value = self.eval_expression(&for_expr.value_expr, frames)?;
                if let Some(key_expr) = &for_expr.key_expr {
                    let key = value_to_string(&self.eval_expression(key_expr, frames)?)?;
                    if for_expr.grouping {
                        match object_out
                            .entry(key)
                            .or_insert_with(|| Value::Array(Vec::new()))
                        {
                            Value::Array(group) => group.push(value),
                            _ => unreachable!("grouping entries are arrays"),
                        }
                    } else if object_out.insert(key.clone(), value).is_some() {
                        return Err(format!("duplicate object key '{key}' in for expression"));
                    }
                } else {
                    array_out.push(value);
                }
                Ok(())
            })();

            frames.pop();
            result?;
        }

        if for_expr.key_expr.is_some() {
            Ok(Value::Object(object_out))
        } else {
            Ok(Value::Array(array_out))
        }
    }

    fn eval_template_expr(
        &self,
        template_expr: &TemplateExpr,
        frames: &mut Vec<Frame>,
    ) -> EvalResult {
        let template =
            Template::from_expr(template_expr).map_err(|e| format!("invalid template: {e}"))?;
        // A template that is a single interpolation yields the value
        // itself, not its string rendering.
        if let [Element::Interpolation(interp)] = template.elements() {
            return self.eval_expression(&interp.expr, frames);
        }
        self.render_template(&template, frames).map(Value::String)
    }

    fn render_template(
        &self,
        template: &Template,
        frames: &mut Vec<Frame>,
    ) -> std::result::Result<String, String> {
        let mut out = String::new();
        for element in template.elements() {
            match element {
                Element::Literal(literal) => out.push_str(literal),
                Element::Interpolation(interp) => {
                    let value = self.eval_expression(&interp.expr, frames)?;
                    out.push_str(&value_to_string(&value)?);
                }
                Element::Directive(Directive::If(directive)) => {
                    let cond = as_bool(&self.eval_expression(&directive.cond_expr, frames)?)?;
                    if cond {
                        out.push_str(&self.render_template(&directive.true_template, frames)?);
                    } else if let Some(false_template) = &directive.false_template {
                        out.push_str(&self.render_template(false_template, frames)?);
                    }
                }
                Element::Directive(Directive::For(directive)) => {
                    let collection =
                        self.eval_expression(&directive.collection_expr, frames)?;
                    let entries: Vec<(Value, Value)> = match collection {
                        Value::Array(items) => items
                            .into_iter()
                            .enumerate()
                            .map(|(idx, item)| (Value::Number(Number::from(idx as u64)), item))
                            .collect(),
                        Value::Object(map) => {
                            map.into_iter().map(|(k, v)| (Value::String(k), v)).collect()
                        }
                        other => return Err(format!("cannot iterate over {other:?}")),
                    };
                    for (key, value) in entries {
                        let mut frame = Frame::new();
                        if let Some(key_var) = &directive.key_var {
                            frame.insert(key_var.as_str().to_string(), key);
                        }
                        frame.insert(directive.value_var.as_str().to_string(), value);
                        frames.push(frame);
                        let rendered = self.render_template(&directive.template, frames);
                        frames.pop();
                        out.push_str(&rendered?);
                    }
                }
            }
        }
        Ok(out)
    }
}

fn index_attr(value: &Value, name: &str) -> EvalResult {
    match value {
        Value::Object(map) => map
            .get(name)
            .cloned()
            .ok_or_else(|| format!("object has no attribute '{name}'")),
        Value::Null => Err(format!("cannot read attribute '{name}' of null")),
        other => Err(format!("cannot read attribute '{name}' of {other:?}")),
    }
}

fn index_element(value: &Value, idx: usize) -> EvalResult {
    match value {
        Value::Array(items) => items
            .get(idx)
            .cloned()
            .ok_or_else(|| format!("index {idx} out of bounds (length {})", items.len())),
        Value::Null => Err(format!("cannot index null with {idx}")),
        other => Err(format!("cannot index {other:?} with {idx}")),
    }
}

fn as_bool(value: &Value) -> std::result::Result<bool, String> {
    match value {
        Value::Bool(b) => Ok(*b),
        // HCL converts the boolean string representations implicitly.
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        other => Err(format!("expected a boolean, got {other:?}")),
    }
}

fn as_number(value: &Value) -> std::result::Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| "unrepresentable number".to_string()),
        other => Err(format!("expected a number, got {other:?}")),
    }
}

fn value_to_string(value: &Value) -> std::result::Result<String, String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Null => Err("cannot convert null to string".to_string()),
        other => Err(format!("cannot convert {other:?} to string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Origin;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn parse_expr(src: &str) -> Expr {
        let body = hcl::parse(&format!("x = {src}\n")).unwrap();
        for structure in body.into_inner() {
            if let hcl::Structure::Attribute(attr) = structure {
                return Expr::new(attr.expr, Origin::synthetic());
            }
        }
        panic!("no attribute parsed from {src}");
    }

    fn evaluator() -> Evaluator {
        let mut eval = Evaluator::new();
        let mut global = hcl::value::Map::new();
        global.insert("env".to_string(), Value::from("prod"));
        global.insert("count".to_string(), Value::from(3));
        global.insert(
            "regions".to_string(),
            Value::Array(vec![Value::from("eu"), Value::from("us")]),
        );
        let mut nested = hcl::value::Map::new();
        nested.insert("aws".to_string(), Value::Bool(true));
        global.insert("use".to_string(), Value::Object(nested));
        eval.set_namespace("global", Value::Object(global));
        eval
    }

    fn eval(src: &str) -> Result<Value> {
        evaluator().eval(&parse_expr(src))
    }

    #[test_case("1 + 2", Value::from(3); "int addition")]
    #[test_case("7 % 3", Value::from(1); "modulo")]
    #[test_case("4 / 2", Value::from(2); "even division stays integral")]
    #[test_case("2 * 3 > 5", Value::Bool(true); "comparison")]
    #[test_case("1 == 1.0", Value::Bool(true); "numeric equality")]
    #[test_case("!(1 == 2)", Value::Bool(true); "negation")]
    #[test_case("-(3)", Value::from(-3); "unary minus")]
    fn test_arithmetic(src: &str, expected: Value) {
        assert_eq!(eval(src).unwrap(), expected);
    }

    #[test]
    fn test_namespace_traversal() {
        assert_eq!(eval("global.env").unwrap(), Value::from("prod"));
        assert_eq!(eval(r#"global["env"]"#).unwrap(), Value::from("prod"));
        assert_eq!(eval("global.regions[1]").unwrap(), Value::from("us"));
        assert_eq!(eval("global.use.aws").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_missing_attribute_errors() {
        let err = eval("global.nope").unwrap_err();
        assert_eq!(err.kind(), "Eval");
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_missing_namespace_errors() {
        assert_eq!(eval("iam.role").unwrap_err().kind(), "Eval");
    }

    #[test]
    fn test_conditional_is_lazy() {
        // The false branch would fail if evaluated.
        assert_eq!(eval("true ? 1 : global.nope").unwrap(), Value::from(1));
        assert_eq!(eval("tm_ternary(false, global.nope, 2)").unwrap(), Value::from(2));
    }

    #[test]
    fn test_tm_try_swallows_errors() {
        assert_eq!(eval("tm_try(global.nope, 42)").unwrap(), Value::from(42));
        assert_eq!(eval("tm_try(global.env, 42)").unwrap(), Value::from("prod"));
        assert_eq!(eval(r#"tm_try(global.use["mysql"], false)"#).unwrap(), Value::Bool(false));
        assert!(eval("tm_try(global.nope)").is_err());
    }

    #[test]
    fn test_unset_outside_globals_errors() {
        let err = eval("[unset]").unwrap_err();
        assert!(err.to_string().contains("unset"));
    }

    #[test]
    fn test_template_interpolation() {
        assert_eq!(eval(r#""env-${global.env}""#).unwrap(), Value::from("env-prod"));
        // A lone interpolation keeps the value type.
        assert_eq!(eval(r#""${global.count}""#).unwrap(), Value::from(3));
    }

    #[test]
    fn test_template_directives() {
        assert_eq!(
            eval(r#""%{if global.count > 1}many%{else}one%{endif}""#).unwrap(),
            Value::from("many")
        );
        assert_eq!(
            eval(r#""%{for r in global.regions}${r},%{endfor}""#).unwrap(),
            Value::from("eu,us,")
        );
    }

    #[test]
    fn test_for_expressions() {
        assert_eq!(
            eval("[for r in global.regions : tm_upper(r)]").unwrap(),
            Value::Array(vec![Value::from("EU"), Value::from("US")])
        );
        let Value::Object(map) =
            eval("{for i, r in global.regions : r => i if i > 0}").unwrap()
        else {
            panic!("expected object")
        };
        assert_eq!(map.len(), 1);
        assert_eq!(map["us"], Value::from(1));
    }

    #[test]
    fn test_for_over_object_with_try_filter() {
        let Value::Object(map) =
            eval("{for k, v in global.use : k => v if tm_try(global.use[k], false)}").unwrap()
        else {
            panic!("expected object")
        };
        assert_eq!(map.len(), 1);
        assert_eq!(map["aws"], Value::Bool(true));
    }

    #[test]
    fn test_splat() {
        let mut evaluator = evaluator();
        let mut a = hcl::value::Map::new();
        a.insert("name".to_string(), Value::from("a"));
        let mut b = hcl::value::Map::new();
        b.insert("name".to_string(), Value::from("b"));
        evaluator.set_namespace(
            "items",
            Value::Array(vec![Value::Object(a), Value::Object(b)]),
        );

        assert_eq!(
            evaluator.eval(&parse_expr("items[*].name")).unwrap(),
            Value::Array(vec![Value::from("a"), Value::from("b")])
        );
    }

    #[test]
    fn test_function_calls() {
        assert_eq!(eval("tm_upper(global.env)").unwrap(), Value::from("PROD"));
        assert_eq!(
            eval(r#"tm_join("-", global.regions)"#).unwrap(),
            Value::from("eu-us")
        );
        assert_eq!(eval("unknown_func(1)").unwrap_err().kind(), "Eval");
    }

    #[test]
    fn test_expand_final_argument() {
        assert_eq!(eval("tm_max([1, 5, 3]...)").unwrap(), Value::from(5));
    }

    #[test]
    fn test_short_circuit_logic() {
        // The right-hand side would fail if evaluated.
        assert_eq!(eval("false && global.nope").unwrap(), Value::Bool(false));
        assert_eq!(eval("true || global.nope").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_iterator_frames() {
        let eval = evaluator();
        let mut frame = Frame::new();
        let mut element = hcl::value::Map::new();
        element.insert("new".to_string(), Value::from("x"));
        frame.insert("element".to_string(), Value::Object(element));

        let value = eval
            .eval_with_frames(&parse_expr("tm_upper(element.new)"), &[frame])
            .unwrap();
        assert_eq!(value, Value::from("X"));
    }
}
