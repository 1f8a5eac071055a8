//! The `tm_*` standard library.
//!
//! Every function is pure over values: no filesystem, clock, or project
//! state. Functions receive already-evaluated arguments; the lazy forms
//! (`tm_ternary`, `tm_try`) are special-cased by the evaluator and never
//! reach this table.

use crate::eval::{number_from_f64, values_equal, FuncImpl};
use hcl::Value;
use std::collections::BTreeMap;

/// Builds the default function table.
pub(crate) fn stdlib() -> BTreeMap<String, FuncImpl> {
    let mut funcs: BTreeMap<String, FuncImpl> = BTreeMap::new();
    funcs.insert("tm_upper".into(), tm_upper);
    funcs.insert("tm_lower".into(), tm_lower);
    funcs.insert("tm_title".into(), tm_title);
    funcs.insert("tm_replace".into(), tm_replace);
    funcs.insert("tm_split".into(), tm_split);
    funcs.insert("tm_join".into(), tm_join);
    funcs.insert("tm_trimspace".into(), tm_trimspace);
    funcs.insert("tm_trimprefix".into(), tm_trimprefix);
    funcs.insert("tm_trimsuffix".into(), tm_trimsuffix);
    funcs.insert("tm_format".into(), tm_format);
    funcs.insert("tm_concat".into(), tm_concat);
    funcs.insert("tm_merge".into(), tm_merge);
    funcs.insert("tm_length".into(), tm_length);
    funcs.insert("tm_keys".into(), tm_keys);
    funcs.insert("tm_values".into(), tm_values);
    funcs.insert("tm_contains".into(), tm_contains);
    funcs.insert("tm_element".into(), tm_element);
    funcs.insert("tm_flatten".into(), tm_flatten);
    funcs.insert("tm_distinct".into(), tm_distinct);
    funcs.insert("tm_reverse".into(), tm_reverse);
    funcs.insert("tm_tostring".into(), tm_tostring);
    funcs.insert("tm_tonumber".into(), tm_tonumber);
    funcs.insert("tm_tobool".into(), tm_tobool);
    funcs.insert("tm_min".into(), tm_min);
    funcs.insert("tm_max".into(), tm_max);
    funcs.insert("tm_abs".into(), tm_abs);
    funcs
}

type FuncResult = Result<Value, String>;

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), String> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(format!("{name} expects {expected} argument(s), got {}", args.len()))
    }
}

fn str_arg<'a>(name: &str, args: &'a [Value], idx: usize) -> Result<&'a str, String> {
    match args.get(idx) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(format!("{name}: argument {} must be a string, got {other:?}", idx + 1)),
        None => Err(format!("{name}: missing argument {}", idx + 1)),
    }
}

fn list_arg<'a>(name: &str, args: &'a [Value], idx: usize) -> Result<&'a [Value], String> {
    match args.get(idx) {
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(format!("{name}: argument {} must be a list, got {other:?}", idx + 1)),
        None => Err(format!("{name}: missing argument {}", idx + 1)),
    }
}

fn num_arg(name: &str, args: &[Value], idx: usize) -> Result<f64, String> {
    match args.get(idx) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| format!("{name}: argument {} is not representable", idx + 1)),
        Some(other) => Err(format!("{name}: argument {} must be a number, got {other:?}", idx + 1)),
        None => Err(format!("{name}: missing argument {}", idx + 1)),
    }
}

fn tm_upper(args: &[Value]) -> FuncResult {
    arity("tm_upper", args, 1)?;
    Ok(Value::from(str_arg("tm_upper", args, 0)?.to_uppercase()))
}

fn tm_lower(args: &[Value]) -> FuncResult {
    arity("tm_lower", args, 1)?;
    Ok(Value::from(str_arg("tm_lower", args, 0)?.to_lowercase()))
}

fn tm_title(args: &[Value]) -> FuncResult {
    arity("tm_title", args, 1)?;
    let input = str_arg("tm_title", args, 0)?;
    let mut out = String::with_capacity(input.len());
    let mut at_word_start = true;
    for ch in input.chars() {
        if at_word_start {
            out.extend(ch.to_uppercase());
        } else {
            out.push(ch);
        }
        at_word_start = ch.is_whitespace();
    }
    Ok(Value::from(out))
}

fn tm_replace(args: &[Value]) -> FuncResult {
    arity("tm_replace", args, 3)?;
    let input = str_arg("tm_replace", args, 0)?;
    let from = str_arg("tm_replace", args, 1)?;
    let to = str_arg("tm_replace", args, 2)?;
    Ok(Value::from(input.replace(from, to)))
}

fn tm_split(args: &[Value]) -> FuncResult {
    arity("tm_split", args, 2)?;
    let sep = str_arg("tm_split", args, 0)?;
    let input = str_arg("tm_split", args, 1)?;
    Ok(Value::Array(input.split(sep).map(Value::from).collect()))
}

fn tm_join(args: &[Value]) -> FuncResult {
    arity("tm_join", args, 2)?;
    let sep = str_arg("tm_join", args, 0)?;
    let items = list_arg("tm_join", args, 1)?;
    let parts: Result<Vec<String>, String> = items
        .iter()
        .map(|v| match v {
            Value::String(s) => Ok(s.clone()),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(format!("tm_join: cannot join {other:?}")),
        })
        .collect();
    Ok(Value::from(parts?.join(sep)))
}

fn tm_trimspace(args: &[Value]) -> FuncResult {
    arity("tm_trimspace", args, 1)?;
    Ok(Value::from(str_arg("tm_trimspace", args, 0)?.trim()))
}

fn tm_trimprefix(args: &[Value]) -> FuncResult {
    arity("tm_trimprefix", args, 2)?;
    let input = str_arg("tm_trimprefix", args, 0)?;
    let prefix = str_arg("tm_trimprefix", args, 1)?;
    Ok(Value::from(input.strip_prefix(prefix).unwrap_or(input)))
}

fn tm_trimsuffix(args: &[Value]) -> FuncResult {
    arity("tm_trimsuffix", args, 2)?;
    let input = str_arg("tm_trimsuffix", args, 0)?;
    let suffix = str_arg("tm_trimsuffix", args, 1)?;
    Ok(Value::from(input.strip_suffix(suffix).unwrap_or(input)))
}

/// A small `format` supporting `%s`, `%d`, `%f`, `%v` and `%%`.
fn tm_format(args: &[Value]) -> FuncResult {
    let fmt = str_arg("tm_format", args, 0)?;
    let mut out = String::with_capacity(fmt.len());
    let mut next = 1;
    let mut chars = fmt.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(verb) => {
                let arg = args
                    .get(next)
                    .ok_or_else(|| format!("tm_format: missing argument for %{verb}"))?;
                next += 1;
                match (verb, arg) {
                    ('s', Value::String(s)) => out.push_str(s),
                    ('s', Value::Number(n)) => out.push_str(&n.to_string()),
                    ('s', Value::Bool(b)) => out.push_str(&b.to_string()),
                    ('d', Value::Number(n)) => {
                        let f = n.as_f64().ok_or("tm_format: bad number")?;
                        out.push_str(&format!("{}", f as i64));
                    }
                    ('f', Value::Number(n)) => {
                        out.push_str(&format!("{}", n.as_f64().ok_or("tm_format: bad number")?));
                    }
                    ('v', v) => out.push_str(&display_value(v)),
                    (verb, arg) => {
                        return Err(format!("tm_format: cannot format {arg:?} with %{verb}"))
                    }
                }
            }
            None => return Err("tm_format: dangling % at end of format".to_string()),
        }
    }
    if next != args.len() {
        return Err(format!(
            "tm_format: {} argument(s) given but {} consumed",
            args.len() - 1,
            next - 1
        ));
    }
    Ok(Value::from(out))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        composite => serde_json::to_string(composite).unwrap_or_default(),
    }
}

fn tm_concat(args: &[Value]) -> FuncResult {
    if args.is_empty() {
        return Err("tm_concat expects at least one list".to_string());
    }
    let mut out = Vec::new();
    for (idx, _) in args.iter().enumerate() {
        out.extend(list_arg("tm_concat", args, idx)?.iter().cloned());
    }
    Ok(Value::Array(out))
}

fn tm_merge(args: &[Value]) -> FuncResult {
    if args.is_empty() {
        return Err("tm_merge expects at least one object".to_string());
    }
    let mut out = hcl::value::Map::new();
    for arg in args {
        match arg {
            Value::Object(map) => {
                for (k, v) in map {
                    out.insert(k.clone(), v.clone());
                }
            }
            Value::Null => {}
            other => return Err(format!("tm_merge: cannot merge {other:?}")),
        }
    }
    Ok(Value::Object(out))
}

fn tm_length(args: &[Value]) -> FuncResult {
    arity("tm_length", args, 1)?;
    let len = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => return Err(format!("tm_length: cannot measure {other:?}")),
    };
    Ok(Value::from(len as u64))
}

fn tm_keys(args: &[Value]) -> FuncResult {
    arity("tm_keys", args, 1)?;
    match &args[0] {
        Value::Object(map) => Ok(Value::Array(map.keys().cloned().map(Value::from).collect())),
        other => Err(format!("tm_keys: expected object, got {other:?}")),
    }
}

fn tm_values(args: &[Value]) -> FuncResult {
    arity("tm_values", args, 1)?;
    match &args[0] {
        Value::Object(map) => Ok(Value::Array(map.values().cloned().collect())),
        other => Err(format!("tm_values: expected object, got {other:?}")),
    }
}

fn tm_contains(args: &[Value]) -> FuncResult {
    arity("tm_contains", args, 2)?;
    let items = list_arg("tm_contains", args, 0)?;
    Ok(Value::Bool(items.iter().any(|v| values_equal(v, &args[1]))))
}

/// Index with wrap-around, the idiomatic round-robin helper.
fn tm_element(args: &[Value]) -> FuncResult {
    arity("tm_element", args, 2)?;
    let items = list_arg("tm_element", args, 0)?;
    if items.is_empty() {
        return Err("tm_element: list is empty".to_string());
    }
    let idx = num_arg("tm_element", args, 1)? as i64;
    if idx < 0 {
        return Err("tm_element: index must not be negative".to_string());
    }
    Ok(items[(idx as usize) % items.len()].clone())
}

fn tm_flatten(args: &[Value]) -> FuncResult {
    arity("tm_flatten", args, 1)?;
    fn push(value: &Value, out: &mut Vec<Value>) {
        match value {
            Value::Array(items) => {
                for item in items {
                    push(item, out);
                }
            }
            other => out.push(other.clone()),
        }
    }
    let mut out = Vec::new();
    push(&args[0], &mut out);
    Ok(Value::Array(out))
}

fn tm_distinct(args: &[Value]) -> FuncResult {
    arity("tm_distinct", args, 1)?;
    let items = list_arg("tm_distinct", args, 0)?;
    let mut out: Vec<Value> = Vec::new();
    for item in items {
        if !out.iter().any(|seen| values_equal(seen, item)) {
            out.push(item.clone());
        }
    }
    Ok(Value::Array(out))
}

fn tm_reverse(args: &[Value]) -> FuncResult {
    arity("tm_reverse", args, 1)?;
    let mut items = list_arg("tm_reverse", args, 0)?.to_vec();
    items.reverse();
    Ok(Value::Array(items))
}

fn tm_tostring(args: &[Value]) -> FuncResult {
    arity("tm_tostring", args, 1)?;
    match &args[0] {
        Value::String(s) => Ok(Value::from(s.clone())),
        Value::Number(n) => Ok(Value::from(n.to_string())),
        Value::Bool(b) => Ok(Value::from(b.to_string())),
        Value::Null => Ok(Value::Null),
        other => Err(format!("tm_tostring: cannot convert {other:?}")),
    }
}

fn tm_tonumber(args: &[Value]) -> FuncResult {
    arity("tm_tonumber", args, 1)?;
    match &args[0] {
        Value::Number(n) => Ok(Value::Number(n.clone())),
        Value::String(s) => {
            let parsed: f64 =
                s.trim().parse().map_err(|_| format!("tm_tonumber: '{s}' is not a number"))?;
            Ok(Value::Number(number_from_f64(parsed)?))
        }
        Value::Null => Ok(Value::Null),
        other => Err(format!("tm_tonumber: cannot convert {other:?}")),
    }
}

fn tm_tobool(args: &[Value]) -> FuncResult {
    arity("tm_tobool", args, 1)?;
    match &args[0] {
        Value::Bool(b) => Ok(Value::Bool(*b)),
        Value::String(s) if s == "true" => Ok(Value::Bool(true)),
        Value::String(s) if s == "false" => Ok(Value::Bool(false)),
        Value::Null => Ok(Value::Null),
        other => Err(format!("tm_tobool: cannot convert {other:?}")),
    }
}

fn fold_numbers(name: &str, args: &[Value], pick: fn(f64, f64) -> f64) -> FuncResult {
    if args.is_empty() {
        return Err(format!("{name} expects at least one number"));
    }
    let mut acc = num_arg(name, args, 0)?;
    for idx in 1..args.len() {
        acc = pick(acc, num_arg(name, args, idx)?);
    }
    Ok(Value::Number(number_from_f64(acc)?))
}

fn tm_min(args: &[Value]) -> FuncResult {
    fold_numbers("tm_min", args, f64::min)
}

fn tm_max(args: &[Value]) -> FuncResult {
    fold_numbers("tm_max", args, f64::max)
}

fn tm_abs(args: &[Value]) -> FuncResult {
    arity("tm_abs", args, 1)?;
    Ok(Value::Number(number_from_f64(num_arg("tm_abs", args, 0)?.abs())?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_string_functions() {
        assert_eq!(tm_upper(&[Value::from("ab")]).unwrap(), Value::from("AB"));
        assert_eq!(tm_lower(&[Value::from("AB")]).unwrap(), Value::from("ab"));
        assert_eq!(tm_title(&[Value::from("hello world")]).unwrap(), Value::from("Hello World"));
        assert_eq!(
            tm_replace(&[Value::from("a-b-c"), Value::from("-"), Value::from("_")]).unwrap(),
            Value::from("a_b_c")
        );
        assert_eq!(
            tm_trimprefix(&[Value::from("infra-app"), Value::from("infra-")]).unwrap(),
            Value::from("app")
        );
    }

    #[test]
    fn test_split_join_round_trip() {
        let split = tm_split(&[Value::from(","), Value::from("a,b,c")]).unwrap();
        assert_eq!(
            split,
            Value::Array(vec![Value::from("a"), Value::from("b"), Value::from("c")])
        );
        let joined = tm_join(&[Value::from(","), split]).unwrap();
        assert_eq!(joined, Value::from("a,b,c"));
    }

    #[test]
    fn test_format() {
        let out = tm_format(&[
            Value::from("%s=%d (%v)"),
            Value::from("count"),
            Value::from(3),
            Value::Bool(true),
        ])
        .unwrap();
        assert_eq!(out, Value::from("count=3 (true)"));
        assert!(tm_format(&[Value::from("%s")]).is_err());
    }

    #[test]
    fn test_concat_and_merge() {
        let out = tm_concat(&[
            Value::Array(vec![Value::from(1)]),
            Value::Array(vec![Value::from(2)]),
        ])
        .unwrap();
        assert_eq!(out, Value::Array(vec![Value::from(1), Value::from(2)]));

        let mut a = hcl::value::Map::new();
        a.insert("x".into(), Value::from(1));
        a.insert("y".into(), Value::from(1));
        let mut b = hcl::value::Map::new();
        b.insert("y".into(), Value::from(2));
        let Value::Object(merged) = tm_merge(&[Value::Object(a), Value::Object(b)]).unwrap()
        else {
            panic!("expected object")
        };
        assert_eq!(merged["x"], Value::from(1));
        assert_eq!(merged["y"], Value::from(2));
    }

    #[test]
    fn test_collection_helpers() {
        let list = Value::Array(vec![Value::from(1), Value::from(2), Value::from(1)]);
        assert_eq!(tm_length(&[list.clone()]).unwrap(), Value::from(3u64));
        assert_eq!(tm_contains(&[list.clone(), Value::from(2)]).unwrap(), Value::Bool(true));
        assert_eq!(
            tm_distinct(&[list.clone()]).unwrap(),
            Value::Array(vec![Value::from(1), Value::from(2)])
        );
        assert_eq!(tm_element(&[list, Value::from(3)]).unwrap(), Value::from(1));
    }

    #[test]
    fn test_flatten() {
        let nested = Value::Array(vec![
            Value::Array(vec![Value::from(1), Value::Array(vec![Value::from(2)])]),
            Value::from(3),
        ]);
        assert_eq!(
            tm_flatten(&[nested]).unwrap(),
            Value::Array(vec![Value::from(1), Value::from(2), Value::from(3)])
        );
    }

    #[test]
    fn test_conversions() {
        assert_eq!(tm_tostring(&[Value::from(7)]).unwrap(), Value::from("7"));
        assert_eq!(tm_tonumber(&[Value::from("7")]).unwrap(), Value::from(7));
        assert_eq!(tm_tobool(&[Value::from("true")]).unwrap(), Value::Bool(true));
        assert!(tm_tonumber(&[Value::from("x")]).is_err());
    }

    #[test]
    fn test_min_max_abs() {
        assert_eq!(tm_min(&[Value::from(3), Value::from(1)]).unwrap(), Value::from(1));
        assert_eq!(tm_max(&[Value::from(3), Value::from(1)]).unwrap(), Value::from(3));
        assert_eq!(tm_abs(&[Value::from(-2)]).unwrap(), Value::from(2));
    }
}
