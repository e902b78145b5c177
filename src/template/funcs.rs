//! Helper functions callable from templates.
//!
//! Every helper is pure. String helpers take the subject last so they read
//! naturally at the end of a pipeline: `{{ .version | trimPrefix "v" }}`.

use super::{TemplateError, Value};

pub(super) fn call(name: &str, args: Vec<Value>) -> Result<Value, TemplateError> {
    match name {
        "eq" => {
            if args.len() < 2 {
                return Err(arity(name, "at least 2", args.len()));
            }
            let (first, rest) = args.split_at(1);
            for other in rest {
                if equal(name, &first[0], other)? {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
        "ne" => {
            let [a, b] = exact(name, args)?;
            Ok(Value::Bool(!equal(name, &a, &b)?))
        }
        "and" => select(name, args, |v| !v.is_truthy()),
        "or" => select(name, args, Value::is_truthy),
        "not" => {
            let [v] = exact(name, args)?;
            Ok(Value::Bool(!v.is_truthy()))
        }
        "lower" => unary(name, args, |s| s.to_lowercase()),
        "upper" => unary(name, args, |s| s.to_uppercase()),
        "title" => unary(name, args, title),
        "trim" => unary(name, args, |s| s.trim().to_string()),
        "trimPrefix" => binary(name, args, |prefix, s| {
            Value::Str(s.strip_prefix(prefix).unwrap_or(s).to_string())
        }),
        "trimSuffix" => binary(name, args, |suffix, s| {
            Value::Str(s.strip_suffix(suffix).unwrap_or(s).to_string())
        }),
        "hasPrefix" => binary(name, args, |prefix, s| Value::Bool(s.starts_with(prefix))),
        "hasSuffix" => binary(name, args, |suffix, s| Value::Bool(s.ends_with(suffix))),
        "contains" => binary(name, args, |needle, s| Value::Bool(s.contains(needle))),
        "replace" => {
            let [old, new, s] = exact(name, args)?;
            let (old, new, s) = (string(name, old)?, string(name, new)?, string(name, s)?);
            Ok(Value::Str(s.replace(&old, &new)))
        }
        _ => Err(TemplateError::execute(format!(
            "function {name:?} not defined"
        ))),
    }
}

fn arity(name: &str, want: &str, got: usize) -> TemplateError {
    TemplateError::execute(format!(
        "wrong number of args for {name}: want {want} got {got}"
    ))
}

fn exact<const N: usize>(name: &str, args: Vec<Value>) -> Result<[Value; N], TemplateError> {
    args.try_into()
        .map_err(|args: Vec<Value>| arity(name, &N.to_string(), args.len()))
}

fn string(name: &str, value: Value) -> Result<String, TemplateError> {
    match value {
        Value::Str(s) => Ok(s),
        Value::Bool(b) => Err(TemplateError::execute(format!(
            "{name}: expected a string argument, got {b}"
        ))),
    }
}

fn unary(
    name: &str,
    args: Vec<Value>,
    f: impl Fn(&str) -> String,
) -> Result<Value, TemplateError> {
    let [s] = exact(name, args)?;
    Ok(Value::Str(f(&string(name, s)?)))
}

fn binary(
    name: &str,
    args: Vec<Value>,
    f: impl Fn(&str, &str) -> Value,
) -> Result<Value, TemplateError> {
    let [a, s] = exact(name, args)?;
    Ok(f(&string(name, a)?, &string(name, s)?))
}

/// Returns the first argument matching `stop`, or the last one.
fn select(
    name: &str,
    args: Vec<Value>,
    stop: impl Fn(&Value) -> bool,
) -> Result<Value, TemplateError> {
    let count = args.len();
    let mut last = None;
    for arg in args {
        if stop(&arg) {
            return Ok(arg);
        }
        last = Some(arg);
    }
    last.ok_or_else(|| arity(name, "at least 1", count))
}

fn equal(name: &str, a: &Value, b: &Value) -> Result<bool, TemplateError> {
    match (a, b) {
        (Value::Str(a), Value::Str(b)) => Ok(a == b),
        (Value::Bool(a), Value::Bool(b)) => Ok(a == b),
        _ => Err(TemplateError::execute(format!(
            "{name}: incompatible types for comparison"
        ))),
    }
}

fn title(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut boundary = true;
    for c in s.chars() {
        if boundary && c.is_alphabetic() {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        boundary = !c.is_alphanumeric();
    }
    out
}
