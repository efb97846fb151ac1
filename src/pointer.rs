//! JSON pointer navigation (RFC 6901) over JSON literals and list data.

use crate::Error;
use crate::ast::Value;
use crate::evaluator::Environment;

/// Pointer path with a leading `/`, accepting bare paths such as `"lang"`.
pub fn normalize(path: &str) -> String {
    if path.is_empty() || path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    }
}

/// Resolve `path` inside `value`.
///
/// JSON literals are navigated directly; lists are viewed as JSON arrays, with
/// nested lists becoming nested arrays. Anything else has no structure to
/// navigate and yields `None`, as does a path that does not resolve.
pub fn navigate(path: &str, value: &Value) -> Option<Value> {
    match value {
        Value::Quoted(inner) => navigate(path, inner),
        Value::Json(json) => json.pointer(path).map(Value::from_json),
        Value::List(_) => {
            let json = value.to_json()?;
            json.pointer(path).map(Value::from_json)
        }
        _ => None,
    }
}

/// Pointer equality: two pointers are equal when their paths are; otherwise a
/// pointer equals any value in which its path resolves.
pub fn pointer_matches(path: &str, value: &Value) -> bool {
    match value {
        Value::Pointer(other) => path == other,
        other => navigate(path, other).is_some(),
    }
}

/// Shallow merge of `source` into `target`: objects merge key by key with
/// `source` winning, arrays concatenate. Returns false, leaving `target`
/// untouched, when the two are not the same kind of container.
pub fn merge(target: &mut serde_json::Value, source: &serde_json::Value) -> bool {
    use serde_json::Value as Json;
    match (target, source) {
        (Json::Object(target), Json::Object(source)) => {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
            true
        }
        (Json::Array(target), Json::Array(source)) => {
            target.extend(source.iter().cloned());
            true
        }
        _ => false,
    }
}

/// The `select` builtin: `(select pointer value)` with both arguments taken
/// unevaluated. A symbol in either position is resolved first.
pub(crate) fn select(env: &Environment, args: &[Value]) -> Result<Value, Error> {
    let [pointer, value, ..] = args else {
        return Err(Error::EvalError(
            "select requires a pointer and a value".to_owned(),
        ));
    };

    let resolve = |arg: &Value| -> Result<Value, Error> {
        match arg {
            Value::Symbol(name) => Ok(env.lookup(name, None)?.value),
            Value::Quoted(inner) => Ok((**inner).clone()),
            other => Ok(other.clone()),
        }
    };

    let path = match resolve(pointer)? {
        Value::Pointer(path) => path,
        Value::String(path) => normalize(&path),
        other => return Err(Error::type_error("pointer or string", &other)),
    };

    let value = resolve(value)?;
    match value {
        Value::Json(_) | Value::List(_) => Ok(navigate(&path, &value).unwrap_or(Value::Nil)),
        other => Err(Error::EvalError(format!(
            "Unsupported pointer value: {other}"
        ))),
    }
}
