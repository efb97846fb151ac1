//! Operator semantics of the data literals.
//!
//! A range, regex, JSON literal or pointer in operator position is applied to
//! its (already evaluated) arguments:
//!
//! ```text
//! (0..5 (fn (x) (* x 2)))        ; => (0 2 4 6 8 10)
//! (/(\d+)-(\d+)/ "10-20")         ; => ("10-20" "10" "20")
//! ({"lang": "filth"} "lang")      ; => ("filth")
//! (//1 '(a b c))                  ; => b
//! ```

use super::{Environment, apply_callable};
use crate::Error;
use crate::ast::{NumberType, RegexValue, Value};
use crate::pattern::named_captures;
use crate::pointer::{merge, navigate, normalize};

pub(crate) async fn apply_operator(
    operator: &Value,
    args: Vec<Value>,
    env: &Environment,
    depth: usize,
) -> Result<Value, Error> {
    match operator {
        Value::Range { start, end, step } => {
            apply_range(*start, *end, *step, args, env, depth).await
        }
        Value::Regex(re) => Ok(apply_regex(re, &args)),
        Value::Json(json) => Ok(apply_json(json, &args)),
        Value::Pointer(path) => Ok(apply_pointer(path, args)),
        other => Err(Error::EvalError(format!(
            "Cannot apply {}: {other}",
            other.type_name()
        ))),
    }
}

const RANGE_EPSILON: NumberType = 1e-9;
const MAX_RANGE_STEPS: NumberType = 1e7;

fn snap_to_end(value: NumberType, end: NumberType) -> NumberType {
    if (value - end).abs() < RANGE_EPSILON * end.abs().max(1.0) {
        end
    } else {
        value
    }
}

/// Call the function argument once per number of the range, in order.
async fn apply_range(
    start: NumberType,
    end: NumberType,
    step: Option<NumberType>,
    args: Vec<Value>,
    env: &Environment,
    depth: usize,
) -> Result<Value, Error> {
    let Some(callee) = args.into_iter().next() else {
        return Err(Error::EvalError(
            "range requires a function argument".to_owned(),
        ));
    };
    if !callee.is_callable() {
        return Err(Error::type_error("function", &callee));
    }

    let step = step.unwrap_or(1.0).abs();
    if step == 0.0 || !step.is_finite() {
        return Err(Error::EvalError(format!("invalid range step: {step}")));
    }
    let step = if end < start { -step } else { step };

    // Each number is derived from its index so fractional steps still reach `end`
    let steps = ((end - start) / step + RANGE_EPSILON).floor();
    if !steps.is_finite() || steps > MAX_RANGE_STEPS {
        return Err(Error::EvalError(format!(
            "range {start}..{end} has too many steps"
        )));
    }
    let count = steps as usize + 1;

    let mut results = Vec::with_capacity(count);
    for index in 0..count {
        let current = snap_to_end(start + index as NumberType * step, end);
        results.push(apply_callable(&callee, vec![Value::Number(current)], env, depth).await?);
    }
    Ok(Value::List(results))
}

fn apply_regex(re: &RegexValue, args: &[Value]) -> Value {
    let mut results = Vec::new();
    for text in args.iter().filter_map(|arg| match arg {
        Value::String(s) => Some(s.as_str()),
        _ => None,
    }) {
        if re.has_named_groups() {
            for (name, captured) in named_captures(re, text).unwrap_or_default() {
                results.push(Value::String(name));
                results.push(Value::String(captured));
            }
        } else if re.global {
            results.extend(
                re.regex
                    .find_iter(text)
                    .map(|m| Value::String(m.as_str().to_owned())),
            );
        } else if let Some(caps) = re.regex.captures(text) {
            results.extend(caps.iter().map(|group| {
                group.map_or(Value::Nil, |m| Value::String(m.as_str().to_owned()))
            }));
        }
    }
    Value::List(results)
}

/// String arguments are pointer lookups into the literal; JSON arguments are
/// merged into a copy of it. Any lookup makes the result the list of lookups.
fn apply_json(json: &serde_json::Value, args: &[Value]) -> Value {
    let mut merged = json.clone();
    let mut lookups = Vec::new();

    for arg in args {
        match arg {
            Value::String(path) => lookups.push(
                merged
                    .pointer(&normalize(path))
                    .map_or(Value::Nil, Value::from_json),
            ),
            Value::Json(other) => {
                if !merge(&mut merged, other) {
                    tracing::debug!(%other, "skipped merge of mismatched JSON");
                }
            }
            _ => {}
        }
    }

    if lookups.is_empty() {
        Value::Json(merged)
    } else {
        Value::List(lookups)
    }
}

fn apply_pointer(path: &str, args: Vec<Value>) -> Value {
    let found = |value: &Value| navigate(path, value).unwrap_or(Value::Nil);
    match args.as_slice() {
        [] => Value::Pointer(path.to_owned()),
        [single] => found(single),
        many => Value::List(many.iter().map(found).collect()),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::val;
    use serde_json::json;

    fn regex(source: &str, flags: &str) -> RegexValue {
        RegexValue::new(source, flags).unwrap()
    }

    #[test]
    fn test_regex_operator() {
        let test_cases = vec![
            (regex("o", ""), vec![val("foo")], val(["o"])),
            (regex("o", "g"), vec![val("foo")], val(["o", "o"])),
            (
                regex(r"(\d+)-(\d+)", ""),
                vec![val("10-20")],
                val(["10-20", "10", "20"]),
            ),
            (
                regex(r"a(x)?", ""),
                vec![val("a")],
                val(vec![val("a"), Value::Nil]),
            ),
            (
                regex("(?<word>[a-z]+)", ""),
                vec![val("hello world"), val(12), val("x")],
                val(["word", "hello", "word", "x"]),
            ),
            (regex("z", ""), vec![val("abc")], val(Vec::<Value>::new())),
        ];

        for (i, (re, args, expected)) in test_cases.into_iter().enumerate() {
            assert_eq!(apply_regex(&re, &args), expected, "case #{}", i + 1);
        }
    }

    #[test]
    fn test_json_operator() {
        let literal = json!({"lang": "filth"});
        assert_eq!(apply_json(&literal, &[val("lang")]), val(["filth"]));
        assert_eq!(apply_json(&literal, &[val("/lang")]), val(["filth"]));
        assert_eq!(
            apply_json(&literal, &[val("missing")]),
            val(vec![Value::Nil])
        );
        assert_eq!(
            apply_json(&literal, &[Value::Json(json!({"isFilthy": true}))]),
            Value::Json(json!({"isFilthy": true, "lang": "filth"}))
        );
        // lookups see earlier merges
        assert_eq!(
            apply_json(
                &literal,
                &[Value::Json(json!({"v": 2})), val("v")]
            ),
            val([2])
        );
        assert_eq!(
            apply_json(&json!([1]), &[Value::Json(json!([2]))]),
            Value::Json(json!([1, 2]))
        );
        assert_eq!(apply_json(&literal, &[]), Value::Json(literal.clone()));
    }

    #[test]
    fn test_pointer_operator() {
        let data = val(["a", "b", "c"]);
        assert_eq!(apply_pointer("/1", vec![data.clone()]), val("b"));
        assert_eq!(apply_pointer("/9", vec![data.clone()]), Value::Nil);
        assert_eq!(
            apply_pointer("/0", vec![data, val(["x"])]),
            val(["a", "x"])
        );
        assert_eq!(apply_pointer("/0", vec![]), Value::Pointer("/0".into()));
    }
}
