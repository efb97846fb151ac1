//! Structural matching of formal parameters against actual arguments.
//!
//! A formal parameter is either a plain binder (a symbol), or a runtime test:
//!
//! | formal | matches when |
//! |---|---|
//! | `"text"` | the actual is the same string literal |
//! | `'expr` | the actual equals `expr` |
//! | `0..5` | the actual number lies inside the range (a list: every element inside, a range: the ranges overlap) |
//! | `/re/` | the actual's text matches; named groups bind their captured text |
//! | anything else | the actual is equal to it |
//!
//! A rest marker (`...`, `.` or `@rest`) consumes every remaining actual. The
//! formal following the marker is applied to each consumed actual as a filter.

use crate::ast::{NumberType, RegexValue, Value};
use std::collections::HashMap;

/// Binding key used for the consumed tail when the rest target is a pattern
pub const TAIL_KEY: &str = ":tail";

/// Tokens accepted as a rest marker
pub const REST_MARKERS: [&str; 3] = ["...", ".", "@rest"];

/// Names produced by a successful match
pub type Bindings = HashMap<String, Value>;

pub fn is_rest_marker(formal: &Value) -> bool {
    matches!(formal, Value::Symbol(s) if REST_MARKERS.contains(&s.as_str()))
}

/// Check that every rest marker in `formals` is followed by a rest target and
/// return the name bound to the remaining arguments, if the target is a plain symbol.
pub fn rest_param_name(formals: &[Value]) -> Result<Option<String>, String> {
    let Some(index) = formals.iter().position(is_rest_marker) else {
        return Ok(None);
    };
    match formals.get(index + 1) {
        Some(Value::Symbol(name)) if !is_rest_marker(&formals[index + 1]) => {
            Ok(Some(name.clone()))
        }
        Some(target) if !is_rest_marker(target) => Ok(None),
        _ => Err(format!(
            "expected rest parameter after {}",
            formals[index]
        )),
    }
}

/// Match `actuals` against `formals`, returning the produced bindings or `None`.
///
/// Without a rest marker the lengths must agree. With one, the actuals must at
/// least cover the formals before the marker.
pub fn match_params(formals: &[Value], actuals: &[Value]) -> Option<Bindings> {
    let mut result = Bindings::new();

    let Some(rest_index) = formals.iter().position(is_rest_marker) else {
        if formals.len() != actuals.len() {
            return None;
        }
        for (formal, actual) in formals.iter().zip(actuals) {
            if !match_param(&mut result, formal, actual, true) {
                return None;
            }
        }
        return Some(result);
    };

    if actuals.len() < rest_index {
        return None;
    }
    for (formal, actual) in formals[..rest_index].iter().zip(actuals) {
        if !match_param(&mut result, formal, actual, true) {
            return None;
        }
    }

    let target = formals.get(rest_index + 1)?;
    let mut captures = Bindings::new();
    let mut rest = Vec::new();
    for actual in &actuals[rest_index..] {
        if match_param(&mut captures, target, actual, false) {
            rest.push(actual.clone());
        }
    }

    if captures.is_empty() {
        let key = match target {
            Value::Symbol(name) => name.clone(),
            _ => TAIL_KEY.to_owned(),
        };
        result.insert(key, Value::List(rest));
    } else {
        result.extend(captures);
    }
    Some(result)
}

/// Test a single formal against a single actual.
///
/// Named regex captures are always recorded; `bind` controls whether a plain
/// symbol formal records the actual under its own name.
pub fn match_param(result: &mut Bindings, formal: &Value, actual: &Value, bind: bool) -> bool {
    match formal {
        Value::String(_) => formal == actual,
        Value::Quoted(inner) => **inner == *actual,
        Value::Range { .. } => range_contains(formal, actual),
        Value::Regex(re) => match actual.as_text() {
            Some(text) if re.has_named_groups() => match named_captures(re, text) {
                Some(captures) => {
                    for (name, captured) in captures {
                        accumulate(result, name, Value::String(captured));
                    }
                    true
                }
                None => false,
            },
            Some(text) => re.regex.is_match(text),
            None => false,
        },
        Value::Symbol(name) => {
            if bind {
                result.insert(name.clone(), actual.clone());
            }
            true
        }
        other => other == actual,
    }
}

/// Record `value` under `name`, turning repeated names into an ordered list
fn accumulate(result: &mut Bindings, name: String, value: Value) {
    match result.get_mut(&name) {
        Some(Value::List(existing)) => existing.push(value),
        Some(existing) => {
            let first = std::mem::replace(existing, Value::Nil);
            *existing = Value::List(vec![first, value]);
        }
        None => {
            result.insert(name, value);
        }
    }
}

/// Range containment using the range's lower and upper bound.
pub fn range_contains(range: &Value, actual: &Value) -> bool {
    let Some((lo, hi)) = range.range_bounds() else {
        return false;
    };
    let inside = |n: NumberType| lo <= n && n <= hi;

    match actual {
        Value::Number(n) => inside(*n),
        Value::Range { .. } => actual
            .range_bounds()
            .is_some_and(|(other_lo, other_hi)| lo <= other_hi && hi >= other_lo),
        Value::List(items) => items
            .iter()
            .all(|item| matches!(item, Value::Number(n) if inside(*n))),
        _ => false,
    }
}

/// Named groups of the first match of `re` in `text`, in pattern order.
/// Groups that did not participate in the match are left out.
pub fn named_captures(re: &RegexValue, text: &str) -> Option<Vec<(String, String)>> {
    let caps = re.regex.captures(text)?;
    Some(
        re.regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.to_owned(), m.as_str().to_owned()))
            })
            .collect(),
    )
}
