//! This module defines the expression model shared by the reader and the evaluator.
//! The main enum, [`Value`], is a closed set of variants: basic values (nil, booleans,
//! numbers), string literals and symbols, lists, quoted expressions, ranges, regular
//! expressions, inline JSON, JSON pointers, and the two callable kinds (host builtins
//! and user closures). Every variant is distinguishable by a cheap tag test.
//!
//! Ergonomic helper functions such as [`val`], [`sym`] and [`nil`] are provided for
//! building trees in code and tests, together with `From` conversions from common
//! Rust types. Display is the surface syntax, so printed values read back the same way.

use crate::Error;
use crate::evaluator::Environment;
use crate::evaluator::intooperation::OperationFn;
use std::sync::Arc;

/// Type alias for number values in interpreter
pub(crate) type NumberType = f64;

/// Largest magnitude printed without a fractional part
const MAX_DISPLAY_INTEGER: NumberType = 9_007_199_254_740_991.0;

/// A compiled regular expression together with its surface form.
#[derive(Clone, Debug)]
pub struct RegexValue {
    /// Pattern text as written between the slashes
    pub source: String,
    /// Flag letters as written after the closing slash
    pub flags: String,
    /// Set by the `g` flag: operator use returns every match instead of the first
    pub global: bool,
    pub regex: regex::Regex,
}

impl RegexValue {
    /// Compile `source` with JavaScript-style flag letters (`g i m s x u`).
    pub fn new(source: &str, flags: &str) -> Result<Self, Error> {
        let mut builder = regex::RegexBuilder::new(source);
        let mut global = false;
        for flag in flags.chars() {
            match flag {
                'g' => global = true,
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'x' => {
                    builder.ignore_whitespace(true);
                }
                'u' => {}
                other => {
                    return Err(Error::EvalError(format!("unknown regex flag '{other}'")));
                }
            }
        }
        let regex = builder
            .build()
            .map_err(|e| Error::EvalError(format!("invalid regex /{source}/: {e}")))?;

        Ok(RegexValue {
            source: source.to_owned(),
            flags: flags.to_owned(),
            global,
            regex,
        })
    }

    pub fn has_named_groups(&self) -> bool {
        self.regex.capture_names().flatten().next().is_some()
    }
}

impl PartialEq for RegexValue {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source && self.flags == other.flags
    }
}

/// Core expression type
///
/// Strings are split into two variants: [`Value::String`] is a literal that evaluates
/// to itself, [`Value::Symbol`] is a name resolved through the environment.
///
/// To build an expression tree, use the helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for the null value
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub enum Value {
    /// The null value
    Nil,
    Bool(bool),
    Number(NumberType),
    /// String literals
    String(String),
    /// Symbols (identifiers)
    Symbol(String),
    List(Vec<Value>),
    /// Quoted expression; suppresses operator dispatch of its payload
    Quoted(Box<Value>),
    /// Numeric interval, direction-agnostic for containment and equality
    Range {
        start: NumberType,
        end: NumberType,
        step: Option<NumberType>,
    },
    Regex(RegexValue),
    /// Inline JSON object or array
    Json(serde_json::Value),
    /// JSON pointer path, always starting with `/`
    Pointer(String),
    /// Host functions, compared by id
    BuiltinFunction {
        id: String,
        // Stored as an Arc so typed Rust functions can be wrapped into the
        // erased evaluator signature at registration time.
        func: Arc<OperationFn>,
    },
    /// User-defined closures
    Function {
        /// Formal parameters, rest marker included
        params: Vec<Value>,
        /// Name bound to the remaining arguments when a rest marker is present
        rest_param: Option<String>,
        body: Box<Value>,
        env: Environment,
    },
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "Nil"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::Number(n) => write!(f, "Number({n})"),
            Value::String(s) => write!(f, "String({s:?})"),
            Value::Symbol(s) => write!(f, "Symbol({s})"),
            Value::List(list) => f.debug_tuple("List").field(list).finish(),
            Value::Quoted(inner) => write!(f, "Quoted({inner:?})"),
            Value::Range { start, end, step } => {
                write!(f, "Range({start}..{end}, step={step:?})")
            }
            Value::Regex(re) => write!(f, "Regex(/{}/{})", re.source, re.flags),
            Value::Json(json) => write!(f, "Json({json})"),
            Value::Pointer(path) => write!(f, "Pointer({path})"),
            Value::BuiltinFunction { id, .. } => write!(f, "BuiltinFunction({id})"),
            Value::Function { params, body, .. } => {
                write!(f, "Function(params={params:?}, body={body:?})")
            }
        }
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<NumberType> for Value {
    fn from(n: NumberType) -> Self {
        Value::Number(n)
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Number(n as NumberType)
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(i64);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);
impl_from_integer!(usize);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::List(arr.into_iter().map(|x| x.into()).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::List(slice.iter().cloned().map(|x| x.into()).collect())
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(&json)
    }
}

// Fallible conversions from `Value` back into primitive Rust types.

impl std::convert::TryInto<NumberType> for Value {
    type Error = Error;

    fn try_into(self) -> Result<NumberType, Error> {
        if let Value::Number(n) = self {
            Ok(n)
        } else {
            Err(Error::type_error("number", &self))
        }
    }
}

impl std::convert::TryInto<bool> for Value {
    type Error = Error;

    fn try_into(self) -> Result<bool, Error> {
        if let Value::Bool(b) = self {
            Ok(b)
        } else {
            Err(Error::type_error("boolean", &self))
        }
    }
}

/// Helper for creating symbols
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(name.as_ref().to_owned())
}

/// Helper for creating Values from anything convertible
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// Helper for the null value
pub fn nil() -> Value {
    Value::Nil
}

/// Helper for quoting an expression
pub fn quote<T: Into<Value>>(value: T) -> Value {
    Value::Quoted(Box::new(value.into()))
}

fn write_number(f: &mut std::fmt::Formatter<'_>, n: NumberType) -> std::fmt::Result {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_DISPLAY_INTEGER {
        write!(f, "{}", n as i64)
    } else {
        write!(f, "{n}")
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write_number(f, *n),
            Value::String(s) => {
                write!(f, "\"")?;
                for ch in s.chars() {
                    match ch {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")
            }
            Value::Symbol(s) => write!(f, "{s}"),
            Value::List(elements) => {
                write!(f, "(")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ")")
            }
            Value::Quoted(inner) => write!(f, "'{inner}"),
            Value::Range { start, end, step } => {
                write_number(f, *start)?;
                write!(f, "..")?;
                write_number(f, *end)?;
                if let Some(step) = step {
                    write!(f, "//")?;
                    write_number(f, *step)?;
                }
                Ok(())
            }
            Value::Regex(re) => write!(f, "/{}/{}", re.source, re.flags),
            Value::Json(json) => write!(f, "{json}"),
            Value::Pointer(path) => write!(f, "/{path}"),
            Value::BuiltinFunction { id, .. } => write!(f, "#<builtin:{id}>"),
            Value::Function { params, .. } => {
                write!(f, "#<fn (")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{param}")?;
                }
                write!(f, ")>")
            }
        }
    }
}

impl Value {
    /// Short tag name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Symbol(_) => "symbol",
            Value::List(_) => "list",
            Value::Quoted(_) => "quoted",
            Value::Range { .. } => "range",
            Value::Regex(_) => "regex",
            Value::Json(_) => "json",
            Value::Pointer(_) => "pointer",
            Value::BuiltinFunction { .. } => "builtin",
            Value::Function { .. } => "function",
        }
    }

    /// True for the null value and the empty list
    pub fn is_nil(&self) -> bool {
        match self {
            Value::Nil => true,
            Value::List(list) => list.is_empty(),
            _ => false,
        }
    }

    /// `nil`, `false` and the empty list are falsy; everything else is truthy
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false)) && !self.is_nil()
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::BuiltinFunction { .. } | Value::Function { .. })
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Text for string-like values; `None` for everything else
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Rendering used by string concatenation and `to_s`: strings print without quotes
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::List(elements) => {
                let parts: Vec<String> = elements.iter().map(Value::to_plain_string).collect();
                format!("({})", parts.join(" "))
            }
            other => other.to_string(),
        }
    }

    /// Lower and upper bound of a range regardless of declared direction
    pub fn range_bounds(&self) -> Option<(NumberType, NumberType)> {
        match self {
            Value::Range { start, end, .. } => Some((start.min(*end), start.max(*end))),
            _ => None,
        }
    }

    /// Convert into plain JSON data. Lists become arrays; callables have no JSON form.
    pub fn to_json(&self) -> Option<serde_json::Value> {
        use serde_json::Value as Json;
        Some(match self {
            Value::Nil => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) => number_to_json(*n),
            Value::String(s) | Value::Symbol(s) => Json::String(s.clone()),
            Value::List(elements) => Json::Array(
                elements
                    .iter()
                    .map(Value::to_json)
                    .collect::<Option<Vec<_>>>()?,
            ),
            Value::Quoted(inner) => inner.to_json()?,
            Value::Json(json) => json.clone(),
            Value::Range { .. } | Value::Regex(_) | Value::Pointer(_) => {
                Json::String(self.to_string())
            }
            Value::BuiltinFunction { .. } | Value::Function { .. } => return None,
        })
    }

    /// Convert JSON data into a value. Arrays become lists; objects stay as JSON.
    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Nil,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => n.as_f64().map_or(Value::Nil, Value::Number),
            Json::String(s) => Value::String(s.clone()),
            Json::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            Json::Object(_) => Value::Json(json.clone()),
        }
    }
}

pub(crate) fn number_to_json(n: NumberType) -> serde_json::Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() <= MAX_DISPLAY_INTEGER {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Quoted(a), Value::Quoted(b)) => a == b,
            (Value::Range { step: s1, .. }, Value::Range { step: s2, .. }) => {
                self.range_bounds() == other.range_bounds() && s1 == s2
            }
            (Value::Regex(a), Value::Regex(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::BuiltinFunction { id: id1, .. }, Value::BuiltinFunction { id: id2, .. }) => {
                id1 == id2
            }
            (
                Value::Function {
                    params: p1,
                    body: b1,
                    env: e1,
                    ..
                },
                Value::Function {
                    params: p2,
                    body: b2,
                    env: e2,
                    ..
                },
            ) => p1 == p2 && b1 == b2 && e1 == e2,
            _ => false,
        }
    }
}
