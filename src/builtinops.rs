//! Built-in operations registry.
//!
//! One table lists every name the language gives meaning to before any user
//! code runs. Entries come in two kinds:
//!
//! - **Special forms** control the evaluation of their own arguments
//!   (`def`, `if`, `fn`, `let`, `apply`, ...). They are recognized by name in
//!   operator position and are never bound in an environment.
//! - **Functions** receive their arguments evaluated (unless the entry sets
//!   `skip_evaluate_args`, as `select` does) and are seeded into every root
//!   environment by [`create_global_env`](crate::evaluator::create_global_env)
//!   as ordinary bindings, so user code may shadow or overload them.
//!
//! ```text
//! (+ 1 2 3)              ; 6
//! (+ "n=" 4)             ; "n=4"
//! (len '(1 2 3))         ; 3
//! (to_i "42px")          ; 42
//! (begin (wait 10) 1)    ; 1, after 10ms
//! (select "a/b" {"a": {"b": 4}})  ; 4
//! ```
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with typed parameters (`NumberType`, `Value`,
//!    `&str`, or a `ValueIter`/`NumIter`/`StringIter` rest parameter)
//! 2. **Add to BUILTIN_OPS** with its identifier, arity and define options
//! 3. **Add tests** covering edge cases and error conditions

use crate::Error;
use crate::ast::{NumberType, Value};
use crate::evaluator::intooperation::{
    BuiltinFuture, IntoOperation, IntoVariadicOperation, OperationFn, check_arity, resolved,
};
use crate::evaluator::{
    DefineOptions, Environment, NumIter, SpecialFormFn, ValueIter, eval_apply, eval_begin,
    eval_car, eval_cdr, eval_cons, eval_define, eval_equals, eval_if, eval_lambda, eval_let,
    eval_list_form, eval_match, eval_null, eval_range,
};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Accepted argument counts of an operation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// At least n arguments
    AtLeast(usize),
    /// Between min and max arguments (inclusive)
    Range(usize, usize),
    /// Any number of arguments
    Any,
}

impl Arity {
    pub fn validate(&self, arg_count: usize) -> Result<(), Error> {
        match *self {
            Arity::Exact(n) if arg_count != n => Err(Error::arity_error(n, arg_count)),
            Arity::AtLeast(n) if arg_count < n => {
                Err(Error::arity_error(format!("at least {n}"), arg_count))
            }
            Arity::Range(min, max) if arg_count < min || arg_count > max => {
                let expected = if max == min + 1 {
                    format!("{min} or {max}")
                } else {
                    format!("{min} to {max}")
                };
                Err(Error::arity_error(expected, arg_count))
            }
            _ => Ok(()),
        }
    }
}

/// Represents the implementation of a built-in expression (function or special form)
#[derive(Clone)]
pub enum OpKind {
    /// Regular function that takes its arguments and returns a (possibly pending) value
    /// via the canonical erased builtin signature used by the evaluator.
    Function(Arc<OperationFn>),
    /// Special form that requires access to the environment, unevaluated arguments and current evaluation depth
    SpecialForm(SpecialFormFn),
}

impl std::fmt::Debug for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OpKind::Function(_) => write!(f, "Function(<fn>)"),
            OpKind::SpecialForm(_) => write!(f, "SpecialForm(<fn>)"),
        }
    }
}

/// Definition of a built-in operation
#[derive(Debug, Clone)]
pub struct BuiltinOp {
    /// The identifier this operation is called by
    pub id: &'static str,
    /// The implementation of this operation (function or special form)
    pub op_kind: OpKind,
    /// Expected number of arguments
    pub arity: Arity,
    /// Options of the environment binding created for functions
    pub options: DefineOptions,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl BuiltinOp {
    /// Check if this operation is a special form
    pub(crate) fn is_special_form(&self) -> bool {
        matches!(self.op_kind, OpKind::SpecialForm(_))
    }

    /// Check if the given number of arguments is valid for this operation
    pub(crate) fn validate_arity(&self, arg_count: usize) -> Result<(), Error> {
        self.arity.validate(arg_count)
    }
}

//
// Builtin Function Implementations
//

/// Numeric sum, or concatenation of plain renderings when any argument is a string
fn builtin_add(args: ValueIter<'_>) -> Result<Value, Error> {
    let args: Vec<&Value> = args.collect();
    if args.iter().any(|v| matches!(v, Value::String(_))) {
        return Ok(Value::String(
            args.iter().map(|v| v.to_plain_string()).collect(),
        ));
    }

    let mut sum: NumberType = 0.0;
    for arg in args {
        match arg {
            Value::Number(n) => sum += n,
            other => return Err(Error::type_error("number", other)),
        }
    }
    Ok(Value::Number(sum))
}

fn builtin_sub(args: NumIter<'_>) -> NumberType {
    let mut iter = args;
    match iter.next() {
        None => 0.0,
        Some(first) if iter.len() == 0 => -first,
        Some(first) => iter.fold(first, |acc, n| acc - n),
    }
}

fn builtin_mul(args: NumIter<'_>) -> NumberType {
    args.product()
}

fn builtin_div(args: NumIter<'_>) -> Result<NumberType, Error> {
    let divide = |acc: NumberType, n: NumberType| {
        if n == 0.0 {
            Err(Error::EvalError("division by zero".to_owned()))
        } else {
            Ok(acc / n)
        }
    };

    let mut iter = args;
    match iter.next() {
        None => Ok(1.0),
        Some(first) if iter.len() == 0 => divide(1.0, first),
        Some(first) => iter.try_fold(first, divide),
    }
}

fn builtin_is_list(value: Value) -> bool {
    matches!(value, Value::List(_))
}

fn builtin_equal(first: Value, second: Value) -> bool {
    first == second
}

fn builtin_is_nil(value: Value) -> bool {
    value.is_nil()
}

fn builtin_len(value: Value) -> usize {
    match value {
        Value::List(items) => items.len(),
        Value::String(s) => s.chars().count(),
        Value::Json(serde_json::Value::Array(items)) => items.len(),
        Value::Json(serde_json::Value::Object(map)) => map.len(),
        _ => 0,
    }
}

fn builtin_log(args: ValueIter<'_>) -> Value {
    let message: Vec<String> = args.map(Value::to_plain_string).collect();
    tracing::info!(target: "filth::log", "{}", message.join(" "));
    Value::Nil
}

fn builtin_to_i(value: Value) -> Result<NumberType, Error> {
    match value {
        Value::Number(n) => Ok(n.trunc()),
        Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
        Value::String(s) => parse_leading_integer(&s)
            .ok_or_else(|| Error::EvalError(format!("cannot convert \"{s}\" to an integer"))),
        other => Err(Error::EvalError(format!(
            "cannot convert {other} to an integer"
        ))),
    }
}

/// Integer value of the optional sign and digits at the start of `text`
fn parse_leading_integer(text: &str) -> Option<NumberType> {
    let text = text.trim_start();
    let digits_start = usize::from(text.starts_with(['-', '+']));
    let digits_len = text[digits_start..]
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len() - digits_start);
    if digits_len == 0 {
        return None;
    }
    text[..digits_start + digits_len].parse::<NumberType>().ok()
}

fn builtin_to_f(value: Value) -> Result<NumberType, Error> {
    match value {
        Value::Number(n) => Ok(n),
        Value::Bool(b) => Ok(if b { 1.0 } else { 0.0 }),
        Value::String(s) => s
            .trim()
            .parse::<NumberType>()
            .map_err(|_| Error::EvalError(format!("cannot convert \"{s}\" to a number"))),
        other => Err(Error::EvalError(format!(
            "cannot convert {other} to a number"
        ))),
    }
}

fn builtin_to_b(value: Value) -> bool {
    match value {
        Value::String(s) => s == "true",
        other => other.is_truthy(),
    }
}

fn builtin_to_s(args: ValueIter<'_>) -> String {
    args.map(Value::to_plain_string).collect::<Vec<_>>().join(" ")
}

/// `(wait ms)`: suspend the evaluation for `ms` milliseconds
fn builtin_wait(_env: &Environment, args: Vec<Value>) -> BuiltinFuture {
    let millis = match args.as_slice() {
        [Value::Number(ms)] if *ms >= 0.0 && ms.is_finite() => *ms,
        [other] => return resolved(Err(Error::type_error("non-negative number", other))),
        _ => return resolved(Err(Error::arity_error(1, args.len()))),
    };
    let delay = match Duration::try_from_secs_f64(millis / 1000.0) {
        Ok(delay) => delay,
        Err(e) => return resolved(Err(Error::EvalError(format!("wait: {millis}ms: {e}")))),
    };

    Box::pin(async move {
        tracing::debug!(millis, "waiting");
        tokio::time::sleep(delay).await;
        Ok::<_, Error>(Value::Nil)
    })
}

fn builtin_select(env: &Environment, args: Vec<Value>) -> BuiltinFuture {
    resolved(crate::pointer::select(env, &args))
}

/// Global registry of all built-in operations.
///
/// Builtin implementations are wired through the same adapter layer used
/// for custom builtin registration, once, at initialization time.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn builtin_fixed<Args, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoOperation<Args>,
    {
        <F as IntoOperation<Args>>::into_operation(f)
    }

    fn builtin_variadic<Args, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoVariadicOperation<Args>,
    {
        <F as IntoVariadicOperation<Args>>::into_variadic_operation(f)
    }

    fn function(id: &'static str, arity: Arity, op: Arc<OperationFn>) -> BuiltinOp {
        BuiltinOp {
            id,
            op_kind: OpKind::Function(check_arity(arity, op)),
            arity,
            options: DefineOptions::default(),
        }
    }

    fn special_form(id: &'static str, arity: Arity, form: SpecialFormFn) -> BuiltinOp {
        BuiltinOp {
            id,
            op_kind: OpKind::SpecialForm(form),
            arity,
            options: DefineOptions::default(),
        }
    }

    vec![
        // Definitions and functions
        special_form("def", Arity::AtLeast(2), eval_define),
        special_form("define", Arity::AtLeast(2), eval_define),
        // fn/lambda report their own shape errors as LambdaError
        special_form("fn", Arity::Any, eval_lambda),
        special_form("lambda", Arity::Any, eval_lambda),
        special_form("apply", Arity::Any, eval_apply),
        // Control flow and scoping
        special_form("if", Arity::Range(2, 3), eval_if),
        special_form("begin", Arity::Any, eval_begin),
        special_form("let", Arity::AtLeast(1), eval_let),
        // Lists
        special_form("cons", Arity::Exact(2), eval_cons),
        special_form("car", Arity::Exact(1), eval_car),
        special_form("cdr", Arity::Exact(1), eval_cdr),
        special_form("list", Arity::Any, eval_list_form),
        special_form("null?", Arity::Exact(1), eval_null),
        // Matching and ranges
        special_form("=", Arity::Exact(2), eval_equals),
        special_form("~", Arity::Exact(2), eval_match),
        special_form("..", Arity::Range(2, 3), eval_range),
        // Arithmetic
        function(
            "+",
            Arity::Any,
            builtin_variadic::<(ValueIter<'static>,), _>(builtin_add),
        ),
        function(
            "-",
            Arity::Any,
            builtin_variadic::<(NumIter<'static>,), _>(builtin_sub),
        ),
        function(
            "*",
            Arity::Any,
            builtin_variadic::<(NumIter<'static>,), _>(builtin_mul),
        ),
        function(
            "/",
            Arity::Any,
            builtin_variadic::<(NumIter<'static>,), _>(builtin_div),
        ),
        // Predicates
        function("list?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_is_list)),
        function(
            "equal?",
            Arity::Exact(2),
            builtin_fixed::<(Value, Value), _>(builtin_equal),
        ),
        function("nil?", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_is_nil)),
        function("len", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_len)),
        // Host effects
        function("wait", Arity::Exact(1), Arc::new(builtin_wait)),
        function(
            "log",
            Arity::Any,
            builtin_variadic::<(ValueIter<'static>,), _>(builtin_log),
        ),
        // Conversions
        function("to_i", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_to_i)),
        function("to_f", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_to_f)),
        function("to_b", Arity::Exact(1), builtin_fixed::<(Value,), _>(builtin_to_b)),
        function(
            "to_s",
            Arity::Any,
            builtin_variadic::<(ValueIter<'static>,), _>(builtin_to_s),
        ),
        // Pointer navigation over unevaluated arguments
        BuiltinOp {
            options: DefineOptions {
                skip_evaluate_args: true,
                ..DefineOptions::default()
            },
            ..function("select", Arity::Exact(2), Arc::new(builtin_select))
        },
    ]
});

/// Lazy static map from id to BuiltinOp (private - use find_builtin_op)
static BUILTIN_BY_ID: LazyLock<HashMap<&'static str, &'static BuiltinOp>> = LazyLock::new(|| {
    let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
    ops.iter().map(|op| (op.id, op)).collect()
});

/// Get all builtin operations (for internal use by evaluator)
pub(crate) fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a builtin operation by its identifier
pub(crate) fn find_builtin_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_ID.get(id).copied()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{nil, sym, val};
    use serde_json::json;
    use std::time::Instant;

    /// Micro-helper for success cases in comprehensive tests
    fn success<T: Into<Value>>(value: T) -> Option<Value> {
        Some(val(value))
    }

    /// Invoke a builtin through the public registry using the canonical
    /// erased signature, exercising the adapter layer.
    async fn call_builtin(name: &str, args: &[Value]) -> Result<Value, Error> {
        let op = find_builtin_op(name).unwrap();
        match &op.op_kind {
            OpKind::Function(func) => func(&Environment::new(), args.to_vec()).await,
            OpKind::SpecialForm(_) => {
                panic!("expected function builtin in tests, got special form: {name}")
            }
        }
    }

    #[test]
    fn test_builtin_ops_registry() {
        let add_op = find_builtin_op("+").unwrap();
        assert_eq!(add_op.arity, Arity::Any);
        assert!(!add_op.is_special_form());
        assert_eq!(add_op.options, DefineOptions::default());

        let if_op = find_builtin_op("if").unwrap();
        assert!(if_op.is_special_form());
        assert_eq!(if_op.arity, Arity::Range(2, 3));

        assert!(find_builtin_op("select").unwrap().options.skip_evaluate_args);
        assert!(find_builtin_op("def").unwrap().is_special_form());
        assert!(find_builtin_op("lambda").unwrap().is_special_form());
        assert!(find_builtin_op("unknown").is_none());

        // every id is unique
        let all_ops = get_builtin_ops();
        assert_eq!(BUILTIN_BY_ID.len(), all_ops.len());
    }

    #[test]
    fn test_arity_validation() {
        let test_cases = vec![
            (Arity::Exact(2), 2, None),
            (Arity::Exact(2), 1, Some("expected 2 arguments, got 1")),
            (Arity::AtLeast(1), 3, None),
            (Arity::AtLeast(1), 0, Some("expected at least 1 arguments, got 0")),
            (Arity::Range(2, 3), 3, None),
            (Arity::Range(2, 3), 4, Some("expected 2 or 3 arguments, got 4")),
            (Arity::Range(1, 4), 0, Some("expected 1 to 4 arguments, got 0")),
            (Arity::Any, 0, None),
            (Arity::Any, 99, None),
        ];

        for (arity, count, expected) in test_cases {
            match (arity.validate(count), expected) {
                (Ok(()), None) => {}
                (Err(err), Some(text)) => assert!(
                    err.to_string().contains(text),
                    "{arity:?} with {count}: {err}"
                ),
                (result, expected) => panic!("{arity:?} with {count}: {result:?}, expected {expected:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_builtin_function_implementations() {
        let test_cases: Vec<(&str, Vec<Value>, Option<Value>)> = vec![
            // Addition and concatenation
            ("+", vec![val(1), val(2), val(3)], success(6)),
            ("+", vec![], success(0)),
            ("+", vec![val(0.5), val(0.25)], success(0.75)),
            ("+", vec![val("a"), val(1), val("b")], success("a1b")),
            ("+", vec![val("x"), nil()], success("xnil")),
            ("+", vec![val("l="), val([1, 2])], success("l=(1 2)")),
            ("+", vec![val(1), val(true)], None),
            ("+", vec![val(1), sym("x")], None),
            // Subtraction
            ("-", vec![val(10), val(3), val(2)], success(5)),
            ("-", vec![val(10)], success(-10)),
            ("-", vec![], success(0)),
            ("-", vec![val("a")], None),
            // Multiplication
            ("*", vec![val(2), val(3), val(4)], success(24)),
            ("*", vec![val(7)], success(7)),
            ("*", vec![], success(1)),
            // Division
            ("/", vec![val(24), val(2), val(3)], success(4)),
            ("/", vec![val(4)], success(0.25)),
            ("/", vec![], success(1)),
            ("/", vec![val(1), val(0)], None),
            ("/", vec![val(0)], None),
            // Predicates
            ("list?", vec![val([1])], success(true)),
            ("list?", vec![val(Vec::<Value>::new())], success(true)),
            ("list?", vec![nil()], success(false)),
            ("list?", vec![], None),
            ("equal?", vec![val([1, 2]), val([1, 2])], success(true)),
            ("equal?", vec![val(1), val("1")], success(false)),
            ("nil?", vec![nil()], success(true)),
            ("nil?", vec![val(Vec::<Value>::new())], success(true)),
            ("nil?", vec![val(false)], success(false)),
            // Length
            ("len", vec![val([1, 2, 3])], success(3)),
            ("len", vec![val("héllo")], success(5)),
            ("len", vec![Value::Json(json!([1, 2]))], success(2)),
            ("len", vec![Value::Json(json!({"a": 1}))], success(1)),
            ("len", vec![val(42)], success(0)),
            ("len", vec![val(1), val(2)], None),
            // Conversions
            ("to_i", vec![val(3.9)], success(3)),
            ("to_i", vec![val(-3.9)], success(-3)),
            ("to_i", vec![val("42px")], success(42)),
            ("to_i", vec![val("  -12")], success(-12)),
            ("to_i", vec![val(true)], success(1)),
            ("to_i", vec![val("px42")], None),
            ("to_i", vec![val("-")], None),
            ("to_i", vec![nil()], None),
            ("to_f", vec![val("2.5")], success(2.5)),
            ("to_f", vec![val(" 1e3 ")], success(1000)),
            ("to_f", vec![val("2.5kg")], None),
            ("to_b", vec![val("true")], success(true)),
            ("to_b", vec![val("false")], success(false)),
            ("to_b", vec![val(1)], success(true)),
            ("to_b", vec![val(Vec::<Value>::new())], success(false)),
            ("to_s", vec![val(1), val("a"), val(2.5)], success("1 a 2.5")),
            ("to_s", vec![], success("")),
            // Logging has no value
            ("log", vec![val("hello"), val(1)], Some(nil())),
            // Pointer selection on raw arguments
            ("select", vec![val("a"), Value::Json(json!({"a": 1}))], success(1)),
            ("select", vec![Value::Pointer("/0".into()), val([7, 8])], success(7)),
            ("select", vec![val("a")], None),
            // Suspension argument checks
            ("wait", vec![val(-1)], None),
            ("wait", vec![val("soon")], None),
            ("wait", vec![], None),
            // longer than any representable delay
            ("wait", vec![val(1e300)], None),
        ];

        for (i, (name, args, expected)) in test_cases.into_iter().enumerate() {
            let result = call_builtin(name, &args).await;
            match (result, expected) {
                (Ok(actual), Some(expected)) => {
                    assert_eq!(actual, expected, "case #{} ({name} {args:?})", i + 1);
                }
                (Err(_), None) => {}
                (Ok(actual), None) => {
                    panic!("case #{} ({name} {args:?}): expected error, got {actual}", i + 1)
                }
                (Err(err), Some(expected)) => {
                    panic!("case #{} ({name} {args:?}): expected {expected}, got {err}", i + 1)
                }
            }
        }
    }

    #[tokio::test]
    async fn test_wait_suspends() {
        let start = Instant::now();
        let result = call_builtin("wait", &[val(20)]).await.unwrap();
        assert_eq!(result, nil());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_parse_leading_integer() {
        assert_eq!(parse_leading_integer("123"), Some(123.0));
        assert_eq!(parse_leading_integer("+7 apples"), Some(7.0));
        assert_eq!(parse_leading_integer("-0"), Some(-0.0));
        assert_eq!(parse_leading_integer(""), None);
        assert_eq!(parse_leading_integer("+"), None);
        assert_eq!(parse_leading_integer("1.5"), Some(1.0));
    }
}
