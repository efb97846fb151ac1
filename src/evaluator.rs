use crate::Error;
use crate::MAX_EVAL_DEPTH;
use crate::ast::{Value, sym};
use crate::builtinops::{OpKind, find_builtin_op, get_builtin_ops};
use crate::pattern::{is_rest_marker, match_params, range_contains, rest_param_name};
use crate::pointer::pointer_matches;
use std::future::Future;
use std::pin::Pin;

mod environment;
pub(crate) mod intooperation;
mod operators;

pub use environment::{Binding, DefineOptions, Environment};
pub use intooperation::{BuiltinFuture, NumIter, StringIter, ValueIter};

/// A pending evaluation borrowing its expression and environment.
pub type EvalFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, Error>> + 'a>>;

/// Signature shared by every special form: unevaluated arguments, the
/// calling environment and the current evaluation depth.
pub(crate) type SpecialFormFn = for<'a> fn(&'a [Value], &'a Environment, usize) -> EvalFuture<'a>;

/// Evaluate an expression (public API)
///
/// Evaluation is strictly sequential: every argument, special-form operand and
/// list element is awaited before the next one starts.
pub async fn eval(expr: &Value, env: &Environment) -> Result<Value, Error> {
    eval_with_depth_tracking(expr, env, 0).await
}

fn depth_exceeded() -> Error {
    Error::EvalError(format!(
        "Evaluation depth limit exceeded (max: {MAX_EVAL_DEPTH})"
    ))
}

/// Evaluate an expression with depth tracking to prevent runaway recursion
pub(crate) fn eval_with_depth_tracking<'a>(
    expr: &'a Value,
    env: &'a Environment,
    depth: usize,
) -> EvalFuture<'a> {
    Box::pin(async move {
        if depth >= MAX_EVAL_DEPTH {
            return Err(depth_exceeded());
        }
        match expr {
            // Self-evaluating forms
            Value::Nil
            | Value::Bool(_)
            | Value::Number(_)
            | Value::String(_)
            | Value::Range { .. }
            | Value::Regex(_)
            | Value::Json(_)
            | Value::Pointer(_)
            | Value::BuiltinFunction { .. }
            | Value::Function { .. } => Ok(expr.clone()),

            Value::Symbol(name) => resolve_symbol(name, env, depth),

            // Quoting suppresses dispatch, not evaluation of the elements
            Value::Quoted(inner) => match inner.as_ref() {
                Value::List(elements) => Ok(Value::List(eval_args(elements, env, depth).await?)),
                other => Ok(other.clone()),
            },

            Value::List(elements) => eval_list(elements, env, depth)
                .await
                .map_err(|err| add_context(err, expr)),
        }
    })
}

/// Look a symbol up, following alias chains until a non-symbol value is reached
fn resolve_symbol(name: &str, env: &Environment, depth: usize) -> Result<Value, Error> {
    let mut value = env.lookup(name, None)?.value;
    let mut hops = depth;
    while let Value::Symbol(alias) = &value {
        hops += 1;
        if hops >= MAX_EVAL_DEPTH {
            return Err(depth_exceeded());
        }
        value = env.lookup(alias, None)?.value;
    }
    Ok(value)
}

/// Helper function to add expression context to errors
fn add_context(error: Error, expr: &Value) -> Error {
    match error {
        Error::EvalError(msg) if !msg.contains("\n  Context:") => {
            Error::EvalError(format!("{msg}\n  Context: while evaluating: {expr}"))
        }
        // Undefined symbols and lambda errors keep their message verbatim
        other => other,
    }
}

/// Helper function to evaluate argument expressions left to right
async fn eval_args(args: &[Value], env: &Environment, depth: usize) -> Result<Vec<Value>, Error> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval_with_depth_tracking(arg, env, depth).await?);
    }
    Ok(values)
}

/// Evaluate every expression in order and return the last value (nil when empty)
async fn eval_sequence(exprs: &[Value], env: &Environment, depth: usize) -> Result<Value, Error> {
    let mut result = Value::Nil;
    for expr in exprs {
        result = eval_with_depth_tracking(expr, env, depth).await?;
    }
    Ok(result)
}

/// Spread list arguments one level into positional arguments
fn flatten(args: &[Value]) -> Vec<Value> {
    let mut flat = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::List(items) => flat.extend(items.iter().cloned()),
            other => flat.push(other.clone()),
        }
    }
    flat
}

/// Evaluate a list expression
async fn eval_list(elements: &[Value], env: &Environment, depth: usize) -> Result<Value, Error> {
    let Some((operator, args)) = elements.split_first() else {
        return Ok(Value::Nil);
    };

    match operator {
        Value::Range { .. } | Value::Regex(_) | Value::Json(_) | Value::Pointer(_) => {
            let evaluated = eval_args(args, env, depth).await?;
            operators::apply_operator(operator, evaluated, env, depth).await
        }

        Value::Symbol(name) => {
            if let Some(op) = find_builtin_op(name)
                && let OpKind::SpecialForm(special_form) = &op.op_kind
            {
                op.validate_arity(args.len())?;
                return special_form(args, env, depth).await;
            }
            eval_call(name, args, env, depth).await
        }

        Value::BuiltinFunction { .. } | Value::Function { .. } => {
            let evaluated = eval_args(args, env, depth).await?;
            apply_callable(operator, evaluated, env, depth).await
        }

        // A computed operator is applied when it yields something callable or
        // an operator value; otherwise the list is an implicit sequence.
        Value::List(_) => {
            let head = eval_with_depth_tracking(operator, env, depth).await?;
            if head.is_callable() {
                let evaluated = eval_args(args, env, depth).await?;
                apply_callable(&head, evaluated, env, depth).await
            } else if matches!(
                head,
                Value::Range { .. } | Value::Regex(_) | Value::Json(_) | Value::Pointer(_)
            ) {
                let evaluated = eval_args(args, env, depth).await?;
                operators::apply_operator(&head, evaluated, env, depth).await
            } else if args.is_empty() {
                Ok(head)
            } else {
                eval_sequence(args, env, depth).await
            }
        }

        _ => eval_sequence(elements, env, depth).await,
    }
}

/// Call the function bound to `name`.
///
/// The latest binding in the nearest defining scope decides the calling
/// convention: a binding marked `skip_evaluate_args` receives the argument
/// expressions as written. Otherwise the arguments are evaluated and the
/// binding is chosen by matching them against each candidate's parameters.
async fn eval_call(
    name: &str,
    args: &[Value],
    env: &Environment,
    depth: usize,
) -> Result<Value, Error> {
    let binding = env.lookup(name, None)?;
    if binding.options.skip_evaluate_args {
        tracing::trace!(name, "calling with unevaluated arguments");
        return apply_resolved(name, binding.value, args.to_vec(), env, depth).await;
    }

    let evaluated = eval_args(args, env, depth).await?;
    dispatch_evaluated(name, evaluated, env, depth).await
}

/// Resolve `name` against already evaluated arguments and apply the winner
async fn dispatch_evaluated(
    name: &str,
    args: Vec<Value>,
    env: &Environment,
    depth: usize,
) -> Result<Value, Error> {
    let binding = env.lookup(name, Some(&flatten(&args)))?;
    apply_resolved(name, binding.value, args, env, depth).await
}

async fn apply_resolved(
    name: &str,
    value: Value,
    args: Vec<Value>,
    env: &Environment,
    depth: usize,
) -> Result<Value, Error> {
    match value {
        Value::BuiltinFunction { .. } | Value::Function { .. } => {
            apply_callable(&value, args, env, depth).await
        }
        Value::Range { .. } | Value::Regex(_) | Value::Json(_) | Value::Pointer(_) => {
            operators::apply_operator(&value, args, env, depth).await
        }
        Value::Symbol(alias) => {
            if depth + 1 >= MAX_EVAL_DEPTH {
                return Err(depth_exceeded());
            }
            tracing::trace!(name, alias = alias.as_str(), "following alias");
            Box::pin(dispatch_evaluated(&alias, args, env, depth + 1)).await
        }
        // Plain data bound to a name is returned as is
        other => Ok(other),
    }
}

/// Apply a builtin or closure to evaluated arguments
pub(crate) async fn apply_callable(
    callee: &Value,
    args: Vec<Value>,
    env: &Environment,
    depth: usize,
) -> Result<Value, Error> {
    match callee {
        Value::BuiltinFunction { id, func } => {
            tracing::trace!(builtin = id.as_str(), argc = args.len(), "calling builtin");
            func(env, args).await
        }
        Value::Function {
            params,
            rest_param,
            body,
            env: closure_env,
        } => {
            let scope = closure_env.child();
            bind_arguments(&scope, params, rest_param.as_deref(), args);

            eval_with_depth_tracking(body, &scope, depth + 1)
                .await
                .map_err(|err| match err {
                    Error::EvalError(msg) if !msg.contains("\n  In function:") => {
                        Error::EvalError(format!("{msg}\n  In function: {body}"))
                    }
                    other => other,
                })
        }
        other => Err(Error::EvalError(format!(
            "Cannot apply non-function: {other}"
        ))),
    }
}

/// Bind a call's arguments in the fresh call scope.
///
/// Structural matches are tried on the flattened arguments first, then on the
/// arguments as passed. When neither matches, plain symbol parameters are bound
/// by position (missing arguments are nil) and the rest parameter receives
/// whatever is left.
fn bind_arguments(scope: &Environment, params: &[Value], rest_param: Option<&str>, args: Vec<Value>) {
    let options = DefineOptions::default();
    let flattened = flatten(&args);

    if let Some(bindings) = match_params(params, &flattened).or_else(|| match_params(params, &args)) {
        for (name, value) in bindings {
            scope.bind(name, value, options);
        }
        return;
    }

    tracing::trace!(params = params.len(), args = args.len(), "binding arguments by position");
    let fixed = params
        .iter()
        .position(is_rest_marker)
        .unwrap_or(params.len());
    for (index, param) in params[..fixed].iter().enumerate() {
        if let Value::Symbol(name) = param {
            scope.bind(name.clone(), args.get(index).cloned().unwrap_or(Value::Nil), options);
        }
    }
    if let Some(rest) = rest_param {
        let remaining = args.get(fixed..).map(<[Value]>::to_vec).unwrap_or_default();
        scope.bind(rest, Value::List(remaining), options);
    }
}

/// Build a closure over `env` from formal parameters and body forms
fn make_function(formals: &[Value], body: &[Value], env: &Environment) -> Result<Value, String> {
    let rest_param = rest_param_name(formals)?;
    let body = match body {
        [single] => single.clone(),
        forms => {
            let mut sequence = Vec::with_capacity(forms.len() + 1);
            sequence.push(sym("begin"));
            sequence.extend(forms.iter().cloned());
            Value::List(sequence)
        }
    };
    Ok(Value::Function {
        params: formals.to_vec(),
        rest_param,
        body: Box::new(body),
        env: env.clone(),
    })
}

// =====================================================================
// Special forms
// =====================================================================

/// `(def name value)`, `(def (name formals…) body…)` or `(def name (formals…) body…)`
pub(crate) fn eval_define<'a>(
    args: &'a [Value],
    env: &'a Environment,
    depth: usize,
) -> EvalFuture<'a> {
    Box::pin(async move {
        let (name, value) = match args {
            [Value::Symbol(name), expr] => {
                (name, eval_with_depth_tracking(expr, env, depth).await?)
            }
            [Value::List(signature), body @ ..] => match signature.split_first() {
                Some((Value::Symbol(name), formals)) => {
                    (name, make_function(formals, body, env).map_err(Error::EvalError)?)
                }
                _ => {
                    return Err(Error::EvalError(format!(
                        "def requires a symbol name, found {}",
                        Value::List(signature.clone())
                    )));
                }
            },
            [Value::Symbol(name), formals, body @ ..] => {
                let formals = match formals {
                    Value::List(formals) => formals.as_slice(),
                    single => std::slice::from_ref(single),
                };
                (name, make_function(formals, body, env).map_err(Error::EvalError)?)
            }
            [other, ..] => return Err(Error::type_error("symbol", other)),
            [] => return Err(Error::arity_error("at least 2", 0)),
        };

        env.define(name.clone(), value, DefineOptions::default())?;
        Ok(Value::Nil)
    })
}

/// `(if cond then [else])`
pub(crate) fn eval_if<'a>(args: &'a [Value], env: &'a Environment, depth: usize) -> EvalFuture<'a> {
    Box::pin(async move {
        let (condition, consequent, alternate) = match args {
            [condition, consequent] => (condition, consequent, None),
            [condition, consequent, alternate] => (condition, consequent, Some(alternate)),
            _ => return Err(Error::arity_error("2 or 3", args.len())),
        };

        if eval_with_depth_tracking(condition, env, depth).await?.is_truthy() {
            eval_with_depth_tracking(consequent, env, depth).await
        } else if let Some(alternate) = alternate {
            eval_with_depth_tracking(alternate, env, depth).await
        } else {
            Ok(Value::Nil)
        }
    })
}

/// `(cons head tail)`: a list tail is extended, nil counts as the empty list
pub(crate) fn eval_cons<'a>(
    args: &'a [Value],
    env: &'a Environment,
    depth: usize,
) -> EvalFuture<'a> {
    Box::pin(async move {
        let mut evaluated = eval_args(args, env, depth).await?.into_iter();
        let (Some(head), Some(tail), None) = (evaluated.next(), evaluated.next(), evaluated.next())
        else {
            return Err(Error::arity_error(2, args.len()));
        };
        Ok(match tail {
            Value::List(mut items) => {
                items.insert(0, head);
                Value::List(items)
            }
            Value::Nil => Value::List(vec![head]),
            other => Value::List(vec![head, other]),
        })
    })
}

async fn eval_non_empty_list(
    form: &str,
    args: &[Value],
    env: &Environment,
    depth: usize,
) -> Result<Vec<Value>, Error> {
    let [arg] = args else {
        return Err(Error::arity_error(1, args.len()));
    };
    match eval_with_depth_tracking(arg, env, depth).await? {
        Value::List(items) if !items.is_empty() => Ok(items),
        other => Err(Error::EvalError(format!(
            "{form}: argument must be a non-empty list, found {other}"
        ))),
    }
}

pub(crate) fn eval_car<'a>(args: &'a [Value], env: &'a Environment, depth: usize) -> EvalFuture<'a> {
    Box::pin(async move {
        let items = eval_non_empty_list("car", args, env, depth).await?;
        Ok(items.into_iter().next().unwrap_or(Value::Nil))
    })
}

pub(crate) fn eval_cdr<'a>(args: &'a [Value], env: &'a Environment, depth: usize) -> EvalFuture<'a> {
    Box::pin(async move {
        let items = eval_non_empty_list("cdr", args, env, depth).await?;
        Ok(Value::List(items.into_iter().skip(1).collect()))
    })
}

pub(crate) fn eval_list_form<'a>(
    args: &'a [Value],
    env: &'a Environment,
    depth: usize,
) -> EvalFuture<'a> {
    Box::pin(async move { Ok(Value::List(eval_args(args, env, depth).await?)) })
}

pub(crate) fn eval_null<'a>(args: &'a [Value], env: &'a Environment, depth: usize) -> EvalFuture<'a> {
    Box::pin(async move {
        let [arg] = args else {
            return Err(Error::arity_error(1, args.len()));
        };
        Ok(Value::Bool(eval_with_depth_tracking(arg, env, depth).await?.is_nil()))
    })
}

/// `(fn (formals…) body…)`; formals may be patterns and may contain a rest marker
pub(crate) fn eval_lambda<'a>(
    args: &'a [Value],
    env: &'a Environment,
    _depth: usize,
) -> EvalFuture<'a> {
    Box::pin(async move {
        match args {
            [Value::List(formals), body @ ..] if !body.is_empty() => {
                make_function(formals, body, env).map_err(Error::LambdaError)
            }
            [Value::List(_)] | [] => Err(Error::LambdaError(
                "fn requires a parameter list and a body".to_owned(),
            )),
            [other, ..] => Err(Error::LambdaError(format!(
                "fn parameters must be a list, found {other}"
            ))),
        }
    })
}

/// `(= a b)`: ranges test containment, regexes test a match, pointers test
/// resolution; everything else compares by value
pub(crate) fn eval_equals<'a>(
    args: &'a [Value],
    env: &'a Environment,
    depth: usize,
) -> EvalFuture<'a> {
    Box::pin(async move {
        let [left, right] = args else {
            return Err(Error::arity_error(2, args.len()));
        };
        let left = eval_with_depth_tracking(left, env, depth).await?;
        let right = eval_with_depth_tracking(right, env, depth).await?;

        let equal = match &left {
            Value::Range { .. } => range_contains(&left, &right),
            Value::Regex(re) => right.as_text().is_some_and(|text| re.regex.is_match(text)),
            Value::Pointer(path) => pointer_matches(path, &right),
            _ => left == right,
        };
        Ok(Value::Bool(equal))
    })
}

/// `(~ formals actuals)`: structural match of two unevaluated lists
pub(crate) fn eval_match<'a>(
    args: &'a [Value],
    _env: &'a Environment,
    _depth: usize,
) -> EvalFuture<'a> {
    Box::pin(async move {
        let unquote = |value: &'a Value| match value {
            Value::Quoted(inner) => inner.as_ref(),
            other => other,
        };
        match args {
            [formals, actuals] => match (unquote(formals), unquote(actuals)) {
                (Value::List(formals), Value::List(actuals)) => {
                    Ok(Value::Bool(match_params(formals, actuals).is_some()))
                }
                _ => Err(Error::EvalError("~ requires two lists".to_owned())),
            },
            _ => Err(Error::arity_error(2, args.len())),
        }
    })
}

/// `(.. start end [step])`
pub(crate) fn eval_range<'a>(
    args: &'a [Value],
    env: &'a Environment,
    depth: usize,
) -> EvalFuture<'a> {
    Box::pin(async move {
        let evaluated = eval_args(args, env, depth).await?;
        match evaluated.as_slice() {
            [Value::Number(start), Value::Number(end)] => Ok(Value::Range {
                start: *start,
                end: *end,
                step: None,
            }),
            [Value::Number(start), Value::Number(end), Value::Number(step)] => Ok(Value::Range {
                start: *start,
                end: *end,
                step: Some(*step),
            }),
            [_, _] | [_, _, _] => Err(Error::EvalError(
                "range requires numeric arguments".to_owned(),
            )),
            _ => Err(Error::arity_error("2 or 3", args.len())),
        }
    })
}

/// `(let ((name value)…) body…)`: bindings are visible to later bindings
pub(crate) fn eval_let<'a>(args: &'a [Value], env: &'a Environment, depth: usize) -> EvalFuture<'a> {
    Box::pin(async move {
        let Some((Value::List(bindings), body)) = args.split_first() else {
            return Err(Error::EvalError(
                "let requires a list of bindings".to_owned(),
            ));
        };

        let scope = env.child();
        for binding in bindings {
            match binding.as_list() {
                Some([Value::Symbol(name), expr]) => {
                    let value = eval_with_depth_tracking(expr, &scope, depth).await?;
                    scope.define(name.clone(), value, DefineOptions::default())?;
                }
                _ => {
                    return Err(Error::EvalError(format!(
                        "let binding must be (name value), found {binding}"
                    )));
                }
            }
        }

        eval_sequence(body, &scope, depth).await
    })
}

pub(crate) fn eval_begin<'a>(
    args: &'a [Value],
    env: &'a Environment,
    depth: usize,
) -> EvalFuture<'a> {
    Box::pin(eval_sequence(args, env, depth))
}

/// `(apply f arg… list)`: the trailing list supplies the remaining arguments
pub(crate) fn eval_apply<'a>(
    args: &'a [Value],
    env: &'a Environment,
    depth: usize,
) -> EvalFuture<'a> {
    Box::pin(async move {
        let [callee, middle @ .., last] = args else {
            return Err(Error::EvalError(
                "apply requires a function and a list of arguments".to_owned(),
            ));
        };

        let mut call_args = eval_args(middle, env, depth).await?;
        match eval_with_depth_tracking(last, env, depth).await? {
            Value::List(items) => call_args.extend(items),
            Value::Nil => {}
            other => {
                return Err(Error::EvalError(format!(
                    "last argument to apply must be a list, found {}",
                    other.type_name()
                )));
            }
        }

        if let Value::Symbol(name) = callee {
            if find_builtin_op(name).is_some_and(|op| op.is_special_form()) {
                return Err(Error::EvalError(format!(
                    "apply cannot be used with special form {name}"
                )));
            }
            return dispatch_evaluated(name, call_args, env, depth).await;
        }

        let func = eval_with_depth_tracking(callee, env, depth).await?;
        if !func.is_callable() {
            return Err(Error::EvalError(format!(
                "first argument to apply must be a function, not {}",
                func.type_name()
            )));
        }
        apply_callable(&func, call_args, env, depth).await
    })
}

/// Create a root environment seeded with the builtin registry
pub fn create_global_env() -> Environment {
    let env = Environment::new();

    for builtin_op in get_builtin_ops() {
        if let OpKind::Function(func) = &builtin_op.op_kind {
            env.register(builtin_op.id, func.clone(), builtin_op.options);
        }
    }

    let constant = DefineOptions::default();
    env.bind("true", Value::Bool(true), constant);
    env.bind("false", Value::Bool(false), constant);
    env.bind("nil", Value::Nil, constant);

    env
}
