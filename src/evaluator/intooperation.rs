//! Adapters from typed Rust functions to the evaluator's builtin signature.
//!
//! Every builtin is stored as an [`OperationFn`]: it receives the calling
//! environment and the owned argument vector and returns a [`BuiltinFuture`].
//! Host code rarely wants to write that by hand, so the traits below accept
//! plain functions such as `fn(f64, f64) -> f64` or
//! `fn(NumIter<'_>) -> Result<f64, Error>`. Arguments are converted before the
//! call, the return value is normalized to `Result<Value, Error>`, and the
//! result is handed back as an already settled future.
//!
//! Asynchronous builtins skip this layer and build their future directly
//! (see `Environment::register_async_builtin`).

use crate::Error;
use crate::ast::{NumberType, Value};
use crate::builtinops::Arity;
use crate::evaluator::Environment;
use std::future::Future;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// Pending result of a builtin call. Synchronous builtins return an
/// already-resolved future; asynchronous ones (such as `wait`) suspend
/// the evaluator until they settle.
pub type BuiltinFuture = Pin<Box<dyn Future<Output = Result<Value, Error>>>>;

/// Erased builtin signature shared by every host function.
///
/// The environment is only consulted by builtins that take their arguments
/// unevaluated and resolve symbols themselves.
pub(crate) type OperationFn = dyn Fn(&Environment, Vec<Value>) -> BuiltinFuture + Send + Sync;

/// Wrap an immediate result as a resolved builtin future.
pub(crate) fn resolved(result: Result<Value, Error>) -> BuiltinFuture {
    Box::pin(std::future::ready(result))
}

/// Conversion of one argument slot into a typed parameter.
///
/// `Arg<'a>` may borrow from the slot (`&str`, list views) or take the value
/// out of it (`Value`, numbers, booleans).
pub(crate) trait FromArg {
    type Arg<'a>;

    fn from_arg<'a>(slot: &'a mut Value) -> Result<Self::Arg<'a>, Error>;
}

impl FromArg for Value {
    type Arg<'a> = Value;

    fn from_arg<'a>(slot: &'a mut Value) -> Result<Self::Arg<'a>, Error> {
        Ok(std::mem::replace(slot, Value::Nil))
    }
}

// f64 and bool, through the `TryInto` impls on `Value`
impl<T> FromArg for T
where
    Value: TryInto<T, Error = Error>,
{
    type Arg<'a> = T;

    fn from_arg<'a>(slot: &'a mut Value) -> Result<Self::Arg<'a>, Error> {
        std::mem::replace(slot, Value::Nil).try_into()
    }
}

impl FromArg for &str {
    type Arg<'a> = &'a str;

    fn from_arg<'a>(slot: &'a mut Value) -> Result<Self::Arg<'a>, Error> {
        match slot {
            Value::String(text) => Ok(text.as_str()),
            other => Err(Error::type_error("string", &*other)),
        }
    }
}

/// A single list argument viewed element by element
impl<'b, K> FromArg for ArgIter<'b, K>
where
    K: ArgKind,
{
    type Arg<'a> = ArgIter<'a, K>;

    fn from_arg<'a>(slot: &'a mut Value) -> Result<Self::Arg<'a>, Error> {
        match slot {
            Value::List(items) => ArgIter::new(items.as_slice()),
            other => Err(Error::type_error("list", &*other)),
        }
    }
}

/// How a run of arguments is checked and then viewed by an [`ArgIter`].
#[doc(hidden)]
pub trait ArgKind {
    type Item<'a>;

    /// Reject the whole run before the builtin sees any of it
    fn check(args: &[Value]) -> Result<(), Error>;

    fn view(arg: &Value) -> Self::Item<'_>;
}

fn check_each(args: &[Value], expected: &str, accepts: fn(&Value) -> bool) -> Result<(), Error> {
    match args.iter().find(|arg| !accepts(arg)) {
        Some(rejected) => Err(Error::type_error(expected, rejected)),
        None => Ok(()),
    }
}

#[doc(hidden)]
pub struct AnyArg;

impl ArgKind for AnyArg {
    type Item<'a> = &'a Value;

    fn check(_args: &[Value]) -> Result<(), Error> {
        Ok(())
    }

    fn view(arg: &Value) -> Self::Item<'_> {
        arg
    }
}

#[doc(hidden)]
pub struct NumberArg;

impl ArgKind for NumberArg {
    type Item<'a> = NumberType;

    fn check(args: &[Value]) -> Result<(), Error> {
        check_each(args, "number", |arg| matches!(arg, Value::Number(_)))
    }

    fn view(arg: &Value) -> Self::Item<'_> {
        match arg {
            Value::Number(n) => *n,
            // unreachable after `check`
            _ => NumberType::NAN,
        }
    }
}

#[doc(hidden)]
pub struct StringArg;

impl ArgKind for StringArg {
    type Item<'a> = &'a str;

    fn check(args: &[Value]) -> Result<(), Error> {
        check_each(args, "string", |arg| matches!(arg, Value::String(_)))
    }

    fn view(arg: &Value) -> Self::Item<'_> {
        arg.as_text().unwrap_or_default()
    }
}

/// Borrowed, pre-checked iterator over a run of arguments.
#[doc(hidden)]
pub struct ArgIter<'a, K: ArgKind> {
    args: std::slice::Iter<'a, Value>,
    kind: PhantomData<K>,
}

impl<'a, K> ArgIter<'a, K>
where
    K: ArgKind,
{
    pub(crate) fn new(args: &'a [Value]) -> Result<Self, Error> {
        K::check(args)?;
        Ok(ArgIter {
            args: args.iter(),
            kind: PhantomData,
        })
    }
}

impl<'a, K> Iterator for ArgIter<'a, K>
where
    K: ArgKind,
{
    type Item = K::Item<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        self.args.next().map(K::view)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.args.size_hint()
    }
}

impl<K: ArgKind> ExactSizeIterator for ArgIter<'_, K> {}
impl<K: ArgKind> FusedIterator for ArgIter<'_, K> {}

/// Arguments as raw `&Value`s.
pub type ValueIter<'a> = ArgIter<'a, AnyArg>;

/// Numeric arguments; a non-number anywhere in the run fails the call.
pub type NumIter<'a> = ArgIter<'a, NumberArg>;

/// String-literal arguments.
pub type StringIter<'a> = ArgIter<'a, StringArg>;

/// Conversion of the trailing run of arguments into a rest parameter.
pub(crate) trait FromRestArgs {
    type Rest<'a>;

    fn from_rest_args(args: &[Value]) -> Result<Self::Rest<'_>, Error>;
}

impl<'b, K> FromRestArgs for ArgIter<'b, K>
where
    K: ArgKind,
{
    type Rest<'a> = ArgIter<'a, K>;

    fn from_rest_args(args: &[Value]) -> Result<Self::Rest<'_>, Error> {
        ArgIter::new(args)
    }
}

/// Normalizes builtin return types to `Result<Value, Error>`.
pub trait IntoValueResult {
    fn into_value_result(self) -> Result<Value, Error>;
}

impl<T> IntoValueResult for Result<T, Error>
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        self.map(Into::into)
    }
}

impl<T> IntoValueResult for T
where
    T: Into<Value>,
{
    fn into_value_result(self) -> Result<Value, Error> {
        Ok(self.into())
    }
}

/// A fixed-arity Rust function usable as a builtin. `Args` is the tuple of
/// parameter types and only serves to select the impl.
pub trait IntoOperation<Args> {
    fn into_operation(self) -> Arc<OperationFn>;
}

/// A Rust function whose last parameter is a rest iterator (`ValueIter`,
/// `NumIter` or `StringIter`), optionally after one or two fixed parameters.
pub trait IntoVariadicOperation<Args> {
    fn into_variadic_operation(self) -> Arc<OperationFn>;
}

impl<F, R> IntoOperation<()> for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    fn into_operation(self) -> Arc<OperationFn> {
        Arc::new(move |_env: &Environment, args: Vec<Value>| {
            if args.is_empty() {
                resolved((self)().into_value_result())
            } else {
                resolved(Err(Error::arity_error(0, args.len())))
            }
        })
    }
}

/// Destructure the argument vector into one slot per parameter, convert each
/// slot, then call.
macro_rules! fixed_arity_operation {
    ($count:literal => $( $A:ident $slot:ident ),+ ) => {
        impl<F, R, $( $A ),+> IntoOperation<( $( $A, )+ )> for F
        where
            $( $A: FromArg, )+
            F: for<'a> Fn( $( <$A as FromArg>::Arg<'a> ),+ ) -> R + Send + Sync + 'static,
            R: IntoValueResult,
        {
            fn into_operation(self) -> Arc<OperationFn> {
                Arc::new(move |_env: &Environment, mut args: Vec<Value>| {
                    let count = args.len();
                    let [ $( $slot ),+ ] = args.as_mut_slice() else {
                        return resolved(Err(Error::arity_error($count, count)));
                    };
                    let result = (|| {
                        $( let $slot = <$A as FromArg>::from_arg($slot)?; )+
                        (self)( $( $slot ),+ ).into_value_result()
                    })();
                    resolved(result)
                })
            }
        }
    };
}

fixed_arity_operation!(1 => A1 a1);
fixed_arity_operation!(2 => A1 a1, A2 a2);
fixed_arity_operation!(3 => A1 a1, A2 a2, A3 a3);
fixed_arity_operation!(4 => A1 a1, A2 a2, A3 a3, A4 a4);

impl<F, I, R> IntoVariadicOperation<(I,)> for F
where
    I: FromRestArgs,
    F: for<'a> Fn(<I as FromRestArgs>::Rest<'a>) -> R + Send + Sync + 'static,
    R: IntoValueResult,
{
    fn into_variadic_operation(self) -> Arc<OperationFn> {
        Arc::new(move |_env: &Environment, args: Vec<Value>| {
            resolved(I::from_rest_args(&args).and_then(|rest| (self)(rest).into_value_result()))
        })
    }
}

/// Like `fixed_arity_operation`, with everything after the fixed slots
/// collected into the rest parameter.
macro_rules! prefixed_variadic_operation {
    ($count:literal => $( $A:ident $slot:ident ),+ ) => {
        impl<F, I, R, $( $A ),+> IntoVariadicOperation<( $( $A, )+ I, )> for F
        where
            I: FromRestArgs,
            $( $A: FromArg, )+
            F: for<'a> Fn(
                    $( <$A as FromArg>::Arg<'a>, )+
                    <I as FromRestArgs>::Rest<'a>,
                ) -> R
                + Send
                + Sync
                + 'static,
            R: IntoValueResult,
        {
            fn into_variadic_operation(self) -> Arc<OperationFn> {
                Arc::new(move |_env: &Environment, mut args: Vec<Value>| {
                    let count = args.len();
                    let [ $( $slot, )+ rest @ .. ] = args.as_mut_slice() else {
                        return resolved(Err(Error::arity_error(
                            format!("at least {}", $count),
                            count,
                        )));
                    };
                    let result = (|| {
                        $( let $slot = <$A as FromArg>::from_arg($slot)?; )+
                        let rest = I::from_rest_args(rest)?;
                        (self)( $( $slot, )+ rest ).into_value_result()
                    })();
                    resolved(result)
                })
            }
        }
    };
}

prefixed_variadic_operation!(1 => A1 a1);
prefixed_variadic_operation!(2 => A1 a1, A2 a2);

/// Wrap an erased builtin so the total argument count is checked before the
/// call, for builtins whose Rust signature cannot express their arity.
pub(crate) fn check_arity(arity: Arity, inner: Arc<OperationFn>) -> Arc<OperationFn> {
    Arc::new(move |env: &Environment, args: Vec<Value>| match arity.validate(args.len()) {
        Ok(()) => inner(env, args),
        Err(e) => resolved(Err(e)),
    })
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{sym, val};

    async fn call(op: &Arc<OperationFn>, args: Vec<Value>) -> Result<Value, Error> {
        op(&Environment::new(), args).await
    }

    #[tokio::test]
    async fn test_fixed_arity_conversions() {
        fn describe(factor: f64, text: &str, flag: bool) -> String {
            format!("{text}:{}:{flag}", factor * 2.0)
        }
        let op = <_ as IntoOperation<(f64, &str, bool)>>::into_operation(describe);

        assert_eq!(
            call(&op, vec![val(1.5), val("x"), val(true)]).await.unwrap(),
            val("x:3:true")
        );
        let err = call(&op, vec![val("1.5"), val("x"), val(true)]).await.unwrap_err();
        assert!(err.to_string().contains("expected number"));
        let err = call(&op, vec![val(1), val(2), val(true)]).await.unwrap_err();
        assert!(err.to_string().contains("expected string"));
        let err = call(&op, vec![val(1)]).await.unwrap_err();
        assert_eq!(err, Error::arity_error(3, 1));
    }

    #[tokio::test]
    async fn test_list_argument_views() {
        fn longest(words: StringIter<'_>) -> usize {
            words.map(str::len).max().unwrap_or(0)
        }
        let op = <_ as IntoOperation<(StringIter<'static>,)>>::into_operation(longest);

        assert_eq!(call(&op, vec![val(["a", "abc", "ab"])]).await.unwrap(), val(3));
        assert!(call(&op, vec![val(["a", "b"]), val(1)]).await.is_err());
        assert!(call(&op, vec![val("abc")]).await.is_err());
        assert!(call(&op, vec![val(vec![val("a"), val(1)])]).await.is_err());
    }

    #[tokio::test]
    async fn test_variadic_prefix_and_rest() {
        fn tag_all(prefix: &str, rest: ValueIter<'_>) -> Value {
            Value::List(rest.map(|v| val(format!("{prefix}{v}"))).collect())
        }
        let op = <_ as IntoVariadicOperation<(&str, ValueIter<'static>)>>::into_variadic_operation(
            tag_all,
        );

        assert_eq!(
            call(&op, vec![val("#"), val(1), sym("x")]).await.unwrap(),
            val(["#1", "#x"])
        );
        assert_eq!(
            call(&op, vec![val("#")]).await.unwrap(),
            Value::List(Vec::new())
        );
        let err = call(&op, vec![]).await.unwrap_err();
        assert_eq!(err, Error::arity_error("at least 1", 0));
    }

    #[tokio::test]
    async fn test_check_arity_runs_first() {
        fn total(nums: NumIter<'_>) -> f64 {
            nums.sum()
        }
        let inner =
            <_ as IntoVariadicOperation<(NumIter<'static>,)>>::into_variadic_operation(total);
        let op = check_arity(Arity::Range(1, 2), inner);

        assert_eq!(call(&op, vec![val(1), val(2)]).await.unwrap(), val(3));
        let err = call(&op, vec![val(1), val(2), val(3)]).await.unwrap_err();
        assert_eq!(err, Error::arity_error("1 or 2", 3));
    }
}
