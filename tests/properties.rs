//! End-to-end behaviour of the language through the public API.

#![cfg(feature = "reader")]
#![expect(clippy::unwrap_used)] // test code OK

use filth::Error;
use filth::ast::{Value, sym, val};
use filth::evaluator::{Environment, create_global_env, eval};
use filth::reader::parse;
use std::time::{Duration, Instant};

async fn run(env: &Environment, source: &str) -> Result<Value, Error> {
    eval(&parse(source)?, env).await
}

/// Evaluate each program in order in one environment, returning the last result
async fn run_all(env: &Environment, sources: &[&str]) -> Value {
    let mut last = Value::Nil;
    for source in sources {
        last = run(env, source)
            .await
            .unwrap_or_else(|e| panic!("'{source}' failed: {e}"));
    }
    last
}

#[tokio::test]
async fn unbound_symbols_are_undefined() {
    let env = create_global_env();
    for name in ["x", "no-such-thing", "a.b", "..."] {
        let err = eval(&sym(name), &env).await.unwrap_err();
        assert_eq!(err, Error::UndefinedSymbol(name.to_owned()));
    }

    // a child scope sees the same misses
    let child = env.child();
    assert!(matches!(
        eval(&sym("x"), &child).await,
        Err(Error::UndefinedSymbol(name)) if name == "x"
    ));
}

#[tokio::test]
async fn arithmetic_folds() {
    let env = create_global_env();
    let cases = [
        ("(+ 1 2 3)", 6),
        ("(* 2 3 4)", 24),
        ("(- 10 3 2)", 5),
        ("(/ 24 2 3)", 4),
    ];
    for (source, expected) in cases {
        assert_eq!(run(&env, source).await.unwrap(), val(expected), "{source}");
    }
}

#[tokio::test]
async fn let_is_lexically_scoped() {
    let env = create_global_env();
    assert_eq!(run(&env, "(let ((x 5) (y 3)) (+ x y))").await.unwrap(), val(8));

    run(&env, "(define x 100)").await.unwrap();
    assert_eq!(run(&env, "(let ((x 5)) (+ x x))").await.unwrap(), val(10));
    assert_eq!(run(&env, "x").await.unwrap(), val(100));
}

#[tokio::test]
async fn overloads_resolve_by_shape() {
    let env = create_global_env();
    run_all(&env, &["(def (age 12) \"child\")", "(def (age 25) \"adult\")"]).await;
    assert_eq!(run(&env, "(age 12)").await.unwrap(), val("child"));
    assert_eq!(run(&env, "(age 25)").await.unwrap(), val("adult"));
}

#[tokio::test]
async fn regex_overloads_bind_named_groups() {
    let env = create_global_env();
    let result = run_all(
        &env,
        &[
            "(def (open /door/) \"opened\")",
            "(def (open /(?<val>window)/) (+ \"the \" val \" cannot be opened\"))",
            "(open \"window\")",
        ],
    )
    .await;
    assert_eq!(result, val("the window cannot be opened"));
    assert_eq!(run(&env, "(open \"door\")").await.unwrap(), val("opened"));
}

#[tokio::test]
async fn rest_parameters_accumulate() {
    let env = create_global_env();
    let result = run_all(
        &env,
        &[
            "(def (sum first ... rest) (if (null? rest) first (+ first (sum rest))))",
            "(sum 1 2 3 4 5)",
        ],
    )
    .await;
    assert_eq!(result, val(15));
}

#[tokio::test]
async fn range_maps_a_function() {
    let env = create_global_env();
    assert_eq!(
        run(&env, "(0..5 (fn (x) (* x 2)))").await.unwrap(),
        val([0, 2, 4, 6, 8, 10])
    );
}

#[tokio::test]
async fn evaluated_values_are_fixed_points() {
    let env = create_global_env();
    let basic = ["42", "\"text\"", "true", "nil", "0..3", "/a+/g", "{a: [1, 2]}", "//a/0"];
    for source in basic {
        let once = run(&env, source).await.unwrap();
        let twice = eval(&once, &env).await.unwrap();
        assert_eq!(once, twice, "{source}");
    }

    let quoted = ["'(1 2 3)", "'sym", "'\"s\"", "'(1 (+ 1 1))"];
    for source in quoted {
        let expr = parse(source).unwrap();
        let first = eval(&expr, &env).await.unwrap();
        let second = eval(&expr, &env).await.unwrap();
        assert_eq!(first, second, "{source}");
    }

    // no side effect: nothing new is bound
    assert_eq!(
        env.get_all_bindings().len(),
        create_global_env().get_all_bindings().len()
    );
}

#[tokio::test]
async fn suspensions_run_in_order() {
    let env = create_global_env();
    let start = Instant::now();
    let result = run(&env, "(begin (wait 25) (wait 25) (wait 25) (wait 25))")
        .await
        .unwrap();
    assert_eq!(result, Value::Nil);
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn unrepresentable_waits_fail_cleanly() {
    let env = create_global_env();
    let err = run(&env, "(wait 1e300)").await.unwrap_err();
    assert!(matches!(err, Error::EvalError(_)), "{err}");
}

#[tokio::test]
async fn sibling_arguments_settle_left_to_right() {
    let env = create_global_env();
    env.register_async_builtin("stamp", |args: Vec<Value>| async move {
        let delay = match args.first() {
            Some(Value::Number(ms)) => *ms,
            _ => 0.0,
        };
        tokio::time::sleep(Duration::from_secs_f64(delay / 1000.0)).await;
        Ok::<_, Error>(val(delay))
    });

    // the slower first argument still settles before the second starts
    let start = Instant::now();
    let result = run(&env, "(list (stamp 30) (stamp 1) (stamp 20))").await.unwrap();
    assert_eq!(result, val([30, 1, 20]));
    assert!(start.elapsed() >= Duration::from_millis(51));
}

#[tokio::test]
async fn builtins_are_ordinary_bindings() {
    let env = create_global_env();
    run_all(&env, &["(def (+ a b) (* a b))"]).await;
    // the newest binding wins for the arguments it matches
    assert_eq!(run(&env, "(+ 3 4)").await.unwrap(), val(12));
    // other scopes are unaffected
    assert_eq!(run(&create_global_env(), "(+ 3 4)").await.unwrap(), val(7));
}
