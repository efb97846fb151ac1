use filth::Error;
use filth::ast::Value;
use filth::evaluator::{self, Environment};
use filth::reader::{ParseConfig, parse_with_config};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::panic;
use std::process;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() {
    init_tracing();

    if let Err(payload) = panic::catch_unwind(run_repl) {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|msg| (*msg).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_owned());
        eprintln!("The REPL crashed and must exit: {reason}");
        process::exit(1);
    }
}

/// Logging goes to stderr, and only when RUST_LOG is set
/// (`RUST_LOG=filth::log=info` shows the output of `log`).
fn init_tracing() {
    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn run_repl() {
    println!("Filth expression evaluator");
    println!("Enter expressions like: (+ 1 2)");
    println!("Define overloads like: (def (age 12) \"child\")");
    println!("Type :help for more commands, or Ctrl+C to exit.");
    println!();

    // `wait` needs the time driver; evaluation itself stays on this thread
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Could not start the async runtime: {err}");
            return;
        }
    };

    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(err) => {
            eprintln!("Could not initialize REPL: {err}");
            return;
        }
    };

    let env = evaluator::create_global_env();

    // callable from filth code as (help)
    env.register_builtin_operation::<_, ()>("help", print_help);

    let config = ParseConfig {
        handle_comments: true,
    };

    loop {
        match rl.readline("filth> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                match line {
                    ":help" => {
                        _ = print_help().is_ok();
                        continue;
                    }
                    ":env" => {
                        print_environment(&env);
                        continue;
                    }
                    ":quit" | ":exit" => {
                        println!("Goodbye!");
                        break;
                    }
                    _ => {}
                }

                let result = parse_with_config(line, config)
                    .and_then(|expr| runtime.block_on(evaluator::eval(&expr, &env)));

                match result {
                    // Definitions and effects produce nil; don't echo it
                    Ok(Value::Nil) => {}
                    Ok(value) => println!("{value}"),
                    Err(e) => println!("Error: {e}"),
                }
            }

            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                println!("Error: {err:?}");
                break;
            }
        }
    }
}

fn print_help() -> Result<Value, Error> {
    println!("Filth Interpreter:");
    println!("  :help      - Show this help message");
    println!("  :env       - Show current environment bindings");
    println!("  :quit      - Exit the interpreter");
    println!("  :exit      - Exit the interpreter");
    println!("  Ctrl+C     - Exit the interpreter");
    println!();
    println!("Literals:");
    println!("  Numbers: 42, -5, 2.5       Strings: \"text\"");
    println!("  Ranges: 0..10, 10..0//2    Regexes: /(?<word>\\w+)/g");
    println!("  JSON: {{lang: filth}}       Pointers: //lang");
    println!("  Quote: '(1 2 3)            Comments: ; to end of line");
    println!();
    println!("Forms:");
    println!("  def define fn lambda let begin if apply");
    println!("  cons car cdr list null? = ~ ..");
    println!();
    println!("Builtins:");
    println!("  + - * /  list? equal? nil? len  wait log  to_i to_s to_f to_b  select");
    println!();
    println!("Examples:");
    println!("  (def (age 12) \"child\") (def (age 25) \"adult\") (age 25)");
    println!("  (def (sum first ... rest) (if (null? rest) first (+ first (sum rest))))");
    println!("  (0..5 (fn (x) (* x 2)))");
    println!("  ({{lang: filth}} \"lang\")");
    println!("  (begin (wait 100) \"done\")");
    println!();
    println!("Run with RUST_LOG=filth::log=info to see the output of (log ...).");
    println!();

    Ok(Value::Nil)
}

fn print_environment(env: &Environment) {
    let (builtins, user_defined): (Vec<_>, Vec<_>) = env
        .get_all_bindings()
        .into_iter()
        .partition(|(_, value)| matches!(value, Value::BuiltinFunction { .. }));

    if builtins.is_empty() && user_defined.is_empty() {
        println!("No bindings.");
        return;
    }

    if !builtins.is_empty() {
        println!("Builtins ({}):", builtins.len());
        for row in builtins.chunks(4) {
            let names: Vec<String> = row.iter().map(|(name, _)| format!("{name:<15}")).collect();
            println!("  {}", names.join(" ").trim_end());
        }
        println!();
    }

    if !user_defined.is_empty() {
        println!("Defined ({}):", user_defined.len());
        for (name, value) in user_defined {
            println!("  {name} = {value}");
        }
    }
}
