//! Filth - embeddable expression language with pattern-based multiple dispatch
//!
//! This crate provides a small, dynamically-typed Lisp-flavoured language whose
//! distinguishing feature is that a single name may carry several function
//! bindings, each with its own parameter *shape*. Calls are resolved by matching
//! the evaluated arguments against those shapes:
//!
//! ```text
//! (def (age 12) "child")
//! (def (age 25) "adult")
//! (age 25)                                  ; => "adult"
//!
//! (def (open /door/) "opened")
//! (def (open /(?<val>window)/) (+ "the " val " cannot be opened"))
//! (open "window")                           ; => "the window cannot be opened"
//!
//! (def (sum first ... rest) (if (null? rest) first (+ first (sum rest))))
//! (sum 1 2 3 4 5)                           ; => 15
//! ```
//!
//! Besides the usual numbers, strings and lists the language has first-class
//! ranges (`0..5`, `10..0//2`), regular expressions (`/(?<word>\w+)/g`), inline
//! JSON (`{ name: "x" }`) and JSON pointers (`//name`). Each of those can also sit
//! in operator position: `(0..5 (fn (x) (* x 2)))` maps a function over the range.
//!
//! ## Evaluation
//!
//! Evaluation is asynchronous. Builtins such as `wait` suspend the evaluator,
//! and sibling expressions are always evaluated strictly left to right:
//!
//! ```rust,ignore
//! let env = filth::evaluator::create_global_env();
//! let expr = filth::reader::parse("(begin (wait 10) (+ 1 2))")?;
//! let value = filth::evaluator::eval(&expr, &env).await?;
//! ```
//!
//! ## Modules
//!
//! - `ast`: the expression/value model and construction helpers
//! - `pattern`: the structural matcher used for dispatch and `~`
//! - `evaluator`: environments, special forms and generic application
//! - `builtinops`: the builtin registry seeded into every root environment
//! - `pointer`: JSON pointer navigation and JSON merging
//! - `reader`: text to expression tree (feature `reader`, on by default)

use std::fmt;

/// Maximum nesting depth accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 64;

/// Maximum evaluation depth to prevent runaway recursion.
/// Counts nested closure applications and alias hops; syntactic nesting is
/// already bounded by the reader.
pub const MAX_EVAL_DEPTH: usize = 256;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete (EOF, unterminated string, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete, valid expression
    TrailingContent,
    /// A regular expression literal that the regex engine rejects
    InvalidRegex,
}

/// Reader failure with enough surrounding input to point at the problem.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Excerpt of the input around the failure, newlines escaped
    pub context: Option<String>,
    /// First character at the failure offset, when there is one
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Build an error whose context is an excerpt of `input` starting a little
    /// before the byte offset `at`. Elided text on either side shows as `[...]`.
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        at: usize,
    ) -> Self {
        const LEAD: usize = 20;
        const WIDTH: usize = 100;

        let at = floor_char_boundary(input, at.min(input.len()));
        let found = input[at..].chars().next().map(String::from);

        let from = floor_char_boundary(input, at.saturating_sub(LEAD));
        let to = floor_char_boundary(input, (from + WIDTH).min(input.len()));

        let mut excerpt = String::new();
        if from > 0 {
            excerpt.push_str("[...]");
        }
        excerpt.push_str(&input[from..to].replace('\r', "").replace('\n', "\\n"));
        if to < input.len() {
            excerpt.push_str("[...]");
        }

        Self::new(kind, message, Some(excerpt), found)
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// Reader failure; never raised by the evaluator itself
    ParseError(ParseError),
    /// Malformed special form, type mismatch, arity mismatch, apply on a non-function
    EvalError(String),
    /// Lookup miss at the root of the environment chain
    UndefinedSymbol(String),
    /// Malformed `fn`/`lambda` shape
    LambdaError(String),
}

impl Error {
    pub fn arity_error(expected: impl fmt::Display, got: usize) -> Self {
        Error::EvalError(format!("expected {expected} arguments, got {got}"))
    }

    pub(crate) fn type_error(expected: &str, found: &impl fmt::Display) -> Self {
        Error::EvalError(format!("expected {expected}, found {found}"))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::ParseError(e) => {
                write!(f, "ParseError: {}", e.message)?;
                if let Some(found) = &e.found {
                    write!(f, "\nFound: {found}")?;
                }
                if let Some(context) = &e.context {
                    write!(f, "\nContext: {context}")?;
                }
                Ok(())
            }
            Error::EvalError(msg) => write!(f, "EvaluationError: {msg}"),
            Error::UndefinedSymbol(name) => write!(f, "Undefined symbol: {name}"),
            Error::LambdaError(msg) => write!(f, "LambdaError: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod pattern;
pub mod pointer;

#[cfg(feature = "reader")]
pub mod reader;
