//! Reader: surface syntax to expression trees.
//!
//! ```text
//! 42  -1.5  2e3            numbers
//! "text\n"                 strings (escapes: \n \t \r \\ \")
//! name  null?  ...  @rest  symbols; nil, true and false are literals
//! (a b c)  '(a b)  'x      lists and quotes
//! 0..10  10..0//2          ranges with an optional step
//! /(?<word>\w+)/g          regular expressions with flags
//! {lang: filth} [1, 2]     relaxed JSON (bare keys and words allowed)
//! //items/0                JSON pointers
//! ; to end of line         comments (see ParseConfig)
//! ```
//!
//! Several top-level expressions are read as one list, which the evaluator
//! runs as an implicit sequence.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, multispace0, one_of},
    combinator::{map, opt, recognize},
    error::ErrorKind,
    sequence::{pair, preceded, terminated},
};

use crate::ast::{NumberType, RegexValue, Value, number_to_json};
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Characters allowed in symbols besides alphanumerics
const SYMBOL_SPECIAL_CHARS: &str = "!$%&*+-./:<=>?@^_~|#";

/// Reader options
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParseConfig {
    /// Accept `;` line comments wherever whitespace is allowed
    pub handle_comments: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: true,
        }
    }
}

type Json = serde_json::Value;

fn error<T>(input: &str, kind: ErrorKind) -> IResult<&str, T> {
    Err(nom::Err::Error(nom::error::Error::new(input, kind)))
}

fn failure<T>(input: &str, kind: ErrorKind) -> IResult<&str, T> {
    Err(nom::Err::Failure(nom::error::Error::new(input, kind)))
}

/// Once a construct is recognized by its opening token, errors inside it
/// must not let `alt` backtrack into other alternatives.
fn cut_err<E>(err: nom::Err<E>) -> nom::Err<E> {
    match err {
        nom::Err::Error(e) => nom::Err::Failure(e),
        other => other,
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || "()'\";".contains(c)
}

/// Succeeds without consuming input when a token ends here
fn token_end(input: &str) -> IResult<&str, ()> {
    match input.chars().next() {
        Some(c) if !is_delimiter(c) => error(input, ErrorKind::Char),
        _ => Ok((input, ())),
    }
}

fn skip_ws(input: &str, config: ParseConfig) -> &str {
    let mut input = input.trim_start();
    loop {
        match input.strip_prefix(';') {
            Some(comment) if config.handle_comments => {
                let line_end = comment.find('\n').unwrap_or(comment.len());
                input = comment[line_end..].trim_start();
            }
            _ => return input,
        }
    }
}

/// Convert nom parsing errors to structured parse errors
fn to_parse_error(input: &str, err: nom::Err<nom::error::Error<&str>>) -> ParseError {
    match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let offset = input.len().saturating_sub(e.input.len());
            let (kind, message) = match e.code {
                ErrorKind::TooLarge => (
                    ParseErrorKind::TooDeeplyNested,
                    format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                ),
                ErrorKind::Verify => (ParseErrorKind::InvalidRegex, regex_error_message(e.input)),
                _ if offset >= input.len() => (
                    ParseErrorKind::Incomplete,
                    "Unexpected end of input".to_owned(),
                ),
                _ => {
                    let near: String = e.input.chars().take(10).collect();
                    (
                        ParseErrorKind::InvalidSyntax,
                        format!("Invalid syntax near '{near}'"),
                    )
                }
            };
            ParseError::with_context(kind, message, input, offset)
        }
        nom::Err::Incomplete(_) => {
            ParseError::from_message(ParseErrorKind::Incomplete, "Incomplete input")
        }
    }
}

/// Recompile the regex literal starting at `literal` to recover the engine's message
fn regex_error_message(literal: &str) -> String {
    let compiled = literal
        .strip_prefix('/')
        .and_then(split_regex_source)
        .map(|(source, rest)| {
            let flags: String = rest.chars().take_while(char::is_ascii_alphabetic).collect();
            RegexValue::new(source, &flags)
        });
    match compiled {
        Some(Err(err)) => format!("Invalid regular expression: {err}"),
        _ => "Invalid regular expression".to_owned(),
    }
}

fn number_text(input: &str) -> IResult<&str, &str> {
    recognize((
        opt(one_of("+-")),
        digit1,
        opt(pair(char('.'), digit1)),
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)
}

fn raw_number(input: &str) -> IResult<&str, NumberType> {
    let (rest, text) = number_text(input)?;
    match text.parse::<NumberType>() {
        Ok(n) => Ok((rest, n)),
        Err(_) => error(input, ErrorKind::Float),
    }
}

fn parse_number(input: &str) -> IResult<&str, Value> {
    map(terminated(raw_number, token_end), Value::Number).parse(input)
}

/// `start..end` with an optional `//step`
fn parse_range(input: &str) -> IResult<&str, Value> {
    let (input, (start, _, end, step)) = (
        raw_number,
        tag(".."),
        raw_number,
        opt(preceded(tag("//"), raw_number)),
    )
        .parse(input)?;
    let (input, ()) = token_end(input)?;
    Ok((input, Value::Range { start, end, step }))
}

/// Body of a string literal, without the quotes
fn string_text(input: &str) -> IResult<&str, String> {
    let (mut remaining, _) = char('"').parse(input)?;
    let mut text = String::new();

    loop {
        let mut chars = remaining.chars();
        match chars.next() {
            Some('"') => return Ok((chars.as_str(), text)),
            Some('\\') => {
                match chars.next() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some(_) => return failure(remaining, ErrorKind::Escaped),
                    None => return failure(chars.as_str(), ErrorKind::Escaped),
                }
                remaining = chars.as_str();
            }
            Some(ch) => {
                text.push(ch);
                remaining = chars.as_str();
            }
            // unterminated string
            None => return failure(remaining, ErrorKind::Char),
        }
    }
}

fn parse_string(input: &str) -> IResult<&str, Value> {
    map(string_text, Value::String).parse(input)
}

fn parse_symbol(input: &str) -> IResult<&str, Value> {
    let (rest, name) =
        take_while1(|c: char| c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c))
            .parse(input)?;
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        return error(input, ErrorKind::Alpha);
    }
    let (rest, ()) = token_end(rest)?;

    let value = match name {
        "nil" => Value::Nil,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::Symbol(name.to_owned()),
    };
    Ok((rest, value))
}

/// `//path`, stored with a single leading slash
fn parse_pointer(input: &str) -> IResult<&str, Value> {
    map(
        preceded(tag("//"), take_while1(|c: char| !is_delimiter(c))),
        |path: &str| Value::Pointer(format!("/{path}")),
    )
    .parse(input)
}

/// Split a regex body at its first unescaped `/`: pattern, then the text after the slash
fn split_regex_source(body: &str) -> Option<(&str, &str)> {
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '/' => return Some((&body[..i], &body[i + 1..])),
            _ => {}
        }
    }
    None
}

/// `/pattern/flags`. A `/` followed by whitespace or `)` is the division symbol.
fn parse_regex(input: &str) -> IResult<&str, Value> {
    let (body, _) = char('/').parse(input)?;
    match body.chars().next() {
        Some(c) if !c.is_whitespace() && c != '/' && c != ')' => {}
        _ => return error(input, ErrorKind::Char),
    }

    let Some((source, rest)) = split_regex_source(body) else {
        return failure(&input[input.len()..], ErrorKind::Char);
    };
    let (rest, flags) = take_while(|c: char| c.is_ascii_alphabetic()).parse(rest)?;
    let (rest, ()) = token_end(rest).map_err(cut_err)?;

    match RegexValue::new(source, flags) {
        Ok(re) => Ok((rest, Value::Regex(re))),
        Err(_) => failure(input, ErrorKind::Verify),
    }
}

/// Bare JSON word: a key, `true`/`false`/`null`, or an unquoted string
fn json_word(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace() && !",:{}[]\"()".contains(c)).parse(input)
}

fn json_token_end(input: &str) -> IResult<&str, ()> {
    match input.chars().next() {
        Some(c) if !c.is_whitespace() && !",:}]".contains(c) => error(input, ErrorKind::Char),
        _ => Ok((input, ())),
    }
}

fn json_value(input: &str, depth: usize) -> IResult<&str, Json> {
    preceded(
        multispace0,
        alt((
            |i| json_container(i, depth + 1),
            map(string_text, Json::String),
            map(terminated(raw_number, json_token_end), number_to_json),
            map(json_word, |word: &str| match word {
                "true" => Json::Bool(true),
                "false" => Json::Bool(false),
                "null" => Json::Null,
                other => Json::String(other.to_owned()),
            }),
        )),
    )
    .parse(input)
}

fn json_key(input: &str) -> IResult<&str, String> {
    preceded(
        multispace0,
        alt((string_text, map(json_word, str::to_owned))),
    )
    .parse(input)
}

/// Skip whitespace and an optional separating comma
fn json_separator(input: &str) -> &str {
    let input = input.trim_start();
    input.strip_prefix(',').unwrap_or(input)
}

fn json_container(input: &str, depth: usize) -> IResult<&str, Json> {
    match input.chars().next() {
        Some('{' | '[') if depth >= MAX_PARSE_DEPTH => failure(input, ErrorKind::TooLarge),
        Some('{') => json_object(input, depth),
        Some('[') => json_array(input, depth),
        _ => error(input, ErrorKind::Char),
    }
}

fn json_object(input: &str, depth: usize) -> IResult<&str, Json> {
    let (mut rest, _) = char('{').parse(input)?;
    let mut object = serde_json::Map::new();
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix('}') {
            return Ok((after, Json::Object(object)));
        }
        let (after, key) = json_key(rest).map_err(cut_err)?;
        let (after, _) = preceded(multispace0, char(':'))
            .parse(after)
            .map_err(cut_err)?;
        let (after, value) = json_value(after, depth).map_err(cut_err)?;
        object.insert(key, value);
        rest = json_separator(after);
    }
}

fn json_array(input: &str, depth: usize) -> IResult<&str, Json> {
    let (mut rest, _) = char('[').parse(input)?;
    let mut items = Vec::new();
    loop {
        rest = rest.trim_start();
        if let Some(after) = rest.strip_prefix(']') {
            return Ok((after, Json::Array(items)));
        }
        let (after, item) = json_value(rest, depth).map_err(cut_err)?;
        items.push(item);
        rest = json_separator(after);
    }
}

fn parse_json(input: &str, depth: usize) -> IResult<&str, Value> {
    let (input, json) = json_container(input, depth)?;
    Ok((input, Value::Json(json)))
}

fn parse_quote(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Value> {
    let (input, _) = char('\'').parse(input)?;
    let (input, quoted) = parse_expr(input, config, depth + 1).map_err(cut_err)?;
    Ok((input, Value::Quoted(Box::new(quoted))))
}

fn parse_list(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Value> {
    let (mut rest, _) = char('(').parse(input)?;
    let mut elements = Vec::new();
    loop {
        rest = skip_ws(rest, config);
        if let Some(after) = rest.strip_prefix(')') {
            return Ok((after, Value::List(elements)));
        }
        let (after, element) = parse_expr(rest, config, depth + 1).map_err(cut_err)?;
        elements.push(element);
        rest = after;
    }
}

fn parse_expr(input: &str, config: ParseConfig, depth: usize) -> IResult<&str, Value> {
    if depth >= MAX_PARSE_DEPTH {
        return failure(input, ErrorKind::TooLarge);
    }
    let input = skip_ws(input, config);
    alt((
        |i| parse_quote(i, config, depth),
        |i| parse_list(i, config, depth),
        |i| parse_json(i, depth),
        parse_string,
        parse_pointer,
        parse_regex,
        parse_range,
        parse_number,
        parse_symbol,
    ))
    .parse(input)
}

/// Parse source text with the default configuration.
pub fn parse(input: &str) -> Result<Value, Error> {
    parse_with_config(input, ParseConfig::default())
}

/// Parse source text: one expression is returned as is, several are wrapped in a list.
pub fn parse_with_config(input: &str, config: ParseConfig) -> Result<Value, Error> {
    let mut expressions = Vec::new();
    let mut rest = skip_ws(input, config);

    while !rest.is_empty() {
        let offset = input.len() - rest.len();
        if rest.starts_with(')') {
            return Err(Error::ParseError(ParseError::with_context(
                ParseErrorKind::TrailingContent,
                format!("Unexpected remaining input: '{rest}'"),
                input,
                offset,
            )));
        }
        let (after, expr) = parse_expr(rest, config, 0)
            .map_err(|err| Error::ParseError(to_parse_error(input, err)))?;
        expressions.push(expr);
        rest = skip_ws(after, config);
    }

    match expressions.len() {
        0 => Err(Error::ParseError(ParseError::from_message(
            ParseErrorKind::Incomplete,
            "Empty input",
        ))),
        1 => Ok(expressions.swap_remove(0)),
        _ => Ok(Value::List(expressions)),
    }
}
