//! Condition and parameter expression language.
//!
//! A small recursive-descent parser producing a typed AST over a fixed set of
//! functions, evaluated against an immutable [`Resolver`] snapshot.
//!
//! ```text
//! expr    := call | list | literal | path
//! call    := FUNC '(' [expr (',' expr)*] ')'
//! list    := '[' [expr (',' expr)*] ']'
//! literal := STRING | NUMBER | 'true' | 'false' | 'null'
//! path    := IDENT ('.' (IDENT | INDEX))*
//! ```
//!
//! Evaluation is strict and side-effect free. Unknown identifiers and
//! malformed calls are errors, never defaults.

use std::cmp::Ordering;

use serde_json::{Number, Value};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from parsing or evaluating an expression.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("parse error at offset {position}: {message}")]
    Parse { position: usize, message: String },

    #[error("unknown function '{0}'")]
    UnknownFunction(String),

    #[error("{function}() expects {expected} argument(s), got {found}")]
    Arity {
        function: &'static str,
        expected: &'static str,
        found: usize,
    },

    #[error("unknown identifier '{0}'")]
    UnknownIdentifier(String),

    #[error("{function}(): {message}")]
    Type {
        function: &'static str,
        message: String,
    },

    #[error("condition must evaluate to a boolean, got {result}")]
    NotBoolean { result: String },
}

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// The fixed function set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Equal,
    NotEqual,
    Not,
    And,
    Or,
    Contains,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    If,
    Length,
}

impl Func {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "equal" => Self::Equal,
            "notequal" => Self::NotEqual,
            "not" => Self::Not,
            "and" => Self::And,
            "or" => Self::Or,
            "contains" => Self::Contains,
            "lessthan" => Self::LessThan,
            "lessequal" => Self::LessEqual,
            "greaterthan" => Self::GreaterThan,
            "greaterequal" => Self::GreaterEqual,
            "if" => Self::If,
            "length" => Self::Length,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::NotEqual => "notequal",
            Self::Not => "not",
            Self::And => "and",
            Self::Or => "or",
            Self::Contains => "contains",
            Self::LessThan => "lessthan",
            Self::LessEqual => "lessequal",
            Self::GreaterThan => "greaterthan",
            Self::GreaterEqual => "greaterequal",
            Self::If => "if",
            Self::Length => "length",
        }
    }

    fn check_arity(&self, found: usize) -> Result<(), ExpressionError> {
        let (ok, expected) = match self {
            Self::Not | Self::Length => (found == 1, "1"),
            Self::And | Self::Or => (found >= 1, "1 or more"),
            Self::If => (found == 3, "3"),
            _ => (found == 2, "2"),
        };
        if ok {
            Ok(())
        } else {
            Err(ExpressionError::Arity {
                function: self.name(),
                expected,
                found,
            })
        }
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    /// Dotted reference such as `var.env` or `build.output.digest`.
    Path(Vec<String>),
    Call { func: Func, args: Vec<Expr> },
}

// ---------------------------------------------------------------------------
// Scope
// ---------------------------------------------------------------------------

/// Resolves dotted references during evaluation.
pub trait Resolver {
    fn resolve(&self, path: &[String]) -> Option<Value>;
}

/// A JSON object acts as a root scope: the first segment is a key.
impl Resolver for Value {
    fn resolve(&self, path: &[String]) -> Option<Value> {
        descend(self, path).cloned()
    }
}

/// Walk into nested objects by key and arrays by numeric index.
pub fn descend<'a>(mut value: &'a Value, path: &[String]) -> Option<&'a Value> {
    for segment in path {
        value = match value {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
}

struct Lexer<'a> {
    src: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            chars: src.char_indices().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<(usize, Token)>, ExpressionError> {
        let mut tokens = Vec::new();
        while let Some(&(pos, c)) = self.chars.peek() {
            let token = match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                    continue;
                }
                '(' => self.single(Token::LParen),
                ')' => self.single(Token::RParen),
                '[' => self.single(Token::LBracket),
                ']' => self.single(Token::RBracket),
                ',' => self.single(Token::Comma),
                '.' => self.single(Token::Dot),
                '"' | '\'' => self.string(pos, c)?,
                c if c.is_ascii_digit() => self.number(pos),
                '-' if self.next_is_digit(pos) => self.number(pos),
                c if c.is_alphabetic() || c == '_' => self.ident(pos),
                other => {
                    return Err(ExpressionError::Parse {
                        position: pos,
                        message: format!("unexpected character '{other}'"),
                    });
                }
            };
            tokens.push((pos, token));
        }
        Ok(tokens)
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn next_is_digit(&self, pos: usize) -> bool {
        self.src[pos + 1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit())
    }

    fn string(&mut self, start: usize, quote: char) -> Result<Token, ExpressionError> {
        self.chars.next();
        let mut out = String::new();
        while let Some((pos, c)) = self.chars.next() {
            match c {
                c if c == quote => return Ok(Token::Str(out)),
                '\\' => match self.chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, e @ ('"' | '\'' | '\\'))) => out.push(e),
                    Some((_, other)) => {
                        return Err(ExpressionError::Parse {
                            position: pos,
                            message: format!("unknown escape '\\{other}'"),
                        });
                    }
                    None => break,
                },
                c => out.push(c),
            }
        }
        Err(ExpressionError::Parse {
            position: start,
            message: "unterminated string".to_string(),
        })
    }

    fn number(&mut self, start: usize) -> Token {
        let mut end = start;
        let mut seen_dot = false;
        if let Some(&(_, '-')) = self.chars.peek() {
            self.chars.next();
            end += 1;
        }
        while let Some(&(pos, c)) = self.chars.peek() {
            if c.is_ascii_digit() {
                self.chars.next();
                end = pos + 1;
            } else if c == '.' && !seen_dot && self.next_is_digit(pos) {
                seen_dot = true;
                self.chars.next();
                end = pos + 1;
            } else {
                break;
            }
        }
        Token::Num(self.src[start..end].to_string())
    }

    fn ident(&mut self, start: usize) -> Token {
        let mut end = start;
        while let Some(&(pos, c)) = self.chars.peek() {
            if c.is_alphanumeric() || c == '_' || c == '-' {
                self.chars.next();
                end = pos + c.len_utf8();
            } else {
                break;
            }
        }
        Token::Ident(self.src[start..end].to_string())
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse an expression. A surrounding `${ ... }` wrapper is accepted.
pub fn parse(src: &str) -> Result<Expr, ExpressionError> {
    let body = strip_interpolation(src);
    let tokens = Lexer::new(body).tokenize()?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        len: body.len(),
    };
    let expr = parser.expr()?;
    if let Some((position, token)) = parser.tokens.get(parser.pos) {
        return Err(ExpressionError::Parse {
            position: *position,
            message: format!("unexpected trailing {token:?}"),
        });
    }
    Ok(expr)
}

fn strip_interpolation(src: &str) -> &str {
    let trimmed = src.trim();
    trimmed
        .strip_prefix("${")
        .and_then(|s| s.strip_suffix('}'))
        .map(str::trim)
        .unwrap_or(trimmed)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|(p, _)| *p).unwrap_or(self.len)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> ExpressionError {
        ExpressionError::Parse {
            position: self.position(),
            message: message.into(),
        }
    }

    fn expect(&mut self, want: Token) -> Result<(), ExpressionError> {
        match self.peek() {
            Some(t) if *t == want => {
                self.pos += 1;
                Ok(())
            }
            Some(t) => Err(self.error(format!("expected {want:?}, found {t:?}"))),
            None => Err(self.error(format!("expected {want:?}, found end of input"))),
        }
    }

    fn expr(&mut self) -> Result<Expr, ExpressionError> {
        let position = self.position();
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Num(n)) => parse_number(&n)
                .map(Expr::Literal)
                .ok_or(ExpressionError::Parse {
                    position,
                    message: format!("invalid number '{n}'"),
                }),
            Some(Token::LBracket) => {
                let items = self.sequence(Token::RBracket)?;
                Ok(Expr::List(items))
            }
            Some(Token::Ident(name)) => self.after_ident(name),
            Some(other) => Err(ExpressionError::Parse {
                position,
                message: format!("unexpected {other:?}"),
            }),
            None => Err(self.error("unexpected end of input")),
        }
    }

    fn after_ident(&mut self, name: String) -> Result<Expr, ExpressionError> {
        match self.peek() {
            Some(Token::LParen) => {
                self.pos += 1;
                let func =
                    Func::from_name(&name).ok_or(ExpressionError::UnknownFunction(name))?;
                let args = self.sequence(Token::RParen)?;
                func.check_arity(args.len())?;
                Ok(Expr::Call { func, args })
            }
            Some(Token::Dot) => {
                let mut segments = vec![name];
                while let Some(Token::Dot) = self.peek() {
                    self.pos += 1;
                    match self.next() {
                        Some(Token::Ident(seg)) => segments.push(seg),
                        // `items.0.1` lexes the indices as one decimal
                        Some(Token::Num(n)) if !n.starts_with('-') => {
                            segments.extend(n.split('.').map(str::to_string));
                        }
                        _ => return Err(self.error("expected a name after '.'")),
                    }
                }
                Ok(Expr::Path(segments))
            }
            _ => Ok(match name.as_str() {
                "true" => Expr::Literal(Value::Bool(true)),
                "false" => Expr::Literal(Value::Bool(false)),
                "null" => Expr::Literal(Value::Null),
                _ => Expr::Path(vec![name]),
            }),
        }
    }

    fn sequence(&mut self, close: Token) -> Result<Vec<Expr>, ExpressionError> {
        let mut items = Vec::new();
        if self.peek() == Some(&close) {
            self.pos += 1;
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            match self.peek() {
                Some(Token::Comma) => self.pos += 1,
                _ => {
                    self.expect(close)?;
                    return Ok(items);
                }
            }
        }
    }
}

fn parse_number(text: &str) -> Option<Value> {
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

impl Expr {
    /// Evaluate against a scope snapshot.
    pub fn evaluate(&self, scope: &dyn Resolver) -> Result<Value, ExpressionError> {
        match self {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::List(items) => items
                .iter()
                .map(|e| e.evaluate(scope))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Path(segments) => scope
                .resolve(segments)
                .ok_or_else(|| ExpressionError::UnknownIdentifier(segments.join("."))),
            Expr::Call { func, args } => {
                let values = args
                    .iter()
                    .map(|e| e.evaluate(scope))
                    .collect::<Result<Vec<_>, _>>()?;
                apply(*func, values)
            }
        }
    }
}

/// Parse and evaluate `src` to a value.
pub fn evaluate(src: &str, scope: &dyn Resolver) -> Result<Value, ExpressionError> {
    parse(src)?.evaluate(scope)
}

/// Parse and evaluate a condition, which must produce a boolean.
pub fn evaluate_condition(src: &str, scope: &dyn Resolver) -> Result<bool, ExpressionError> {
    match evaluate(src, scope)? {
        Value::Bool(b) => Ok(b),
        other => Err(ExpressionError::NotBoolean {
            result: other.to_string(),
        }),
    }
}

/// Whether `src` is a bare call to one of the known functions, e.g.
/// `if(equal(var.env, "prod"), 3, 1)`.
pub fn is_function_call(src: &str) -> bool {
    let trimmed = src.trim();
    let Some(open) = trimmed.find('(') else {
        return false;
    };
    trimmed.ends_with(')') && Func::from_name(&trimmed[..open]).is_some()
}

fn apply(func: Func, mut args: Vec<Value>) -> Result<Value, ExpressionError> {
    let name = func.name();
    match func {
        Func::Equal => Ok(Value::Bool(loose_eq(&args[0], &args[1]))),
        Func::NotEqual => Ok(Value::Bool(!loose_eq(&args[0], &args[1]))),
        Func::Not => Ok(Value::Bool(!as_bool(name, &args[0])?)),
        Func::And => {
            let mut result = true;
            for arg in &args {
                result &= as_bool(name, arg)?;
            }
            Ok(Value::Bool(result))
        }
        Func::Or => {
            let mut result = false;
            for arg in &args {
                result |= as_bool(name, arg)?;
            }
            Ok(Value::Bool(result))
        }
        Func::Contains => contains(&args[0], &args[1]).map(Value::Bool),
        Func::LessThan => compare(name, &args[0], &args[1]).map(|o| Value::Bool(o == Ordering::Less)),
        Func::LessEqual => {
            compare(name, &args[0], &args[1]).map(|o| Value::Bool(o != Ordering::Greater))
        }
        Func::GreaterThan => {
            compare(name, &args[0], &args[1]).map(|o| Value::Bool(o == Ordering::Greater))
        }
        Func::GreaterEqual => {
            compare(name, &args[0], &args[1]).map(|o| Value::Bool(o != Ordering::Less))
        }
        Func::If => {
            let otherwise = args.pop().unwrap_or(Value::Null);
            let then = args.pop().unwrap_or(Value::Null);
            if as_bool(name, &args[0])? {
                Ok(then)
            } else {
                Ok(otherwise)
            }
        }
        Func::Length => match &args[0] {
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            Value::String(s) => Ok(Value::from(s.chars().count())),
            other => Err(type_error(name, format!("cannot take the length of {other}"))),
        },
    }
}

fn type_error(function: &'static str, message: String) -> ExpressionError {
    ExpressionError::Type { function, message }
}

fn as_bool(function: &'static str, value: &Value) -> Result<bool, ExpressionError> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" => Ok(true),
        Value::String(s) if s == "false" => Ok(false),
        other => Err(type_error(function, format!("expected a boolean, got {other}"))),
    }
}

/// Numeric view of a value: numbers and numeric strings.
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

/// Value equality after coercion to a common type.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(_), Value::Number(_))
        | (Value::Number(_), Value::String(_))
        | (Value::String(_), Value::Number(_)) => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
        (Value::Bool(x), Value::String(s)) | (Value::String(s), Value::Bool(x)) => {
            s == if *x { "true" } else { "false" }
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| loose_eq(x, y))
        }
        _ => a == b,
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, ExpressionError> {
    match haystack {
        Value::Array(items) => Ok(items.iter().any(|item| loose_eq(item, needle))),
        Value::String(s) => Ok(s.contains(&display_value(needle))),
        Value::Object(map) => match needle {
            Value::String(key) => Ok(map.contains_key(key)),
            other => Err(type_error("contains", format!("map keys are strings, got {other}"))),
        },
        other => Err(type_error(
            "contains",
            format!("expected a list, string, or map, got {other}"),
        )),
    }
}

fn compare(function: &'static str, a: &Value, b: &Value) -> Result<Ordering, ExpressionError> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x
            .partial_cmp(&y)
            .ok_or_else(|| type_error(function, "cannot compare NaN".to_string()));
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        _ => Err(type_error(function, format!("cannot compare {a} with {b}"))),
    }
}

/// Render a value the way it is spliced into a string: strings unquoted,
/// everything else as JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
