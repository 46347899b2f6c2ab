//! Filter predicates over the JSON form of Tests and Results.
//!
//! ### Grammar (informal)
//! - **Paths**: `selected`, `webpagetest.metrics.FirstContentfulPaint`
//! - **Literals**: numbers, `'single'` / `"double"` quoted strings, `true`,
//!   `false`, `null`
//! - **Comparisons**: `==`, `===`, `!=`, `!==`, `>`, `>=`, `<`, `<=`
//! - **Boolean operators**: `a && b`, `a || b`, `!a`, `( ... )`
//!
//! A missing leaf evaluates to `null`. Descending through a value that is not
//! an object makes the whole predicate non-matching.

use crate::path::{self, Lookup};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Maximum supported nesting depth for filter expressions.
const MAX_NESTING: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("filter is empty")]
    EmptyInput,

    #[error("unexpected `{found}` at {position}, expected {expected}")]
    UnexpectedToken {
        expected: &'static str,
        found: String,
        position: usize,
    },

    #[error("unterminated string starting at {position}")]
    UnterminatedString { position: usize },

    #[error("invalid number `{raw}` at {position}")]
    InvalidNumber { raw: String, position: usize },

    #[error("nesting exceeds {max} levels at {position}")]
    NestingTooDeep { max: usize, position: usize },

    #[error("unexpected trailing input at {position}")]
    TrailingInput { position: usize },
}

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Or(Box<Expr>, Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(CmpOp, Box<Expr>, Box<Expr>),
    Path(Vec<String>),
    Literal(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Raised while evaluating a path that cannot be traversed.
struct Unresolvable;

impl Filter {
    pub fn parse(input: &str) -> Result<Self, FilterError> {
        let tokens = lex(input)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let expr = parser.parse_or()?;
        let trailing = parser.peek();
        if trailing.token != Token::Eof {
            return Err(FilterError::TrailingInput {
                position: trailing.position,
            });
        }
        Ok(Self { expr })
    }

    /// Evaluate against `item`; unresolvable paths yield `false`.
    pub fn matches(&self, item: &Value) -> bool {
        match eval(&self.expr, item) {
            Ok(v) => truthy(&v),
            Err(Unresolvable) => false,
        }
    }
}

/// Keep the items for which every filter matches.
///
/// A filter that fails to parse matches nothing, so the result is empty.
pub fn apply<T: Serialize>(items: Vec<T>, filters: &[String]) -> Vec<T> {
    if filters.is_empty() {
        return items;
    }
    let mut parsed = Vec::with_capacity(filters.len());
    for raw in filters {
        match Filter::parse(raw) {
            Ok(f) => parsed.push(f),
            Err(e) => {
                warn!(filter = %raw, error = %e, "Ignoring items for unparseable filter");
                return Vec::new();
            }
        }
    }
    items
        .into_iter()
        .filter(|item| match serde_json::to_value(item) {
            Ok(v) => parsed.iter().all(|f| f.matches(&v)),
            Err(e) => {
                warn!(error = %e, "Failed to encode item for filtering");
                false
            }
        })
        .collect()
}

fn eval(expr: &Expr, item: &Value) -> Result<Value, Unresolvable> {
    match expr {
        Expr::Or(a, b) => {
            let left = eval(a, item)?;
            if truthy(&left) {
                Ok(left)
            } else {
                eval(b, item)
            }
        }
        Expr::And(a, b) => {
            let left = eval(a, item)?;
            if truthy(&left) {
                eval(b, item)
            } else {
                Ok(left)
            }
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, item)?))),
        Expr::Compare(op, a, b) => {
            let left = eval(a, item)?;
            let right = eval(b, item)?;
            Ok(Value::Bool(compare(*op, &left, &right)))
        }
        Expr::Path(segments) => match path::lookup(item, segments) {
            Lookup::Found(v) => Ok(v.clone()),
            Lookup::Missing => Ok(Value::Null),
            Lookup::Unresolvable => Err(Unresolvable),
        },
        Expr::Literal(v) => Ok(v.clone()),
    }
}

fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn compare(op: CmpOp, a: &Value, b: &Value) -> bool {
    match op {
        CmpOp::Eq => values_equal(a, b),
        CmpOp::Ne => !values_equal(a, b),
        CmpOp::Gt | CmpOp::Ge | CmpOp::Lt | CmpOp::Le => {
            let ordering = match (a, b) {
                (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
                    (Some(x), Some(y)) => x.partial_cmp(&y),
                    _ => None,
                },
                (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
                _ => None,
            };
            let Some(ordering) = ordering else {
                return false;
            };
            match op {
                CmpOp::Gt => ordering.is_gt(),
                CmpOp::Ge => ordering.is_ge(),
                CmpOp::Lt => ordering.is_lt(),
                _ => ordering.is_le(),
            }
        }
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Lexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Path(Vec<String>),
    Number(f64),
    Str(String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Cmp(CmpOp),
    LParen,
    RParen,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
struct Spanned {
    token: Token,
    position: usize,
}

fn lex(input: &str) -> Result<Vec<Spanned>, FilterError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let start = i;
        let next = bytes.get(i + 1).copied();
        let token = match bytes[i] {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'(' => {
                i += 1;
                Token::LParen
            }
            b')' => {
                i += 1;
                Token::RParen
            }
            b'&' if next == Some(b'&') => {
                i += 2;
                Token::And
            }
            b'|' if next == Some(b'|') => {
                i += 2;
                Token::Or
            }
            b'=' | b'!' if next == Some(b'=') => {
                let negated = bytes[i] == b'!';
                i += 2;
                // `===` and `!==` behave like their two-character forms.
                if bytes.get(i) == Some(&b'=') {
                    i += 1;
                }
                Token::Cmp(if negated { CmpOp::Ne } else { CmpOp::Eq })
            }
            b'!' => {
                i += 1;
                Token::Not
            }
            b'>' | b'<' => {
                let greater = bytes[i] == b'>';
                let or_equal = next == Some(b'=');
                i += if or_equal { 2 } else { 1 };
                Token::Cmp(match (greater, or_equal) {
                    (true, false) => CmpOp::Gt,
                    (true, true) => CmpOp::Ge,
                    (false, false) => CmpOp::Lt,
                    (false, true) => CmpOp::Le,
                })
            }
            quote @ (b'\'' | b'"') => {
                let end = input[i + 1..]
                    .find(quote as char)
                    .ok_or(FilterError::UnterminatedString { position: start })?;
                let text = input[i + 1..i + 1 + end].to_string();
                i += end + 2;
                Token::Str(text)
            }
            b'0'..=b'9' | b'-' | b'.' => {
                i += 1;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let raw = &input[start..i];
                let n = raw.parse::<f64>().map_err(|_| FilterError::InvalidNumber {
                    raw: raw.to_string(),
                    position: start,
                })?;
                Token::Number(n)
            }
            b if b.is_ascii_alphabetic() || b == b'_' || b == b'$' => {
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || matches!(bytes[i], b'_' | b'$' | b'.'))
                {
                    i += 1;
                }
                match &input[start..i] {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" | "undefined" => Token::Null,
                    word => Token::Path(path::parse(word).into_iter().map(String::from).collect()),
                }
            }
            _ => {
                let found = input[i..].chars().next().map(String::from).unwrap_or_default();
                return Err(FilterError::UnexpectedToken {
                    expected: "path, literal, or operator",
                    found,
                    position: start,
                });
            }
        };
        tokens.push(Spanned {
            token,
            position: start,
        });
    }

    if tokens.is_empty() {
        return Err(FilterError::EmptyInput);
    }
    tokens.push(Spanned {
        token: Token::Eof,
        position: input.len(),
    });
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Spanned {
        // The token list always ends with Eof and `pos` never passes it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Spanned {
        let tok = self.peek().clone();
        if tok.token != Token::Eof {
            self.pos += 1;
        }
        tok
    }

    fn parse_or(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.parse_and()?;
        while self.peek().token == Token::Or {
            self.advance();
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.parse_unary()?;
        while self.peek().token == Token::And {
            self.advance();
            let right = self.parse_unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, FilterError> {
        if self.peek().token == Token::Not {
            let position = self.advance().position;
            self.enter(position)?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, FilterError> {
        let left = self.parse_primary()?;
        if let Token::Cmp(op) = self.peek().token {
            self.advance();
            let right = self.parse_primary()?;
            return Ok(Expr::Compare(op, Box::new(left), Box::new(right)));
        }
        Ok(left)
    }

    fn parse_primary(&mut self) -> Result<Expr, FilterError> {
        let Spanned { token, position } = self.advance();
        match token {
            Token::LParen => {
                self.enter(position)?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                let close = self.advance();
                if close.token != Token::RParen {
                    return Err(FilterError::UnexpectedToken {
                        expected: ")",
                        found: describe(&close.token),
                        position: close.position,
                    });
                }
                Ok(inner)
            }
            Token::Path(segments) => Ok(Expr::Path(segments)),
            Token::Number(n) => Ok(Expr::Literal(
                serde_json::Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null),
            )),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            other => Err(FilterError::UnexpectedToken {
                expected: "path or literal",
                found: describe(&other),
                position,
            }),
        }
    }

    fn enter(&mut self, position: usize) -> Result<(), FilterError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(FilterError::NestingTooDeep {
                max: MAX_NESTING,
                position,
            });
        }
        Ok(())
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Path(p) => p.join("."),
        Token::Number(n) => n.to_string(),
        Token::Str(s) => format!("'{}'", s),
        Token::True => "true".into(),
        Token::False => "false".into(),
        Token::Null => "null".into(),
        Token::And => "&&".into(),
        Token::Or => "||".into(),
        Token::Not => "!".into(),
        Token::Cmp(_) => "comparison".into(),
        Token::LParen => "(".into(),
        Token::RParen => ")".into(),
        Token::Eof => "end of input".into(),
    }
}
