//! Guard expressions.
//!
//! A guard decides whether a job runs. It may reference the trigger context
//! (`event.kind`, `event.branch`, ...), workflow variables (`vars.NAME`),
//! matrix values (`matrix.KEY`) and the outcome of the job's dependencies
//! through the status functions `success()`, `failure()` and `always()`.
//!
//! Evaluation is three-valued: while dependency outcomes are not known yet
//! (at graph build time) status functions evaluate to [`Truth::Unknown`], so a
//! guard can be decided early when the trigger alone settles it.

use crate::run::{JobStatus, TriggerContext};
use crate::workflow::ConditionExpression;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;
use thiserror::Error;

static WRAPPER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*\$\{\{\s*(.*?)\s*\}\}\s*$").expect("valid wrapper regex"));

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("valid placeholder regex"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError {
    #[error("syntax error at offset {position}: {message}")]
    Syntax { message: String, position: usize },

    #[error("undefined reference '{0}'")]
    UndefinedReference(String),

    #[error("unknown function '{0}()'")]
    UnknownFunction(String),
}

/// Result of evaluating a guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truth {
    True,
    False,
    /// Depends on dependency outcomes that are not known yet.
    Unknown,
}

impl Truth {
    pub fn is_true(self) -> bool {
        self == Truth::True
    }

    pub fn is_false(self) -> bool {
        self == Truth::False
    }
}

impl From<bool> for Truth {
    fn from(value: bool) -> Self {
        if value { Truth::True } else { Truth::False }
    }
}

/// Everything a guard may reference.
#[derive(Debug, Clone, Copy)]
pub struct GuardScope<'a> {
    pub trigger: &'a TriggerContext,
    pub variables: &'a HashMap<String, String>,
    pub matrix: &'a BTreeMap<String, String>,
    /// Statuses of the job's direct dependencies; `None` before they are known.
    pub dependencies: Option<&'a [JobStatus]>,
}

impl<'a> GuardScope<'a> {
    pub fn new(
        trigger: &'a TriggerContext,
        variables: &'a HashMap<String, String>,
        matrix: &'a BTreeMap<String, String>,
    ) -> Self {
        Self {
            trigger,
            variables,
            matrix,
            dependencies: None,
        }
    }

    pub fn with_dependencies(mut self, statuses: &'a [JobStatus]) -> Self {
        self.dependencies = Some(statuses);
        self
    }

    fn resolve(&self, path: &str) -> Result<String, GuardError> {
        match path {
            "event.kind" => return Ok(self.trigger.kind.as_str().to_string()),
            "event.name" | "github.event_name" => return Ok(self.trigger.event_name.clone()),
            "event.branch" | "github.ref_name" => {
                return Ok(self.trigger.branch.clone().unwrap_or_default());
            }
            _ => {}
        }

        let found = if let Some(name) = path.strip_prefix("vars.") {
            self.variables.get(name)
        } else if let Some(key) = path.strip_prefix("matrix.") {
            self.matrix.get(key)
        } else {
            None
        };

        found
            .cloned()
            .ok_or_else(|| GuardError::UndefinedReference(path.to_string()))
    }
}

/// Substitute `${{ ... }}` placeholders, failing on undefined references.
pub fn interpolate(input: &str, scope: &GuardScope<'_>) -> Result<String, GuardError> {
    let mut output = String::with_capacity(input.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(input) {
        let (Some(whole), Some(expr)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        output.push_str(&input[last..whole.start()]);
        output.push_str(&scope.resolve(expr.as_str().trim())?);
        last = whole.end();
    }
    output.push_str(&input[last..]);
    Ok(output)
}

/// A parsed guard expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    source: String,
    expr: Expr,
}

impl Guard {
    /// Parse a guard, with or without the `${{ }}` wrapper.
    pub fn parse(source: &str) -> Result<Self, GuardError> {
        let body = strip_wrapper(source);
        let tokens = Lexer::new(body).tokenize()?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            end: body.len(),
        };
        let expr = parser.parse_or()?;
        if let Some((_, position)) = parser.tokens.get(parser.pos) {
            return Err(GuardError::Syntax {
                message: "unexpected trailing input".to_string(),
                position: *position,
            });
        }
        Ok(Self {
            source: body.to_string(),
            expr,
        })
    }

    /// Build a guard from the workflow form. `None` when no guard is declared.
    pub fn from_condition(condition: &ConditionExpression) -> Result<Option<Self>, GuardError> {
        let source = match condition {
            ConditionExpression::Simple(expr) => strip_wrapper(expr).to_string(),
            ConditionExpression::Structured { if_expr, unless } => {
                match (if_expr.as_deref(), unless.as_deref()) {
                    (None, None) => return Ok(None),
                    (Some(i), None) => strip_wrapper(i).to_string(),
                    (None, Some(u)) => format!("!({})", strip_wrapper(u)),
                    (Some(i), Some(u)) => {
                        format!("({}) && !({})", strip_wrapper(i), strip_wrapper(u))
                    }
                }
            }
        };
        Self::parse(&source).map(Some)
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the guard decides on dependency outcomes itself. Guards that
    /// don't are implicitly combined with `success()` by the scheduler.
    pub fn uses_status_functions(&self) -> bool {
        self.expr.uses_status_functions()
    }

    pub fn evaluate(&self, scope: &GuardScope<'_>) -> Result<Truth, GuardError> {
        self.expr.eval(scope).map(|v| v.truth())
    }
}

fn strip_wrapper(source: &str) -> &str {
    WRAPPER
        .captures(source)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or_else(|| source.trim())
}

/// `success()` over a set of dependency statuses.
pub fn all_succeeded(statuses: &[JobStatus]) -> bool {
    statuses.iter().all(|s| *s == JobStatus::Success)
}

/// `failure()` over a set of dependency statuses.
pub fn any_failed(statuses: &[JobStatus]) -> bool {
    statuses.iter().any(|s| *s == JobStatus::Failure)
}

const STATUS_FUNCTIONS: [&str; 3] = ["success", "failure", "always"];

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Literal(Value),
    Reference(String),
    Call(String),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Eq(Box<Expr>, Box<Expr>),
    Ne(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Bool(bool),
    Str(String),
    Unknown,
}

impl Value {
    fn truth(&self) -> Truth {
        match self {
            Value::Bool(b) => Truth::from(*b),
            Value::Str(s) => Truth::from(!s.is_empty()),
            Value::Unknown => Truth::Unknown,
        }
    }

    fn text(&self) -> Option<String> {
        match self {
            Value::Bool(b) => Some(b.to_string()),
            Value::Str(s) => Some(s.clone()),
            Value::Unknown => None,
        }
    }

    fn from_truth(truth: Truth) -> Self {
        match truth {
            Truth::True => Value::Bool(true),
            Truth::False => Value::Bool(false),
            Truth::Unknown => Value::Unknown,
        }
    }
}

impl Expr {
    fn uses_status_functions(&self) -> bool {
        match self {
            Expr::Call(_) => true,
            Expr::Literal(_) | Expr::Reference(_) => false,
            Expr::Not(inner) => inner.uses_status_functions(),
            Expr::And(l, r) | Expr::Or(l, r) | Expr::Eq(l, r) | Expr::Ne(l, r) => {
                l.uses_status_functions() || r.uses_status_functions()
            }
        }
    }

    // Both operands are always evaluated so an undefined reference on the
    // right of a short-circuit still fails the guard.
    fn eval(&self, scope: &GuardScope<'_>) -> Result<Value, GuardError> {
        Ok(match self {
            Expr::Literal(v) => v.clone(),
            Expr::Reference(path) => Value::Str(scope.resolve(path)?),
            Expr::Call(name) => match (name.as_str(), scope.dependencies) {
                ("always", _) => Value::Bool(true),
                (_, None) => Value::Unknown,
                ("success", Some(deps)) => Value::Bool(all_succeeded(deps)),
                ("failure", Some(deps)) => Value::Bool(any_failed(deps)),
                (other, Some(_)) => return Err(GuardError::UnknownFunction(other.to_string())),
            },
            Expr::Not(inner) => Value::from_truth(match inner.eval(scope)?.truth() {
                Truth::True => Truth::False,
                Truth::False => Truth::True,
                Truth::Unknown => Truth::Unknown,
            }),
            Expr::And(l, r) => {
                let (l, r) = (l.eval(scope)?.truth(), r.eval(scope)?.truth());
                Value::from_truth(match (l, r) {
                    (Truth::False, _) | (_, Truth::False) => Truth::False,
                    (Truth::True, Truth::True) => Truth::True,
                    _ => Truth::Unknown,
                })
            }
            Expr::Or(l, r) => {
                let (l, r) = (l.eval(scope)?.truth(), r.eval(scope)?.truth());
                Value::from_truth(match (l, r) {
                    (Truth::True, _) | (_, Truth::True) => Truth::True,
                    (Truth::False, Truth::False) => Truth::False,
                    _ => Truth::Unknown,
                })
            }
            Expr::Eq(l, r) | Expr::Ne(l, r) => {
                let (l, r) = (l.eval(scope)?, r.eval(scope)?);
                match (l.text(), r.text()) {
                    (Some(l), Some(r)) => Value::Bool((l == r) == matches!(self, Expr::Eq(..))),
                    _ => Value::Unknown,
                }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Eq,
    Ne,
    Str(String),
    Ident(String),
}

struct Lexer<'a> {
    input: &'a str,
    chars: std::iter::Peekable<std::str::CharIndices<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().peekable(),
        }
    }

    fn tokenize(mut self) -> Result<Vec<(Token, usize)>, GuardError> {
        let mut tokens = Vec::new();
        while let Some(&(pos, c)) = self.chars.peek() {
            let token = match c {
                c if c.is_whitespace() => {
                    self.chars.next();
                    continue;
                }
                '(' => self.single(Token::LParen),
                ')' => self.single(Token::RParen),
                '!' => {
                    self.chars.next();
                    if self.eat('=') { Token::Ne } else { Token::Not }
                }
                '=' => self.pair('=', Token::Eq, pos)?,
                '&' => self.pair('&', Token::And, pos)?,
                '|' => self.pair('|', Token::Or, pos)?,
                '\'' | '"' => self.string(c, pos)?,
                c if c.is_ascii_alphanumeric() || c == '_' => self.word(pos),
                other => {
                    return Err(GuardError::Syntax {
                        message: format!("unexpected character '{}'", other),
                        position: pos,
                    });
                }
            };
            tokens.push((token, pos));
        }
        Ok(tokens)
    }

    fn single(&mut self, token: Token) -> Token {
        self.chars.next();
        token
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.chars.peek().map(|&(_, c)| c) == Some(expected) {
            self.chars.next();
            true
        } else {
            false
        }
    }

    fn pair(&mut self, second: char, token: Token, pos: usize) -> Result<Token, GuardError> {
        self.chars.next();
        if self.eat(second) {
            Ok(token)
        } else {
            Err(GuardError::Syntax {
                message: format!("expected '{}' to complete operator", second),
                position: pos,
            })
        }
    }

    fn string(&mut self, quote: char, pos: usize) -> Result<Token, GuardError> {
        self.chars.next();
        let mut value = String::new();
        for (_, c) in self.chars.by_ref() {
            if c == quote {
                return Ok(Token::Str(value));
            }
            value.push(c);
        }
        Err(GuardError::Syntax {
            message: "unterminated string literal".to_string(),
            position: pos,
        })
    }

    fn word(&mut self, start: usize) -> Token {
        let mut end = start;
        while let Some(&(pos, c)) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                end = pos + c.len_utf8();
                self.chars.next();
            } else {
                break;
            }
        }
        let word = &self.input[start..end];
        if word.starts_with(|c: char| c.is_ascii_digit()) {
            Token::Str(word.to_string())
        } else {
            Token::Ident(word.to_string())
        }
    }
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, p)| *p).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), GuardError> {
        let position = self.position();
        match self.advance() {
            Some(t) if t == expected => Ok(()),
            _ => Err(GuardError::Syntax {
                message: format!("expected {:?}", expected),
                position,
            }),
        }
    }

    fn parse_or(&mut self) -> Result<Expr, GuardError> {
        let mut left = self.parse_and()?;
        while self.peek() == Some(&Token::Or) {
            self.advance();
            left = Expr::Or(Box::new(left), Box::new(self.parse_and()?));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, GuardError> {
        let mut left = self.parse_equality()?;
        while self.peek() == Some(&Token::And) {
            self.advance();
            left = Expr::And(Box::new(left), Box::new(self.parse_equality()?));
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> Result<Expr, GuardError> {
        let mut left = self.parse_unary()?;
        loop {
            left = match self.peek().cloned() {
                Some(Token::Eq) => {
                    self.advance();
                    Expr::Eq(Box::new(left), Box::new(self.parse_unary()?))
                }
                Some(Token::Ne) => {
                    self.advance();
                    Expr::Ne(Box::new(left), Box::new(self.parse_unary()?))
                }
                _ => return Ok(left),
            };
        }
    }

    fn parse_unary(&mut self) -> Result<Expr, GuardError> {
        if self.peek() == Some(&Token::Not) {
            self.advance();
            return Ok(Expr::Not(Box::new(self.parse_unary()?)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, GuardError> {
        let position = self.position();
        match self.advance() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::Str(s))),
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(word)) => match word.as_str() {
                "true" => Ok(Expr::Literal(Value::Bool(true))),
                "false" => Ok(Expr::Literal(Value::Bool(false))),
                _ if self.peek() == Some(&Token::LParen) => {
                    self.advance();
                    self.expect(Token::RParen)?;
                    if STATUS_FUNCTIONS.contains(&word.as_str()) {
                        Ok(Expr::Call(word))
                    } else {
                        Err(GuardError::UnknownFunction(word))
                    }
                }
                _ => Ok(Expr::Reference(word)),
            },
            Some(other) => Err(GuardError::Syntax {
                message: format!("unexpected {:?}", other),
                position,
            }),
            None => Err(GuardError::Syntax {
                message: "unexpected end of expression".to_string(),
                position,
            }),
        }
    }
}
