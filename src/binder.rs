//! SQL placeholder binding.
//!
//! A template such as `select * from qub_post where post_id = ? and post_type = :type`
//! is scanned for `?` and `:name` placeholders. Placeholders inside single quoted
//! string literals are left alone, and a quote preceded by a backslash does not
//! end a literal. Binding produces two renditions of the same statement:
//!
//! * a native statement where every placeholder became `?N`, with the values
//!   handed to the driver as bind variables (this is what gets executed), and
//! * an inlined statement with every value quoted in place, kept for logging and
//!   for callers that still want a plain SQL string.
//!
//! Double quoted identifiers are copied through untouched, so a `?` inside
//! `"weird?column"` is not a placeholder.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use rusqlite::types::Value;

use crate::error::{QubusError, Result};

// ------------- Param -------------
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Param>),
    Map(Vec<(String, Param)>),
}

impl Param {
    pub fn type_name(&self) -> &'static str {
        match self {
            Param::Null => "null",
            Param::Bool(_) => "bool",
            Param::Int(_) => "int",
            Param::Float(_) => "float",
            Param::Text(_) => "string",
            Param::List(_) => "array",
            Param::Map(_) => "object",
        }
    }
    // Only the empty list survives as a composite; it binds as NULL.
    fn check_scalar(&self) -> Result<()> {
        match self {
            Param::List(items) if items.is_empty() => Ok(()),
            Param::List(_) | Param::Map(_) => {
                Err(QubusError::UnsupportedParameterType(self.type_name()))
            }
            _ => Ok(()),
        }
    }
    fn to_value(&self) -> Value {
        match self {
            Param::Null | Param::List(_) | Param::Map(_) => Value::Null,
            Param::Bool(b) => Value::Integer(*b as i64),
            Param::Int(i) => Value::Integer(*i),
            Param::Float(f) if f.is_finite() => Value::Real(*f),
            Param::Float(_) => Value::Null,
            Param::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self { Param::Text(v.to_owned()) }
}
impl From<String> for Param {
    fn from(v: String) -> Self { Param::Text(v) }
}
impl From<&String> for Param {
    fn from(v: &String) -> Self { Param::Text(v.clone()) }
}
impl From<i64> for Param {
    fn from(v: i64) -> Self { Param::Int(v) }
}
impl From<i32> for Param {
    fn from(v: i32) -> Self { Param::Int(v as i64) }
}
impl From<u32> for Param {
    fn from(v: u32) -> Self { Param::Int(v as i64) }
}
impl From<u64> for Param {
    fn from(v: u64) -> Self { Param::Int(v as i64) }
}
impl From<f64> for Param {
    fn from(v: f64) -> Self { Param::Float(v) }
}
impl From<bool> for Param {
    fn from(v: bool) -> Self { Param::Bool(v) }
}
impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Param::Null,
        }
    }
}
impl<T: Into<Param>> From<Vec<T>> for Param {
    fn from(v: Vec<T>) -> Self { Param::List(v.into_iter().map(Into::into).collect()) }
}

/// The arguments handed to [`Binder::bind`].
#[derive(Debug, Clone, PartialEq)]
pub enum Params {
    Positional(Vec<Param>),
    Named(Vec<(String, Param)>),
}

impl Params {
    pub fn named<K: Into<String>, V: Into<Param>>(pairs: Vec<(K, V)>) -> Self {
        Params::Named(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
    // A lone non-empty list is the array-wrapped form of a positional list.
    fn normalize(self) -> Self {
        match self {
            Params::Positional(mut params) => {
                if params.len() == 1 && matches!(&params[0], Param::List(inner) if !inner.is_empty()) {
                    if let Some(Param::List(inner)) = params.pop() {
                        return Params::Positional(inner);
                    }
                }
                Params::Positional(params)
            }
            named => named,
        }
    }
}

impl From<Vec<Param>> for Params {
    fn from(v: Vec<Param>) -> Self { Params::Positional(v) }
}
impl<const N: usize> From<[Param; N]> for Params {
    fn from(v: [Param; N]) -> Self { Params::Positional(v.into()) }
}
impl From<Param> for Params {
    fn from(v: Param) -> Self { Params::Positional(vec![v]) }
}

// ------------- Tokens -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder<'s> {
    Positional,
    Named(&'s str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'s> {
    /// SQL code without placeholders.
    Code(&'s str),
    /// Content of a single quoted literal, without the enclosing quotes.
    Literal(&'s str),
    Placeholder(Placeholder<'s>),
}

fn is_escaped(bytes: &[u8], quote_at: usize) -> bool {
    let backslashes = bytes[..quote_at].iter().rev().take_while(|b| **b == b'\\').count();
    backslashes % 2 == 1
}

/// Split a template into code, literal and placeholder tokens.
pub fn tokenize(sql: &str) -> Result<Vec<Token<'_>>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut in_literal = false;
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_literal {
            if b == b'\'' && !is_escaped(bytes, i) {
                tokens.push(Token::Literal(&sql[start..i]));
                in_literal = false;
                start = i + 1;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' if !is_escaped(bytes, i) => {
                if start < i {
                    tokens.push(Token::Code(&sql[start..i]));
                }
                in_literal = true;
                start = i + 1;
                i += 1;
            }
            // quoted identifiers stay part of the surrounding code
            b'"' => {
                let Some(close) = sql[i + 1..].find('"') else {
                    return Err(QubusError::InvalidQuery(format!(
                        "unterminated quoted identifier starting at byte {i}"
                    )));
                };
                i += close + 2;
            }
            b'?' => {
                if start < i {
                    tokens.push(Token::Code(&sql[start..i]));
                }
                tokens.push(Token::Placeholder(Placeholder::Positional));
                i += 1;
                start = i;
            }
            b':' if is_named_start(bytes, i) => {
                if start < i {
                    tokens.push(Token::Code(&sql[start..i]));
                }
                let name_start = i + 1;
                let mut end = name_start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                tokens.push(Token::Placeholder(Placeholder::Named(&sql[name_start..end])));
                i = end;
                start = i;
            }
            _ => i += 1,
        }
    }
    if in_literal {
        return Err(QubusError::InvalidQuery(format!(
            "unterminated string literal starting at byte {}",
            start.saturating_sub(1)
        )));
    }
    if start < bytes.len() {
        tokens.push(Token::Code(&sql[start..]));
    }
    Ok(tokens)
}

// `:name` but not `::cast` and not `a:b` inside an identifier
fn is_named_start(bytes: &[u8], at: usize) -> bool {
    let next_ok = bytes
        .get(at + 1)
        .is_some_and(|b| b.is_ascii_alphabetic() || *b == b'_');
    let prev_ok = at == 0
        || !(bytes[at - 1] == b':' || bytes[at - 1].is_ascii_alphanumeric() || bytes[at - 1] == b'_');
    next_ok && prev_ok
}

/// Number of parameters a template needs: every `?` plus every distinct `:name`.
pub fn count_placeholders(sql: &str) -> Result<usize> {
    let tokens = tokenize(sql)?;
    Ok(count_tokens(&tokens))
}

fn count_tokens(tokens: &[Token<'_>]) -> usize {
    let mut names: Vec<&str> = Vec::new();
    let mut positional = 0;
    for token in tokens {
        match token {
            Token::Placeholder(Placeholder::Positional) => positional += 1,
            Token::Placeholder(Placeholder::Named(name)) => {
                if !names.contains(name) {
                    names.push(*name);
                }
            }
            _ => (),
        }
    }
    positional + names.len()
}

// ------------- Quoting -------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    /// Quotes are doubled: `'O''Brien'`.
    #[default]
    Sqlite,
    /// Quotes and control characters are backslash escaped: `'O\'Brien'`.
    Mysql,
}

impl Dialect {
    pub fn quote_str(&self, s: &str) -> String {
        let mut quoted = String::with_capacity(s.len() + 2);
        quoted.push('\'');
        match self {
            Dialect::Sqlite => {
                for c in s.chars() {
                    if c == '\'' {
                        quoted.push('\'');
                    }
                    quoted.push(c);
                }
            }
            Dialect::Mysql => {
                for c in s.chars() {
                    match c {
                        '\0' => quoted.push_str("\\0"),
                        '\n' => quoted.push_str("\\n"),
                        '\r' => quoted.push_str("\\r"),
                        '\x1a' => quoted.push_str("\\Z"),
                        '\\' | '\'' | '"' => {
                            quoted.push('\\');
                            quoted.push(c);
                        }
                        _ => quoted.push(c),
                    }
                }
            }
        }
        quoted.push('\'');
        quoted
    }
    /// Literal content from a template, re-escaped for this dialect. SQLite
    /// has no backslash escapes, so `\'` becomes `''` there.
    pub fn literal<'s>(&self, content: &'s str) -> Cow<'s, str> {
        if *self == Dialect::Mysql || !content.contains('\'') {
            return Cow::Borrowed(content);
        }
        // every quote left inside a literal token is backslash escaped
        let mut rewritten = String::with_capacity(content.len() + 2);
        for c in content.chars() {
            if c == '\'' {
                rewritten.pop();
                rewritten.push_str("''");
            } else {
                rewritten.push(c);
            }
        }
        Cow::Owned(rewritten)
    }
    pub fn quote(&self, param: &Param) -> String {
        match param {
            Param::Null => String::from("NULL"),
            Param::Bool(b) => (if *b { "1" } else { "0" }).to_string(),
            Param::Int(i) => i.to_string(),
            Param::Float(f) if f.is_finite() => f.to_string(),
            Param::Float(_) => String::from("NULL"),
            Param::Text(s) => self.quote_str(s),
            Param::List(items) if items.is_empty() => String::from("NULL"),
            Param::List(items) => items.iter().map(|p| self.quote(p)).collect::<Vec<_>>().join(","),
            Param::Map(_) => String::from("NULL"),
        }
    }
}

// ------------- Binder -------------
/// A statement ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Bound {
    /// Statement with `?N` placeholders for the driver.
    pub native: String,
    /// Values for `?1`, `?2`, ...
    pub values: Vec<Value>,
    /// Statement with every value quoted in place.
    pub inlined: String,
}

impl Bound {
    /// A statement without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        Self { native: sql.clone(), values: Vec::new(), inlined: sql }
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.inlined)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Binder {
    pub dialect: Dialect,
}

impl Binder {
    pub fn new(dialect: Dialect) -> Self {
        Self { dialect }
    }

    /// Bind `params` into `template`. A missing template binds to nothing.
    pub fn bind(&self, template: Option<&str>, params: impl Into<Params>) -> Result<Option<Bound>> {
        let Some(template) = template else {
            return Ok(None);
        };
        let tokens = tokenize(template)?;
        let expected = count_tokens(&tokens);
        if expected == 0 {
            return Err(QubusError::InvalidQuery(String::from(
                "the query argument must have a placeholder",
            )));
        }
        let (ordered, slots) = match params.into().normalize() {
            Params::Positional(params) => {
                for param in &params {
                    param.check_scalar()?;
                }
                if params.len() != expected {
                    return Err(QubusError::PlaceholderCountMismatch { expected, supplied: params.len() });
                }
                (params, positional_slots(&tokens))
            }
            Params::Named(pairs) => named_slots(&tokens, pairs, expected)?,
        };
        Ok(Some(self.render(&tokens, &ordered, &slots)))
    }

    /// Bind and return only the inlined statement.
    pub fn inline(&self, template: Option<&str>, params: impl Into<Params>) -> Result<Option<String>> {
        Ok(self.bind(template, params)?.map(|bound| bound.inlined))
    }

    fn render(&self, tokens: &[Token<'_>], ordered: &[Param], slots: &[usize]) -> Bound {
        let mut native = String::new();
        let mut inlined = String::new();
        let mut slot = slots.iter();
        for token in tokens {
            match token {
                Token::Code(code) => {
                    native.push_str(code);
                    inlined.push_str(code);
                }
                Token::Literal(literal) => {
                    let literal = self.dialect.literal(literal);
                    for out in [&mut native, &mut inlined] {
                        out.push('\'');
                        out.push_str(&literal);
                        out.push('\'');
                    }
                }
                Token::Placeholder(_) => {
                    // slots has exactly one entry per placeholder token
                    let index = *slot.next().unwrap_or(&0);
                    native.push('?');
                    native.push_str(&(index + 1).to_string());
                    inlined.push_str(&self.dialect.quote(&ordered[index]));
                }
            }
        }
        let values = ordered.iter().map(Param::to_value).collect();
        Bound { native, values, inlined }
    }
}

// For every placeholder token, the index of the parameter it takes.
fn positional_slots(tokens: &[Token<'_>]) -> Vec<usize> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut next = 0;
    let mut slots = Vec::new();
    for token in tokens {
        match token {
            Token::Placeholder(Placeholder::Positional) => {
                slots.push(next);
                next += 1;
            }
            Token::Placeholder(Placeholder::Named(name)) => {
                let index = *seen.entry(*name).or_insert_with(|| {
                    next += 1;
                    next - 1
                });
                slots.push(index);
            }
            _ => (),
        }
    }
    slots
}

fn named_slots(
    tokens: &[Token<'_>],
    pairs: Vec<(String, Param)>,
    expected: usize,
) -> Result<(Vec<Param>, Vec<usize>)> {
    for (_, param) in &pairs {
        param.check_scalar()?;
    }
    if pairs.len() != expected {
        return Err(QubusError::PlaceholderCountMismatch { expected, supplied: pairs.len() });
    }
    let mut lookup: HashMap<String, Param> = pairs.into_iter().collect();
    let mut ordered = Vec::new();
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut slots = Vec::new();
    for token in tokens {
        match token {
            Token::Placeholder(Placeholder::Positional) => {
                return Err(QubusError::InvalidQuery(String::from(
                    "positional placeholder used with named parameters",
                )));
            }
            Token::Placeholder(Placeholder::Named(name)) => {
                if let Some(index) = seen.get(name) {
                    slots.push(*index);
                    continue;
                }
                let param = lookup.remove(*name).ok_or_else(|| {
                    QubusError::InvalidQuery(format!("no value supplied for :{name}"))
                })?;
                ordered.push(param);
                seen.insert(*name, ordered.len() - 1);
                slots.push(ordered.len() - 1);
            }
            _ => (),
        }
    }
    Ok((ordered, slots))
}
