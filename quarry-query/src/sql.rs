//! SQL text assembly with ordered bound parameters.

use std::fmt;

use crate::dialect::Dialect;
use crate::error::{QueryError, QueryResult};
use crate::value::Value;

/// A compiled statement: SQL text plus its ordered parameter list.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    /// SQL text containing only placeholders, never bound values.
    pub sql: String,
    /// Parameters in placeholder order.
    pub params: Vec<Value>,
}

impl CompiledQuery {
    /// Create a compiled statement.
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Number of placeholders (`?` or `$n`) outside quoted literals and
    /// identifiers.
    pub fn placeholder_count(&self) -> usize {
        count_placeholders(&self.sql)
    }

    /// Deterministic cache key built from the SQL text and parameter values.
    pub fn fingerprint(&self) -> String {
        let mut key = String::with_capacity(self.sql.len() + self.params.len() * 8);
        key.push_str(&self.sql);
        for param in &self.params {
            key.push('\u{1f}');
            key.push_str(&format!("{:?}", param));
        }
        key
    }
}

impl fmt::Display for CompiledQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Incrementally builds SQL, numbering placeholders as parameters are pushed.
pub struct SqlWriter<'d> {
    dialect: &'d dyn Dialect,
    sql: String,
    params: Vec<Value>,
}

impl<'d> SqlWriter<'d> {
    /// Create a writer for `dialect`.
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self {
            dialect,
            sql: String::with_capacity(128),
            params: Vec::new(),
        }
    }

    /// The dialect in use.
    pub fn dialect(&self) -> &'d dyn Dialect {
        self.dialect
    }

    /// Push literal SQL.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    /// Push a placeholder and record its value.
    pub fn push_param(&mut self, value: Value) -> &mut Self {
        let placeholder = self.next_placeholder();
        self.sql.push_str(&placeholder);
        self.params.push(value);
        self
    }

    /// Record a value and return its placeholder without writing it, for
    /// dialect fragments that embed the placeholder themselves.
    pub fn bind(&mut self, value: Value) -> String {
        let placeholder = self.next_placeholder();
        self.params.push(value);
        placeholder
    }

    /// Push a quoted identifier.
    pub fn push_identifier(&mut self, name: &str) -> &mut Self {
        let quoted = self.dialect.quote_identifier(name);
        self.sql.push_str(&quoted);
        self
    }

    /// Push `"table"."column"`.
    pub fn push_qualified(&mut self, table: &str, column: &str) -> &mut Self {
        self.push_identifier(table);
        self.sql.push('.');
        self.push_identifier(column)
    }

    /// Push a caller-written fragment whose `?` markers are rewritten to the
    /// dialect's placeholder style and bound to `params` in order.
    pub fn push_raw(&mut self, fragment: &str, params: &[Value]) -> QueryResult<&mut Self> {
        let markers = count_question_marks(fragment);
        if markers != params.len() {
            return Err(QueryError::invalid_parameter(format!(
                "Raw fragment has {} placeholders but {} parameters were supplied",
                markers,
                params.len()
            ))
            .with_sql(fragment));
        }

        let mut params = params.iter();
        let mut quote: Option<char> = None;
        for ch in fragment.chars() {
            match (quote, ch) {
                (Some(q), c) if c == q => {
                    quote = None;
                    self.sql.push(c);
                }
                (Some(_), c) => self.sql.push(c),
                (None, '\'' | '"' | '`') => {
                    quote = Some(ch);
                    self.sql.push(ch);
                }
                (None, '?') => {
                    let value = params.next().cloned().unwrap_or(Value::Null);
                    self.push_param(value);
                }
                (None, c) => self.sql.push(c),
            }
        }
        Ok(self)
    }

    /// Number of parameters pushed so far.
    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    /// Finish and return the compiled statement.
    pub fn finish(self) -> CompiledQuery {
        CompiledQuery {
            sql: self.sql,
            params: self.params,
        }
    }

    fn next_placeholder(&self) -> String {
        self.dialect.placeholder(self.params.len() + 1).into_owned()
    }
}

fn count_question_marks(sql: &str) -> usize {
    let mut quote: Option<char> = None;
    let mut count = 0;
    for ch in sql.chars() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if matches!(ch, '\'' | '"' | '`') => quote = Some(ch),
            None if ch == '?' => count += 1,
            None => {}
        }
    }
    count
}

/// Count `?` and `$n` placeholders outside quoted regions.
pub fn count_placeholders(sql: &str) -> usize {
    let mut quote: Option<char> = None;
    let mut count = 0;
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None => match ch {
                '\'' | '"' | '`' => quote = Some(ch),
                '?' => count += 1,
                '$' if chars.peek().is_some_and(|c| c.is_ascii_digit()) => {
                    count += 1;
                    while chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                        chars.next();
                    }
                }
                _ => {}
            },
        }
    }
    count
}
