//! Predicate trees.
//!
//! Filters are plain data until they are written into a [`SqlWriter`], at
//! which point every column is checked against the model metadata and every
//! value becomes a bound parameter.
//!
//! ```rust
//! use quarry_query::filter::{CompareOp, Filter};
//!
//! let adults_named_a = Filter::and([
//!     Filter::compare("age", CompareOp::Ge, 18),
//!     Filter::like("name", "A%"),
//! ]);
//! assert!(matches!(adults_named_a, Filter::And(ref parts) if parts.len() == 2));
//! ```

use std::fmt;
use std::str::FromStr;

use crate::error::{QueryError, QueryResult};
use crate::metadata::ModelMeta;
use crate::sql::SqlWriter;
use crate::value::Value;

/// Comparison operators accepted by `where`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `!=` / `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `LIKE`
    Like,
    /// `NOT LIKE`
    NotLike,
}

impl CompareOp {
    /// SQL spelling of the operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
        }
    }
}

impl FromStr for CompareOp {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        match normalized.as_str() {
            "=" | "==" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "LIKE" => Ok(Self::Like),
            "NOT LIKE" => Ok(Self::NotLike),
            _ => Err(QueryError::invalid_filter(format!("Unknown operator '{}'", s))
                .with_suggestion("Use one of =, !=, <>, <, <=, >, >=, LIKE, NOT LIKE")),
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// One `column op value` comparison, used to build OR groups.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Column name.
    pub column: String,
    /// Operator, as written by the caller.
    pub op: String,
    /// Bound value.
    pub value: Value,
}

impl Condition {
    /// Create a condition.
    pub fn new(column: impl Into<String>, op: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op: op.into(),
            value: value.into(),
        }
    }

    /// Parse the operator and turn the condition into a filter.
    pub fn into_filter(self) -> QueryResult<Filter> {
        let op = self.op.parse::<CompareOp>()?;
        Ok(Filter::compare(self.column, op, self.value))
    }
}

/// A predicate tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column op value`.
    Compare {
        /// Column name.
        column: String,
        /// Operator.
        op: CompareOp,
        /// Bound value.
        value: Value,
    },
    /// `column BETWEEN low AND high`.
    Between {
        /// Column name.
        column: String,
        /// Lower bound.
        low: Value,
        /// Upper bound.
        high: Value,
    },
    /// `column IS NULL`.
    IsNull(String),
    /// `column IS NOT NULL`.
    IsNotNull(String),
    /// `column IN (...)`.
    In(String, Vec<Value>),
    /// `column NOT IN (...)`.
    NotIn(String, Vec<Value>),
    /// Dialect full-text match.
    FullText {
        /// Column name.
        column: String,
        /// Search term.
        term: String,
    },
    /// Caller-written SQL with `?` placeholders, inserted verbatim.
    Raw {
        /// SQL fragment.
        sql: String,
        /// Parameters for the fragment's placeholders.
        params: Vec<Value>,
    },
    /// All sub-filters must hold.
    And(Vec<Filter>),
    /// Any sub-filter must hold.
    Or(Vec<Filter>),
    /// Negation.
    Not(Box<Filter>),
}

impl Filter {
    /// Comparison filter.
    pub fn compare(column: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            column: column.into(),
            op,
            value: value.into(),
        }
    }

    /// Equality filter.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(column, CompareOp::Eq, value)
    }

    /// LIKE filter.
    pub fn like(column: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::compare(column, CompareOp::Like, Value::String(pattern.into()))
    }

    /// BETWEEN filter.
    pub fn between(column: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        Self::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    /// IN filter.
    pub fn is_in<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    /// NOT IN filter.
    pub fn not_in<V: Into<Value>>(column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Self::NotIn(column.into(), values.into_iter().map(Into::into).collect())
    }

    /// Raw SQL fragment.
    pub fn raw(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self::Raw {
            sql: sql.into(),
            params,
        }
    }

    /// Conjunction.
    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::And(filters.into_iter().collect())
    }

    /// Disjunction.
    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Self::Or(filters.into_iter().collect())
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Write this filter as SQL, validating columns against `meta`.
    ///
    /// When `qualify` is set, column references are prefixed with the table
    /// name (needed inside correlated subqueries).
    pub(crate) fn write(&self, w: &mut SqlWriter<'_>, meta: &ModelMeta, qualify: bool) -> QueryResult<()> {
        let column = |w: &mut SqlWriter<'_>, name: &str| -> QueryResult<()> {
            meta.require_column(name)?;
            if qualify {
                w.push_qualified(meta.table(), name);
            } else {
                w.push_identifier(name);
            }
            Ok(())
        };

        match self {
            Self::Compare { column: col, op, value } => {
                column(w, col)?;
                match (op, value) {
                    (CompareOp::Eq, Value::Null) => {
                        w.push(" IS NULL");
                    }
                    (CompareOp::Ne, Value::Null) => {
                        w.push(" IS NOT NULL");
                    }
                    _ => {
                        w.push(" ").push(op.as_sql()).push(" ").push_param(value.clone());
                    }
                }
            }
            Self::Between { column: col, low, high } => {
                column(w, col)?;
                w.push(" BETWEEN ")
                    .push_param(low.clone())
                    .push(" AND ")
                    .push_param(high.clone());
            }
            Self::IsNull(col) => {
                column(w, col)?;
                w.push(" IS NULL");
            }
            Self::IsNotNull(col) => {
                column(w, col)?;
                w.push(" IS NOT NULL");
            }
            Self::In(col, values) | Self::NotIn(col, values) => {
                let negated = matches!(self, Self::NotIn(..));
                meta.require_column(col)?;
                if values.is_empty() {
                    // IN () is not valid SQL; an empty set matches nothing.
                    w.push(if negated { "1 = 1" } else { "1 = 0" });
                    return Ok(());
                }
                column(w, col)?;
                w.push(if negated { " NOT IN (" } else { " IN (" });
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    w.push_param(value.clone());
                }
                w.push(")");
            }
            Self::FullText { column: col, term } => {
                meta.require_column(col)?;
                let placeholder = w.bind(Value::String(term.clone()));
                let fragment = w.dialect().full_text_search(col, &placeholder);
                w.push(&fragment);
            }
            Self::Raw { sql, params } => {
                w.push("(");
                w.push_raw(sql, params)?;
                w.push(")");
            }
            Self::And(filters) | Self::Or(filters) => {
                let joiner = if matches!(self, Self::And(_)) { " AND " } else { " OR " };
                if filters.is_empty() {
                    w.push(if matches!(self, Self::And(_)) { "1 = 1" } else { "1 = 0" });
                    return Ok(());
                }
                w.push("(");
                for (i, filter) in filters.iter().enumerate() {
                    if i > 0 {
                        w.push(joiner);
                    }
                    filter.write(w, meta, qualify)?;
                }
                w.push(")");
            }
            Self::Not(inner) => {
                w.push("NOT (");
                inner.write(w, meta, qualify)?;
                w.push(")");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Postgres, Sqlite};
    use crate::error::ErrorCode;
    use crate::metadata::{Column, LogicalType, Model, ModelSchema};
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Person {
        id: i64,
        name: String,
        age: i64,
    }

    impl Model for Person {
        fn schema() -> ModelSchema<Self> {
            ModelSchema::<Self>::new()
                .column(Column::new("id", LogicalType::BigInt).primary_key())
                .column(Column::new("name", LogicalType::String))
                .column(Column::new("age", LogicalType::Integer))
        }
    }

    fn render(filter: &Filter) -> QueryResult<(String, usize)> {
        let meta = Person::schema().into_meta()?;
        let dialect = Postgres;
        let mut w = SqlWriter::new(&dialect);
        filter.write(&mut w, &meta, false)?;
        let compiled = w.finish();
        Ok((compiled.sql, compiled.params.len()))
    }

    #[test]
    fn test_operator_parsing() {
        assert_eq!("!=".parse::<CompareOp>().unwrap(), CompareOp::Ne);
        assert_eq!("not  like".parse::<CompareOp>().unwrap(), CompareOp::NotLike);
        let err = "~~".parse::<CompareOp>().unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidFilter);
    }

    #[test]
    fn test_compare_and_null() {
        let (sql, params) = render(&Filter::eq("name", "Bob")).unwrap();
        assert_eq!(sql, "\"name\" = $1");
        assert_eq!(params, 1);

        let (sql, params) = render(&Filter::eq("name", Value::Null)).unwrap();
        assert_eq!(sql, "\"name\" IS NULL");
        assert_eq!(params, 0);
    }

    #[test]
    fn test_or_group_and_nesting() {
        let filter = Filter::or([
            Filter::compare("age", CompareOp::Lt, 18),
            Filter::and([Filter::eq("name", "Root"), Filter::not(Filter::IsNull("age".into()))]),
        ]);
        let (sql, params) = render(&filter).unwrap();
        assert_eq!(
            sql,
            "(\"age\" < $1 OR (\"name\" = $2 AND NOT (\"age\" IS NULL)))"
        );
        assert_eq!(params, 2);
    }

    #[test]
    fn test_in_lists() {
        let (sql, params) = render(&Filter::is_in("id", [1, 2, 3])).unwrap();
        assert_eq!(sql, "\"id\" IN ($1, $2, $3)");
        assert_eq!(params, 3);

        let (sql, _) = render(&Filter::is_in("id", Vec::<i64>::new())).unwrap();
        assert_eq!(sql, "1 = 0");
        let (sql, _) = render(&Filter::not_in("id", Vec::<i64>::new())).unwrap();
        assert_eq!(sql, "1 = 1");
    }

    #[test]
    fn test_unknown_column_rejected() {
        let err = render(&Filter::eq("nickname", "x")).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidColumn);
    }

    #[test]
    fn test_full_text_uses_dialect() {
        let meta = Person::schema().into_meta().unwrap();
        let dialect = Sqlite;
        let mut w = SqlWriter::new(&dialect);
        Filter::FullText {
            column: "name".into(),
            term: "demo".into(),
        }
        .write(&mut w, &meta, false)
        .unwrap();
        let compiled = w.finish();
        assert_eq!(compiled.sql, "\"name\" LIKE '%' || ? || '%'");
        assert_eq!(compiled.params, vec![Value::from("demo")]);
    }

    #[test]
    fn test_condition_into_filter() {
        let filter = Condition::new("age", ">=", 21).into_filter().unwrap();
        assert_eq!(filter, Filter::compare("age", CompareOp::Ge, 21));
        assert!(Condition::new("age", "??", 21).into_filter().is_err());
    }
}
