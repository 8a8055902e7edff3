//! Fluent query builder.
//!
//! A [`Query`] is built by value: every call consumes the builder and
//! returns it, and a terminator (`find`, `first`, `count`, ...) consumes it
//! for good. Builder mistakes such as an unknown operator or scope do not
//! panic or return early; they are remembered and reported by the
//! terminator.
//!
//! ```rust,ignore
//! let adults = session
//!     .query::<User>()?
//!     .r#where("age", ">=", 18)
//!     .where_or(vec![
//!         Condition::new("role", "=", "admin"),
//!         Condition::new("role", "=", "owner"),
//!     ])
//!     .order_by("name", Direction::Asc)
//!     .limit(20)
//!     .cache(60)
//!     .find()
//!     .await?;
//! ```

mod compile;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;

use crate::error::{QueryError, QueryResult};
use crate::filter::{CompareOp, Condition, Filter};
use crate::metadata::{Model, ModelMeta};
use crate::record::Record;
use crate::relations;
use crate::session::Session;
use crate::sql::CompiledQuery;
use crate::value::Value;

pub use compile::{Direction, SetOperator, TrashedMode};
pub(crate) use compile::{OrderTerm, QueryParts, RelationCount};

/// Whether a read goes through the result cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheDirective {
    /// Always hit the database.
    #[default]
    Disabled,
    /// Serve from and populate the cache, keeping entries this long.
    Ttl(Duration),
}

/// A query against model `T`.
pub struct Query<T> {
    session: Session,
    pub(crate) parts: QueryParts,
    cache: CacheDirective,
    timeout: Option<Duration>,
    eager: Vec<String>,
    error: Option<QueryError>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Query<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            parts: self.parts.clone(),
            cache: self.cache,
            timeout: self.timeout,
            eager: self.eager.clone(),
            error: self.error.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("model", &self.parts.meta.name())
            .field("parts", &self.parts)
            .field("cache", &self.cache)
            .field("timeout", &self.timeout)
            .field("eager", &self.eager)
            .field("error", &self.error)
            .finish()
    }
}

impl<T: Model> Query<T> {
    pub(crate) fn new(session: Session, meta: Arc<ModelMeta>) -> Self {
        Self {
            session,
            parts: QueryParts::new(meta),
            cache: CacheDirective::Disabled,
            timeout: None,
            eager: Vec::new(),
            error: None,
            _marker: PhantomData,
        }
    }

    /// Metadata of the queried model.
    pub fn meta(&self) -> &ModelMeta {
        &self.parts.meta
    }

    // Keep the first builder error; later calls still apply so the
    // descriptor stays inspectable.
    fn fail(mut self, err: QueryError) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }

    fn push(mut self, filter: Filter) -> Self {
        self.parts.filters.push(filter);
        self
    }

    /// `column op value`. Operators: `=`, `!=`, `<>`, `<`, `<=`, `>`, `>=`,
    /// `LIKE`, `NOT LIKE`.
    pub fn r#where(self, column: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        match op.parse::<CompareOp>() {
            Ok(op) => self.push(Filter::compare(column, op, value)),
            Err(err) => {
                let err = err.with_model(self.parts.meta.name());
                self.fail(err)
            }
        }
    }

    /// `column = value`.
    pub fn where_eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(Filter::eq(column, value))
    }

    /// Parenthesized OR group of conditions.
    pub fn where_or(self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        let group: QueryResult<Vec<Filter>> = conditions.into_iter().map(Condition::into_filter).collect();
        match group {
            Ok(group) => self.push(Filter::Or(group)),
            Err(err) => self.fail(err),
        }
    }

    /// `column IN (...)`; an empty list matches nothing.
    pub fn where_in<V: Into<Value>>(self, column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        self.push(Filter::is_in(column, values))
    }

    /// `column NOT IN (...)`; an empty list matches everything.
    pub fn where_not_in<V: Into<Value>>(self, column: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        self.push(Filter::not_in(column, values))
    }

    /// `column BETWEEN low AND high`.
    pub fn where_between(self, column: impl Into<String>, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.push(Filter::between(column, low, high))
    }

    /// `column IS NULL`.
    pub fn where_null(self, column: impl Into<String>) -> Self {
        self.push(Filter::IsNull(column.into()))
    }

    /// `column IS NOT NULL`.
    pub fn where_not_null(self, column: impl Into<String>) -> Self {
        self.push(Filter::IsNotNull(column.into()))
    }

    /// `column LIKE pattern`.
    pub fn where_like(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.push(Filter::like(column, pattern))
    }

    /// A verbatim SQL fragment with `?` placeholders.
    pub fn where_raw(self, sql: impl Into<String>, params: Vec<Value>) -> Self {
        self.push(Filter::raw(sql, params))
    }

    /// Dialect full-text match.
    pub fn where_full_text(self, column: impl Into<String>, term: impl Into<String>) -> Self {
        self.push(Filter::FullText {
            column: column.into(),
            term: term.into(),
        })
    }

    /// Add an arbitrary predicate tree.
    pub fn filter(self, filter: Filter) -> Self {
        self.push(filter)
    }

    /// Restrict the selected columns.
    pub fn select<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.parts.select = columns.into_iter().map(Into::into).collect();
        self
    }

    /// `SELECT DISTINCT`.
    pub fn distinct(mut self) -> Self {
        self.parts.distinct = true;
        self
    }

    /// Append an ORDER BY term. Accepts model columns and `with_count`
    /// aliases.
    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.parts.order.push(OrderTerm::Column(column.into(), direction));
        self
    }

    /// Order randomly.
    pub fn order_by_random(mut self) -> Self {
        self.parts.order.push(OrderTerm::Random);
        self
    }

    /// Maximum number of rows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.parts.limit = Some(limit);
        self
    }

    /// Rows to skip.
    pub fn offset(mut self, offset: u64) -> Self {
        self.parts.offset = Some(offset);
        self
    }

    /// Select the number of related rows as `<relation>_count`.
    pub fn with_count(mut self, relation: &str) -> Self {
        let resolved = self.parts.meta.relation(relation).cloned().and_then(|rel| {
            let target = self
                .session
                .registry()
                .lookup_id(rel.target)
                .ok_or_else(|| QueryError::model_not_registered(&rel.target_name))?;
            Ok(RelationCount {
                alias: format!("{}_count", rel.name),
                kind: rel.kind,
                foreign_key: rel.foreign_key,
                target,
            })
        });
        match resolved {
            Ok(count) => {
                self.parts.counts.push(count);
                self
            }
            Err(err) => self.fail(err),
        }
    }

    /// Eager-load relations into each result under the relation's name.
    pub fn with<S: Into<String>>(mut self, relations: impl IntoIterator<Item = S>) -> Self {
        self.eager.extend(relations.into_iter().map(Into::into));
        self
    }

    /// Lock selected rows (`FOR UPDATE`) where the dialect supports it.
    pub fn for_update(mut self) -> Self {
        self.parts.lock = true;
        self
    }

    /// `UNION` with another query selecting the same columns.
    pub fn union<U: Model>(self, other: Query<U>) -> Self {
        self.set_operation(SetOperator::Union, other)
    }

    /// `UNION ALL` with another query selecting the same columns.
    pub fn union_all<U: Model>(self, other: Query<U>) -> Self {
        self.set_operation(SetOperator::UnionAll, other)
    }

    fn set_operation<U: Model>(mut self, op: SetOperator, other: Query<U>) -> Self {
        if let Some(err) = other.error {
            return self.fail(err);
        }
        self.parts.set_ops.push((op, other.parts));
        self
    }

    /// Cache results for `ttl_secs` seconds. The last of `cache` and
    /// `without_cache` wins.
    pub fn cache(mut self, ttl_secs: u64) -> Self {
        self.cache = CacheDirective::Ttl(Duration::from_secs(ttl_secs));
        self
    }

    /// Bypass the result cache.
    pub fn without_cache(mut self) -> Self {
        self.cache = CacheDirective::Disabled;
        self
    }

    /// Current cache directive.
    pub fn cache_directive(&self) -> CacheDirective {
        self.cache
    }

    /// Include soft-deleted rows.
    pub fn with_trashed(mut self) -> Self {
        self.parts.trashed = TrashedMode::Include;
        self
    }

    /// Only soft-deleted rows.
    pub fn only_trashed(mut self) -> Self {
        self.parts.trashed = TrashedMode::Only;
        self
    }

    /// Apply a named scope declared on the model.
    pub fn scope(self, name: &str) -> Self {
        match self.parts.meta.scope::<T>(name) {
            Some(scope) => scope(self),
            None => {
                let err = QueryError::unknown_scope(self.parts.meta.name(), name);
                self.fail(err)
            }
        }
    }

    /// Per-statement timeout, overriding the session default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn check(&self) -> QueryResult<()> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Compile the SELECT this query would run.
    pub fn compile(&self) -> QueryResult<CompiledQuery> {
        self.check()?;
        self.parts.compile_select(self.session.dialect().as_ref())
    }

    /// Run and decode into `T`.
    pub async fn find(self) -> QueryResult<Vec<T>> {
        self.find_records()
            .await?
            .into_iter()
            .map(Record::decode)
            .collect()
    }

    /// Run and return generic records.
    pub async fn find_records(self) -> QueryResult<Vec<Record>> {
        self.check()?;
        let meta = self.parts.meta.clone();
        for name in &self.eager {
            meta.relation(name)?;
        }
        let compiled = self.parts.compile_select(self.session.dialect().as_ref())?;

        let ttl = match self.cache {
            CacheDirective::Ttl(ttl) if !self.session.in_transaction() => Some(ttl),
            _ => None,
        };
        let key = ttl.map(|_| {
            let mut key = compiled.fingerprint();
            for relation in &self.eager {
                key.push('\u{1e}');
                key.push_str(relation);
            }
            key
        });
        if let Some(key) = &key {
            if let Some(rows) = self.session.cache().get(key) {
                return Ok(rows.as_ref().clone());
            }
        }

        let mut rows = self.session.fetch(&compiled, self.timeout).await?;
        for row in &mut rows {
            row.normalize(&meta);
        }
        relations::load(&self.session, &meta, &mut rows, &self.eager).await?;

        if let (Some(key), Some(ttl)) = (key, ttl) {
            self.session.cache().insert(key, rows.clone(), ttl);
        }
        Ok(rows)
    }

    /// First matching row.
    pub async fn first(self) -> QueryResult<Option<T>> {
        Ok(self.limit(1).find().await?.into_iter().next())
    }

    /// Values of one column.
    pub async fn pluck(self, column: &str) -> QueryResult<Vec<Value>> {
        let column = column.to_string();
        let rows = self.select([column.clone()]).find_records().await?;
        Ok(rows
            .iter()
            .map(|row| row.get(&column).map(Value::from_json).unwrap_or(Value::Null))
            .collect())
    }

    /// Number of matching rows.
    pub async fn count(self) -> QueryResult<u64> {
        self.check()?;
        let compiled = self.parts.compile_count(self.session.dialect().as_ref())?;
        let rows = self.session.fetch(&compiled, self.timeout).await?;
        Ok(scalar(&rows, "cnt").max(0) as u64)
    }

    /// Whether any row matches.
    pub async fn exists(self) -> QueryResult<bool> {
        self.check()?;
        let compiled = self.parts.compile_exists(self.session.dialect().as_ref())?;
        let rows = self.session.fetch(&compiled, self.timeout).await?;
        Ok(scalar(&rows, "present") != 0)
    }

    /// Atomically add `by` to `column` on every matching row.
    pub async fn increment(self, column: &str, by: i64) -> QueryResult<u64> {
        self.check()?;
        let compiled = self
            .parts
            .compile_increment(self.session.dialect().as_ref(), column, by)?;
        Ok(self.session.execute(&compiled, self.timeout).await?.rows_affected)
    }

    /// Atomically subtract `by` from `column` on every matching row.
    pub async fn decrement(self, column: &str, by: i64) -> QueryResult<u64> {
        self.check()?;
        let compiled = self
            .parts
            .compile_decrement(self.session.dialect().as_ref(), column, by)?;
        Ok(self.session.execute(&compiled, self.timeout).await?.rows_affected)
    }

    /// Delete matching rows: soft when the model uses soft deletes.
    /// Lifecycle hooks do not run for bulk deletes.
    pub async fn delete(self) -> QueryResult<u64> {
        self.run_delete(false).await
    }

    /// Permanently delete matching rows.
    pub async fn force_delete(self) -> QueryResult<u64> {
        self.run_delete(true).await
    }

    async fn run_delete(self, force: bool) -> QueryResult<u64> {
        self.check()?;
        let compiled = self
            .parts
            .compile_delete(self.session.dialect().as_ref(), force, Value::from(chrono::Utc::now()))?;
        Ok(self.session.execute(&compiled, self.timeout).await?.rows_affected)
    }
}

fn scalar(rows: &[Record], column: &str) -> i64 {
    rows.first()
        .and_then(|row| match row.get(column) {
            Some(JsonValue::String(s)) => s.parse().ok(),
            _ => row.get_i64(column),
        })
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_reads_numbers_bools_and_text() {
        let rows = vec![Record::from_json(serde_json::json!({"cnt": 4, "present": true, "s": "7"})).unwrap()];
        assert_eq!(scalar(&rows, "cnt"), 4);
        assert_eq!(scalar(&rows, "present"), 1);
        assert_eq!(scalar(&rows, "s"), 7);
        assert_eq!(scalar(&[], "cnt"), 0);
    }
}
