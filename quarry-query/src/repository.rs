//! Per-model repositories.
//!
//! A [`Repository`] works on whole entities: it decides between INSERT and
//! UPDATE, fills in generated keys, runs lifecycle hooks and applies soft
//! deletes. Set-based work goes through [`Repository::query`].
//!
//! ```rust,ignore
//! let users = session.repository::<User>()?;
//!
//! let mut ada = User { id: 0, name: "Ada".into(), ..Default::default() };
//! users.save(&mut ada).await?;          // INSERT, ada.id is now set
//! ada.name = "Ada Lovelace".into();
//! users.save(&mut ada).await?;          // UPDATE
//!
//! let active = users.scope("active").find_all().await?;
//! users.chunk(500, |batch| async move {
//!     index(batch).await
//! }).await?;
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::error::{QueryError, QueryResult};
use crate::metadata::{Column, HookEvent, Model, ModelMeta};
use crate::query::{Direction, Query};
use crate::record::Record;
use crate::session::Session;
use crate::sql::{CompiledQuery, SqlWriter};
use crate::value::Value;

/// Rows fetched per page by [`Repository::each`].
const EACH_PAGE_SIZE: usize = 100;

/// Entity-level operations for model `T`.
pub struct Repository<T> {
    session: Session,
    meta: Arc<ModelMeta>,
    scopes: Vec<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            meta: self.meta.clone(),
            scopes: self.scopes.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("model", &self.meta.name())
            .field("scopes", &self.scopes)
            .finish()
    }
}

impl<T: Model> Repository<T> {
    pub(crate) fn new(session: Session, meta: Arc<ModelMeta>) -> Self {
        Self {
            session,
            meta,
            scopes: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Model metadata.
    pub fn meta(&self) -> &ModelMeta {
        &self.meta
    }

    /// A repository whose queries also apply the named scope.
    pub fn scope(&self, name: impl Into<String>) -> Self {
        let mut scoped = self.clone();
        scoped.scopes.push(name.into());
        scoped
    }

    /// A query with this repository's scopes applied.
    pub fn query(&self) -> Query<T> {
        self.scopes
            .iter()
            .fold(Query::new(self.session.clone(), self.meta.clone()), |query, scope| query.scope(scope))
    }

    /// Insert when the primary key is unset (null, zero or empty),
    /// update otherwise. A caller-assigned key that is not in the table yet
    /// is inserted.
    pub async fn save(&self, entity: &mut T) -> QueryResult<()> {
        let record = self.to_record(entity)?;
        let key = record.get(self.meta.primary_key());
        if is_unset(key) {
            return self.insert(entity).await;
        }
        if !self.meta.primary_key_column().is_generated() {
            let stored = Query::<T>::new(self.session.clone(), self.meta.clone())
                .with_trashed()
                .where_eq(self.meta.primary_key(), key.map(Value::from_json).unwrap_or(Value::Null))
                .exists()
                .await?;
            if !stored {
                return self.insert(entity).await;
            }
        }
        self.update(entity).await
    }

    /// Insert a new row. Generated keys and database defaults are written
    /// back into `entity` where the dialect can return them.
    pub async fn insert(&self, entity: &mut T) -> QueryResult<()> {
        self.meta.run_hooks(HookEvent::BeforeCreate, entity)?;
        let record = self.to_record(entity)?;
        let include_pk = !self.meta.primary_key_column().is_generated()
            || !is_unset(record.get(self.meta.primary_key()));
        let columns = self.insert_columns(std::slice::from_ref(&record), include_pk);
        let returning = self.session.dialect().capabilities().supports_returning;
        let compiled = self.compile_insert(&columns, std::slice::from_ref(&record), returning)?;

        if returning {
            let mut rows = self.session.fetch(&compiled, None).await.map_err(|e| self.tag(e))?;
            if let Some(mut row) = rows.pop() {
                row.normalize(&self.meta);
                write_back(entity, row)?;
            }
        } else {
            let result = self.session.execute(&compiled, None).await.map_err(|e| self.tag(e))?;
            if let (Some(id), false) = (result.last_insert_id, include_pk) {
                let mut generated = Record::new();
                generated.insert(self.meta.primary_key(), JsonValue::from(id));
                write_back(entity, generated)?;
            }
        }
        debug!(model = self.meta.name(), "Inserted entity");
        self.meta.run_hooks(HookEvent::AfterCreate, entity)
    }

    /// Update every column of an existing row. The soft-delete column is
    /// left alone; use [`restore`](Self::restore) or
    /// [`soft_delete`](Self::soft_delete).
    pub async fn update(&self, entity: &mut T) -> QueryResult<()> {
        let pk_value = self.require_key(entity)?;
        self.meta.run_hooks(HookEvent::BeforeUpdate, entity)?;
        let record = self.to_record(entity)?;

        let dialect = self.session.dialect().clone();
        let mut w = SqlWriter::new(dialect.as_ref());
        w.push("UPDATE ").push_identifier(self.meta.table()).push(" SET ");
        let mut first = true;
        for column in self.meta.columns() {
            let skip = column.primary_key
                || Some(column.name.as_str()) == self.meta.soft_delete_column()
                || !record.contains(&column.name);
            if skip {
                continue;
            }
            if !first {
                w.push(", ");
            }
            first = false;
            w.push_identifier(&column.name).push(" = ");
            w.push_param(column_value(&record, column));
        }
        if first {
            return Err(QueryError::invalid_operation(format!(
                "{} has no columns to update",
                self.meta.name()
            )));
        }
        self.push_key_predicate(&mut w, pk_value);

        let result = self.session.execute(&w.finish(), None).await.map_err(|e| self.tag(e))?;
        if result.rows_affected == 0 {
            return Err(QueryError::not_found(self.meta.name()));
        }
        debug!(model = self.meta.name(), "Updated entity");
        self.meta.run_hooks(HookEvent::AfterUpdate, entity)
    }

    /// Delete an entity: soft when the model has a soft-delete column.
    pub async fn delete(&self, entity: &mut T) -> QueryResult<()> {
        if self.meta.soft_delete_column().is_some() {
            self.soft_delete(entity).await
        } else {
            self.force_delete(entity).await
        }
    }

    /// Stamp the soft-delete column with the current time.
    pub async fn soft_delete(&self, entity: &mut T) -> QueryResult<()> {
        let now = Value::from(chrono::Utc::now());
        self.set_deleted_at(entity, now, HookEvent::BeforeDelete, HookEvent::AfterDelete)
            .await
    }

    /// Clear the soft-delete column.
    pub async fn restore(&self, entity: &mut T) -> QueryResult<()> {
        self.set_deleted_at(entity, Value::Null, HookEvent::BeforeUpdate, HookEvent::AfterUpdate)
            .await
    }

    async fn set_deleted_at(&self, entity: &mut T, value: Value, before: HookEvent, after: HookEvent) -> QueryResult<()> {
        let column = self.soft_delete_column()?.to_string();
        let pk_value = self.require_key(entity)?;
        self.meta.run_hooks(before, entity)?;

        let dialect = self.session.dialect().clone();
        let mut w = SqlWriter::new(dialect.as_ref());
        w.push("UPDATE ")
            .push_identifier(self.meta.table())
            .push(" SET ")
            .push_identifier(&column)
            .push(" = ");
        w.push_param(value.clone());
        self.push_key_predicate(&mut w, pk_value);

        let result = self.session.execute(&w.finish(), None).await.map_err(|e| self.tag(e))?;
        if result.rows_affected == 0 {
            return Err(QueryError::not_found(self.meta.name()));
        }
        let mut changed = Record::new();
        changed.insert(column, value.to_json());
        write_back(entity, changed)?;
        self.meta.run_hooks(after, entity)
    }

    /// Remove the row permanently, soft-delete column or not.
    pub async fn force_delete(&self, entity: &mut T) -> QueryResult<()> {
        let pk_value = self.require_key(entity)?;
        self.meta.run_hooks(HookEvent::BeforeDelete, entity)?;

        let dialect = self.session.dialect().clone();
        let mut w = SqlWriter::new(dialect.as_ref());
        w.push("DELETE FROM ").push_identifier(self.meta.table());
        self.push_key_predicate(&mut w, pk_value);

        let result = self.session.execute(&w.finish(), None).await.map_err(|e| self.tag(e))?;
        if result.rows_affected == 0 {
            return Err(QueryError::not_found(self.meta.name()));
        }
        debug!(model = self.meta.name(), "Deleted entity");
        self.meta.run_hooks(HookEvent::AfterDelete, entity)
    }

    /// Find by primary key. Soft-deleted rows are not returned.
    pub async fn find(&self, id: impl Into<Value>) -> QueryResult<Option<T>> {
        self.query().where_eq(self.meta.primary_key(), id).first().await
    }

    /// Find by primary key and eager-load relations.
    pub async fn find_with_relations<S: AsRef<str>>(&self, id: impl Into<Value>, relations: &[S]) -> QueryResult<Option<T>> {
        self.query()
            .with(relations.iter().map(|r| r.as_ref().to_string()))
            .where_eq(self.meta.primary_key(), id)
            .first()
            .await
    }

    /// Every row in scope.
    pub async fn find_all(&self) -> QueryResult<Vec<T>> {
        self.query().find().await
    }

    /// Only soft-deleted rows.
    pub async fn find_trashed(&self) -> QueryResult<Vec<T>> {
        self.soft_delete_column()?;
        self.query().only_trashed().find().await
    }

    /// Number of rows in scope.
    pub async fn count(&self) -> QueryResult<u64> {
        self.query().count().await
    }

    /// Whether a row with this primary key exists.
    pub async fn exists(&self, id: impl Into<Value>) -> QueryResult<bool> {
        self.query().where_eq(self.meta.primary_key(), id).exists().await
    }

    /// Atomically add `by` to `column` on every row in scope.
    pub async fn increment(&self, column: &str, by: i64) -> QueryResult<u64> {
        self.query().increment(column, by).await
    }

    /// Atomically subtract `by` from `column` on every row in scope.
    pub async fn decrement(&self, column: &str, by: i64) -> QueryResult<u64> {
        self.query().decrement(column, by).await
    }

    /// Insert many entities with a single multi-row INSERT.
    ///
    /// Every `before_create` hook runs before anything is written; one
    /// failing hook aborts the whole batch. Generated keys are written back
    /// in input order.
    pub async fn batch_create(&self, entities: &mut [T]) -> QueryResult<u64> {
        if entities.is_empty() {
            return Ok(0);
        }
        for entity in entities.iter_mut() {
            self.meta.run_hooks(HookEvent::BeforeCreate, entity)?;
        }
        let records = entities
            .iter()
            .map(|entity| self.to_record(entity))
            .collect::<QueryResult<Vec<_>>>()?;

        let pk = self.meta.primary_key().to_string();
        let explicit = records.iter().filter(|r| !is_unset(r.get(&pk))).count();
        let include_pk = if !self.meta.primary_key_column().is_generated() || explicit == records.len() {
            true
        } else if explicit == 0 {
            false
        } else {
            return Err(QueryError::invalid_operation(
                "batch mixes explicit and database-generated primary keys",
            )
            .with_model(self.meta.name()));
        };

        let columns = self.insert_columns(&records, include_pk);
        let returning = !include_pk && self.session.dialect().capabilities().supports_returning;
        let compiled = self.compile_insert_returning(&columns, &records, returning.then_some(pk.as_str()))?;

        let inserted = records.len() as u64;
        if returning {
            let rows = self.session.fetch(&compiled, None).await.map_err(|e| self.tag(e))?;
            let keys = generated_keys(&rows, &pk, entities.len()).map_err(|e| self.tag(e))?;
            self.assign_keys(entities, keys)?;
        } else {
            let result = self.session.execute(&compiled, None).await.map_err(|e| self.tag(e))?;
            if let (Some(first), false) = (result.last_insert_id, include_pk) {
                let keys = (0..inserted as i64).map(|i| first + i).collect();
                self.assign_keys(entities, keys)?;
            }
        }
        debug!(model = self.meta.name(), rows = inserted, "Batch inserted entities");

        for entity in entities.iter_mut() {
            self.meta.run_hooks(HookEvent::AfterCreate, entity)?;
        }
        Ok(inserted)
    }

    /// Visit every row in scope in primary-key order, `size` rows at a
    /// time. Paging is keyed on the primary key, so rows inserted behind the
    /// cursor are not revisited. Stops at the first error.
    pub async fn chunk<F, Fut>(&self, size: usize, mut f: F) -> QueryResult<()>
    where
        F: FnMut(Vec<T>) -> Fut,
        Fut: Future<Output = QueryResult<()>>,
    {
        if size == 0 {
            return Err(QueryError::invalid_parameter("chunk size must be at least 1"));
        }
        let mut cursor: Option<JsonValue> = None;
        loop {
            let records = self.page_after(cursor.as_ref(), size).await?;
            let fetched = records.len();
            if fetched == 0 {
                return Ok(());
            }
            cursor = records.last().and_then(|r| r.get(self.meta.primary_key())).cloned();
            let batch = records
                .into_iter()
                .map(Record::decode)
                .collect::<QueryResult<Vec<T>>>()?;
            f(batch).await?;
            if fetched < size {
                return Ok(());
            }
        }
    }

    /// Visit every row in scope one at a time, in primary-key order.
    pub async fn each<F, Fut>(&self, mut f: F) -> QueryResult<()>
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = QueryResult<()>>,
    {
        let mut cursor: Option<JsonValue> = None;
        loop {
            let records = self.page_after(cursor.as_ref(), EACH_PAGE_SIZE).await?;
            let fetched = records.len();
            if fetched == 0 {
                return Ok(());
            }
            cursor = records.last().and_then(|r| r.get(self.meta.primary_key())).cloned();
            for record in records {
                f(record.decode()?).await?;
            }
            if fetched < EACH_PAGE_SIZE {
                return Ok(());
            }
        }
    }

    async fn page_after(&self, cursor: Option<&JsonValue>, size: usize) -> QueryResult<Vec<Record>> {
        let pk = self.meta.primary_key();
        let mut query = self.query();
        query.parts.order.clear();
        let mut query = query.order_by(pk, Direction::Asc).limit(size as u64);
        if let Some(after) = cursor {
            query = query.r#where(pk, ">", Value::from_json(after));
        }
        query.find_records().await
    }

    fn to_record(&self, entity: &T) -> QueryResult<Record> {
        let json = serde_json::to_value(entity)
            .map_err(|e| QueryError::serialization(e.to_string()).with_model(self.meta.name()))?;
        Record::from_json(json)
    }

    fn require_key(&self, entity: &T) -> QueryResult<Value> {
        let record = self.to_record(entity)?;
        match record.get(self.meta.primary_key()) {
            value if is_unset(value) => Err(QueryError::invalid_operation(format!(
                "{} has no primary key value; save it first",
                self.meta.name()
            ))),
            Some(value) => Ok(Value::from_json(value)),
            None => Err(QueryError::internal("primary key vanished")),
        }
    }

    fn soft_delete_column(&self) -> QueryResult<&str> {
        self.meta.soft_delete_column().ok_or_else(|| {
            QueryError::invalid_operation(format!("{} does not use soft deletes", self.meta.name()))
        })
    }

    // Columns to insert: skip the generated key unless supplied, and
    // columns no record provides so database defaults apply.
    fn insert_columns<'m>(&'m self, records: &[Record], include_pk: bool) -> Vec<&'m Column> {
        self.meta
            .columns()
            .iter()
            .filter(|column| {
                if column.primary_key && !include_pk {
                    return false;
                }
                let provided = records
                    .iter()
                    .any(|r| r.get(&column.name).is_some_and(|v| !v.is_null()));
                let present = records.iter().any(|r| r.contains(&column.name));
                provided || (present && column.default.is_none())
            })
            .collect()
    }

    fn compile_insert(&self, columns: &[&Column], records: &[Record], returning: bool) -> QueryResult<CompiledQuery> {
        let names = self.meta.column_names();
        let list: Vec<&str> = names.iter().map(String::as_str).collect();
        self.write_insert(columns, records, returning.then_some(list.as_slice()))
    }

    fn compile_insert_returning(&self, columns: &[&Column], records: &[Record], key: Option<&str>) -> QueryResult<CompiledQuery> {
        let list = key.map(|k| vec![k]);
        self.write_insert(columns, records, list.as_deref())
    }

    fn write_insert(&self, columns: &[&Column], records: &[Record], returning: Option<&[&str]>) -> QueryResult<CompiledQuery> {
        let dialect = self.session.dialect().clone();
        let mut w = SqlWriter::new(dialect.as_ref());
        w.push("INSERT INTO ").push_identifier(self.meta.table());
        if columns.is_empty() {
            if records.len() > 1 {
                return Err(QueryError::invalid_operation(
                    "multi-row insert needs at least one column value",
                ));
            }
            w.push(" DEFAULT VALUES");
        } else {
            w.push(" (");
            for (i, column) in columns.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push_identifier(&column.name);
            }
            w.push(") VALUES ");
            for (row, record) in records.iter().enumerate() {
                if row > 0 {
                    w.push(", ");
                }
                w.push("(");
                for (i, column) in columns.iter().enumerate() {
                    if i > 0 {
                        w.push(", ");
                    }
                    w.push_param(column_value(record, column));
                }
                w.push(")");
            }
        }
        if let Some(list) = returning {
            w.push(" RETURNING ");
            for (i, column) in list.iter().enumerate() {
                if i > 0 {
                    w.push(", ");
                }
                w.push_identifier(column);
            }
        }
        Ok(w.finish())
    }

    fn push_key_predicate(&self, w: &mut SqlWriter<'_>, key: Value) {
        w.push(" WHERE ").push_identifier(self.meta.primary_key()).push(" = ");
        w.push_param(key);
    }

    fn assign_keys(&self, entities: &mut [T], keys: Vec<i64>) -> QueryResult<()> {
        for (entity, key) in entities.iter_mut().zip(keys) {
            let mut generated = Record::new();
            generated.insert(self.meta.primary_key(), JsonValue::from(key));
            write_back(entity, generated)?;
        }
        Ok(())
    }

    fn tag(&self, err: QueryError) -> QueryError {
        if err.context.model.is_none() {
            err.with_model(self.meta.name())
        } else {
            err
        }
    }
}

/// Keys from a `RETURNING` result, in `VALUES` order. Every inserted row
/// must come back with a decodable key.
fn generated_keys(rows: &[Record], pk: &str, expected: usize) -> QueryResult<Vec<i64>> {
    let mut keys: Vec<i64> = rows.iter().filter_map(|row| row.get_i64(pk)).collect();
    if keys.len() != expected {
        return Err(QueryError::internal(format!(
            "insert returned {} generated keys for {} rows",
            keys.len(),
            expected
        )));
    }
    // RETURNING order is unspecified; generated keys ascend in VALUES order.
    keys.sort_unstable();
    Ok(keys)
}

fn column_value(record: &Record, column: &Column) -> Value {
    record.get(&column.name).map(Value::from_json).unwrap_or(Value::Null)
}

/// Whether a primary-key value means "not yet persisted".
fn is_unset(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => true,
        Some(JsonValue::Number(n)) => n.as_i64() == Some(0) || n.as_u64() == Some(0),
        Some(JsonValue::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

// Overlay `changes` onto the entity's serialized form and decode it back,
// so fields that are not columns survive.
fn write_back<T: Model>(entity: &mut T, changes: Record) -> QueryResult<()> {
    let mut current = match serde_json::to_value(&*entity) {
        Ok(JsonValue::Object(map)) => map,
        Ok(_) => return Err(QueryError::serialization("entity did not serialize to an object")),
        Err(e) => return Err(QueryError::serialization(e.to_string())),
    };
    for (column, value) in changes {
        current.insert(column, value);
    }
    *entity = Record::from_json(JsonValue::Object(current))?.decode()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    #[test]
    fn test_is_unset() {
        assert!(is_unset(None));
        assert!(is_unset(Some(&json!(null))));
        assert!(is_unset(Some(&json!(0))));
        assert!(is_unset(Some(&json!(""))));
        assert!(!is_unset(Some(&json!(5))));
        assert!(!is_unset(Some(&json!("a1"))));
    }

    fn returned(key: JsonValue) -> Record {
        let mut row = Record::new();
        row.insert("id", key);
        row
    }

    #[test]
    fn test_generated_keys_sorted() {
        let rows = vec![returned(json!(12)), returned(json!(10)), returned(json!(11))];
        assert_eq!(generated_keys(&rows, "id", 3).unwrap(), vec![10, 11, 12]);
    }

    #[test]
    fn test_generated_keys_must_cover_every_row() {
        let rows = vec![returned(json!(10)), returned(json!(null)), returned(json!(12))];
        let err = generated_keys(&rows, "id", 3).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Internal);

        let err = generated_keys(&[returned(json!(10))], "id", 2).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::Internal);
    }

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Note {
        id: i64,
        body: String,
        #[serde(default)]
        tags: Vec<String>,
    }

    impl Model for Note {
        fn schema() -> crate::metadata::ModelSchema<Self> {
            crate::metadata::ModelSchema::<Self>::new()
        }
    }

    #[test]
    fn test_write_back_keeps_non_column_fields() {
        let mut note = Note {
            id: 0,
            body: "hi".into(),
            tags: vec!["x".into()],
        };
        let mut changes = Record::new();
        changes.insert("id", json!(9));
        write_back(&mut note, changes).unwrap();
        assert_eq!(
            note,
            Note {
                id: 9,
                body: "hi".into(),
                tags: vec!["x".into()],
            }
        );
    }
}
