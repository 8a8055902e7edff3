//! Declarative model schema builder.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Arc;

use indexmap::IndexMap;

use super::{
    Column, HookEvent, Model, ModelMeta, Relation, RelationKind, default_table_name, model_name,
};
use crate::error::{QueryError, QueryResult};
use crate::query::Query;

/// A lifecycle hook. Returning an error from a `before_*` hook aborts the
/// write.
pub type HookFn<T> = Arc<dyn Fn(&mut T) -> QueryResult<()> + Send + Sync>;

/// A named, reusable query transform.
pub type ScopeFn<T> = Arc<dyn Fn(Query<T>) -> Query<T> + Send + Sync>;

/// Everything a model declares about its table.
///
/// Hooks and scopes are part of the declaration, so a registered model's
/// metadata never changes afterwards.
pub struct ModelSchema<T> {
    name: String,
    table: Option<String>,
    columns: Vec<Column>,
    soft_delete: Option<String>,
    relations: Vec<Relation>,
    hooks: HashMap<HookEvent, Vec<HookFn<T>>>,
    scopes: IndexMap<String, ScopeFn<T>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> Default for ModelSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Model> ModelSchema<T> {
    /// Start a schema. The table name defaults to the pluralized snake_case
    /// model name.
    pub fn new() -> Self {
        Self {
            name: model_name::<T>(),
            table: None,
            columns: Vec::new(),
            soft_delete: None,
            relations: Vec::new(),
            hooks: HashMap::new(),
            scopes: IndexMap::new(),
            _marker: PhantomData,
        }
    }

    /// Override the table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Append a column. Declaration order is DDL and SELECT order.
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Use `column` (a declared, nullable timestamp) as the soft-delete marker.
    pub fn soft_delete(mut self, column: impl Into<String>) -> Self {
        self.soft_delete = Some(column.into());
        self
    }

    /// Declare a one-to-many relation; `foreign_key` lives on `U`'s table.
    pub fn has_many<U: Model>(mut self, name: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.relations.push(Relation {
            name: name.into(),
            kind: RelationKind::HasMany,
            foreign_key: foreign_key.into(),
            target: TypeId::of::<U>(),
            target_name: model_name::<U>(),
        });
        self
    }

    /// Declare a many-to-one relation; `foreign_key` lives on this table.
    pub fn belongs_to<U: Model>(mut self, name: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.relations.push(Relation {
            name: name.into(),
            kind: RelationKind::BelongsTo,
            foreign_key: foreign_key.into(),
            target: TypeId::of::<U>(),
            target_name: model_name::<U>(),
        });
        self
    }

    /// Append a hook for `event`. Hooks run in declaration order.
    pub fn hook<F>(mut self, event: HookEvent, hook: F) -> Self
    where
        F: Fn(&mut T) -> QueryResult<()> + Send + Sync + 'static,
    {
        self.hooks.entry(event).or_default().push(Arc::new(hook));
        self
    }

    /// Hook run before an INSERT.
    pub fn before_create<F>(self, hook: F) -> Self
    where
        F: Fn(&mut T) -> QueryResult<()> + Send + Sync + 'static,
    {
        self.hook(HookEvent::BeforeCreate, hook)
    }

    /// Hook run after an INSERT.
    pub fn after_create<F>(self, hook: F) -> Self
    where
        F: Fn(&mut T) -> QueryResult<()> + Send + Sync + 'static,
    {
        self.hook(HookEvent::AfterCreate, hook)
    }

    /// Hook run before an UPDATE.
    pub fn before_update<F>(self, hook: F) -> Self
    where
        F: Fn(&mut T) -> QueryResult<()> + Send + Sync + 'static,
    {
        self.hook(HookEvent::BeforeUpdate, hook)
    }

    /// Hook run after an UPDATE.
    pub fn after_update<F>(self, hook: F) -> Self
    where
        F: Fn(&mut T) -> QueryResult<()> + Send + Sync + 'static,
    {
        self.hook(HookEvent::AfterUpdate, hook)
    }

    /// Hook run before a DELETE.
    pub fn before_delete<F>(self, hook: F) -> Self
    where
        F: Fn(&mut T) -> QueryResult<()> + Send + Sync + 'static,
    {
        self.hook(HookEvent::BeforeDelete, hook)
    }

    /// Hook run after a DELETE.
    pub fn after_delete<F>(self, hook: F) -> Self
    where
        F: Fn(&mut T) -> QueryResult<()> + Send + Sync + 'static,
    {
        self.hook(HookEvent::AfterDelete, hook)
    }

    /// Declare a named scope.
    pub fn scope<F>(mut self, name: impl Into<String>, scope: F) -> Self
    where
        F: Fn(Query<T>) -> Query<T> + Send + Sync + 'static,
    {
        self.scopes.insert(name.into(), Arc::new(scope));
        self
    }

    /// Validate the declaration and freeze it.
    pub(crate) fn into_meta(self) -> QueryResult<ModelMeta> {
        let invalid = |msg: String| QueryError::configuration(msg).with_model(&self.name);

        if self.columns.is_empty() {
            return Err(invalid(format!("Model {} declares no columns", self.name)));
        }

        let mut seen = HashSet::new();
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(invalid(format!(
                    "Model {} declares column '{}' twice",
                    self.name, column.name
                )));
            }
            if column.auto_increment && !(column.primary_key && column.logical_type.is_integer()) {
                return Err(invalid(format!(
                    "Column '{}' on {} is auto_increment but not an integer primary key",
                    column.name, self.name
                )));
            }
        }

        let keys: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.primary_key)
            .map(|(i, _)| i)
            .collect();
        let primary_key = match keys.as_slice() {
            [index] => *index,
            [] => return Err(invalid(format!("Model {} has no primary key", self.name))),
            _ => {
                return Err(invalid(format!(
                    "Model {} declares more than one primary key",
                    self.name
                )));
            }
        };

        if let Some(ref column) = self.soft_delete {
            match self.columns.iter().find(|c| &c.name == column) {
                Some(c) if c.nullable => {}
                Some(_) => {
                    return Err(invalid(format!(
                        "Soft-delete column '{}' on {} must be nullable",
                        column, self.name
                    )));
                }
                None => return Err(QueryError::invalid_column(&self.name, column)),
            }
        }

        let mut relation_names = HashSet::new();
        for relation in &self.relations {
            if !relation_names.insert(relation.name.as_str()) || seen.contains(relation.name.as_str()) {
                return Err(invalid(format!(
                    "Relation name '{}' on {} clashes with another field",
                    relation.name, self.name
                )));
            }
            if relation.kind == RelationKind::BelongsTo && !seen.contains(relation.foreign_key.as_str()) {
                return Err(QueryError::invalid_column(&self.name, &relation.foreign_key));
            }
        }

        let table = self
            .table
            .clone()
            .unwrap_or_else(|| default_table_name(&self.name));
        let hook_events = self.hooks.keys().copied().collect();
        let scopes = self
            .scopes
            .into_iter()
            .map(|(name, scope)| (name, Box::new(scope) as Box<dyn std::any::Any + Send + Sync>))
            .collect();

        Ok(ModelMeta {
            type_id: TypeId::of::<T>(),
            name: self.name,
            table,
            columns: self.columns,
            primary_key,
            soft_delete: self.soft_delete,
            relations: self.relations,
            hooks: Box::new(self.hooks),
            hook_events,
            scopes,
        })
    }
}
