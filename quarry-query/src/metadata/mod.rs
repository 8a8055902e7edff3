//! Model metadata and the per-session registry.
//!
//! A model is any serde-serializable struct that implements [`Model`] and
//! describes its table through a [`ModelSchema`]. Registration turns the
//! schema into an immutable [`ModelMeta`] owned by the [`Registry`].
//!
//! ```rust
//! use quarry_query::metadata::{Column, LogicalType, Model, ModelSchema, Registry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct User {
//!     id: i64,
//!     name: String,
//!     email: String,
//! }
//!
//! impl Model for User {
//!     fn schema() -> ModelSchema<Self> {
//!         ModelSchema::<Self>::new()
//!             .table("users")
//!             .column(Column::new("id", LogicalType::BigInt).primary_key().auto_increment())
//!             .column(Column::new("name", LogicalType::String))
//!             .column(Column::new("email", LogicalType::String).unique())
//!     }
//! }
//!
//! let registry = Registry::new();
//! let meta = registry.register::<User>().unwrap();
//! assert_eq!(meta.table(), "users");
//! assert_eq!(meta.primary_key(), "id");
//! assert!(registry.register::<User>().is_err());
//! ```

mod registry;
mod schema;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{QueryError, QueryResult};
use crate::value::Value;

pub use registry::Registry;
pub use schema::{HookFn, ModelSchema, ScopeFn};

/// A type that maps to a database table.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Describe the table, columns, relations, hooks and scopes.
    fn schema() -> ModelSchema<Self>;
}

/// Database-independent column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicalType {
    /// 32-bit integer.
    Integer,
    /// 64-bit integer.
    BigInt,
    /// Double precision float.
    Float,
    /// Boolean.
    Boolean,
    /// Short string.
    String,
    /// Unbounded text.
    Text,
    /// Timestamp with time zone.
    DateTime,
    /// JSON document.
    Json,
    /// UUID.
    Uuid,
    /// Binary data.
    Bytes,
}

impl LogicalType {
    /// Whether the type is an integer type.
    pub fn is_integer(&self) -> bool {
        matches!(self, Self::Integer | Self::BigInt)
    }
}

/// Default value for a column in generated DDL.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnDefault {
    /// A literal value.
    Value(Value),
    /// The current timestamp at insert time.
    CurrentTimestamp,
    /// A raw SQL expression.
    Expression(String),
}

/// A declared column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Logical type.
    pub logical_type: LogicalType,
    /// Whether NULL is allowed.
    pub nullable: bool,
    /// Whether values must be unique.
    pub unique: bool,
    /// Whether an index is created for the column.
    pub indexed: bool,
    /// Default value.
    pub default: Option<ColumnDefault>,
    /// Whether this is the primary key.
    pub primary_key: bool,
    /// Whether the database generates the value.
    pub auto_increment: bool,
}

impl Column {
    /// Create a non-null column.
    pub fn new(name: impl Into<String>, logical_type: LogicalType) -> Self {
        Self {
            name: name.into(),
            logical_type,
            nullable: false,
            unique: false,
            indexed: false,
            default: None,
            primary_key: false,
            auto_increment: false,
        }
    }

    /// Mark as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Let the database generate values.
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    /// Allow NULL.
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Add a UNIQUE constraint.
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Create an index.
    pub fn index(mut self) -> Self {
        self.indexed = true;
        self
    }

    /// Set a literal default.
    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(ColumnDefault::Value(value.into()));
        self
    }

    /// Default to the insert timestamp.
    pub fn default_now(mut self) -> Self {
        self.default = Some(ColumnDefault::CurrentTimestamp);
        self
    }

    /// Set a raw SQL default expression.
    pub fn default_expression(mut self, expression: impl Into<String>) -> Self {
        self.default = Some(ColumnDefault::Expression(expression.into()));
        self
    }

    /// Whether the database supplies the value on insert.
    pub fn is_generated(&self) -> bool {
        self.primary_key && self.auto_increment
    }
}

/// Relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationKind {
    /// One-to-many: the foreign key lives on the target table.
    HasMany,
    /// Many-to-one: the foreign key lives on this table.
    BelongsTo,
}

/// A declared relation to another model.
#[derive(Debug, Clone)]
pub struct Relation {
    /// Relation (and JSON field) name.
    pub name: String,
    /// Cardinality.
    pub kind: RelationKind,
    /// Foreign key column.
    pub foreign_key: String,
    /// Target model type.
    pub target: TypeId,
    /// Target model name, for error messages.
    pub target_name: String,
}

/// Lifecycle events that hooks can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Before an INSERT.
    BeforeCreate,
    /// After an INSERT.
    AfterCreate,
    /// Before an UPDATE.
    BeforeUpdate,
    /// After an UPDATE.
    AfterUpdate,
    /// Before a DELETE (soft or hard).
    BeforeDelete,
    /// After a DELETE (soft or hard).
    AfterDelete,
}

impl HookEvent {
    /// Whether a failure aborts the write.
    pub fn is_before(&self) -> bool {
        matches!(self, Self::BeforeCreate | Self::BeforeUpdate | Self::BeforeDelete)
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BeforeCreate => "before_create",
            Self::AfterCreate => "after_create",
            Self::BeforeUpdate => "before_update",
            Self::AfterUpdate => "after_update",
            Self::BeforeDelete => "before_delete",
            Self::AfterDelete => "after_delete",
        };
        f.write_str(name)
    }
}

/// Registered, immutable description of a model.
pub struct ModelMeta {
    type_id: TypeId,
    name: String,
    table: String,
    columns: Vec<Column>,
    primary_key: usize,
    soft_delete: Option<String>,
    relations: Vec<Relation>,
    // HashMap<HookEvent, Vec<HookFn<T>>> for the concrete model type.
    hooks: Box<dyn Any + Send + Sync>,
    hook_events: Vec<HookEvent>,
    // ScopeFn<T> per name.
    scopes: IndexMap<String, Box<dyn Any + Send + Sync>>,
}

impl ModelMeta {
    /// Model type identity.
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Model name (the Rust type name without its path).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in declaration order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Check that a column exists, returning an invalid-column error if not.
    pub fn require_column(&self, name: &str) -> QueryResult<&Column> {
        self.column(name)
            .ok_or_else(|| QueryError::invalid_column(&self.name, name))
    }

    /// Primary-key column name.
    pub fn primary_key(&self) -> &str {
        &self.columns[self.primary_key].name
    }

    /// Primary-key column.
    pub fn primary_key_column(&self) -> &Column {
        &self.columns[self.primary_key]
    }

    /// Soft-delete column, if the model uses soft deletes.
    pub fn soft_delete_column(&self) -> Option<&str> {
        self.soft_delete.as_deref()
    }

    /// Declared relations.
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Look up a relation by name.
    pub fn relation(&self, name: &str) -> QueryResult<&Relation> {
        self.relations
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| QueryError::unknown_relation(&self.name, name))
    }

    /// Declared scope names.
    pub fn scope_names(&self) -> Vec<&str> {
        self.scopes.keys().map(|s| s.as_str()).collect()
    }

    /// Whether any hook is registered for `event`.
    pub fn has_hooks(&self, event: HookEvent) -> bool {
        self.hook_events.contains(&event)
    }

    /// Fetch a typed scope.
    pub(crate) fn scope<T: Model>(&self, name: &str) -> Option<ScopeFn<T>> {
        self.scopes
            .get(name)
            .and_then(|scope| scope.downcast_ref::<ScopeFn<T>>())
            .cloned()
    }

    /// Run every hook registered for `event` against `entity`, in order.
    ///
    /// The first failing hook stops the chain; its error is wrapped as
    /// `HookAborted`.
    pub(crate) fn run_hooks<T: Model>(&self, event: HookEvent, entity: &mut T) -> QueryResult<()> {
        if !self.has_hooks(event) {
            return Ok(());
        }
        let hooks = self
            .hooks
            .downcast_ref::<HashMap<HookEvent, Vec<HookFn<T>>>>()
            .ok_or_else(|| {
                QueryError::internal(format!("hook table type mismatch for {}", self.name))
            })?;
        if let Some(list) = hooks.get(&event) {
            for hook in list {
                hook(entity).map_err(|cause| QueryError::hook_aborted(&self.name, event, cause))?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ModelMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelMeta")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("columns", &self.columns)
            .field("primary_key", &self.primary_key())
            .field("soft_delete", &self.soft_delete)
            .field("relations", &self.relations)
            .field("hooks", &self.hook_events)
            .field("scopes", &self.scope_names())
            .finish()
    }
}

/// Short type name for a model: `my_app::models::User` becomes `User`.
pub(crate) fn model_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base).to_string()
}

/// Default table name: snake_case plural of the model name.
pub(crate) fn default_table_name(model: &str) -> String {
    let mut snake = String::with_capacity(model.len() + 4);
    for (i, ch) in model.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                snake.push('_');
            }
            snake.extend(ch.to_lowercase());
        } else {
            snake.push(ch);
        }
    }
    if let Some(stem) = snake.strip_suffix('y') {
        format!("{}ies", stem)
    } else if snake.ends_with('s') || snake.ends_with('x') {
        format!("{}es", snake)
    } else {
        format!("{}s", snake)
    }
}
