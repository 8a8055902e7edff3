//! # Quarry
//!
//! An async ORM core: model metadata, a query builder that compiles to
//! MySQL, PostgreSQL or SQLite, a TTL result cache, repositories with
//! hooks, scopes and soft deletes, closure-scoped transactions with
//! savepoints, and additive schema migration.
//!
//! Quarry provides:
//! - Models described in code through [`Model::schema`]
//! - Deferred-error query building, compiled to parameterized SQL
//! - Connection pooling with statement timeouts
//! - A built-in SQLite driver; other databases plug in through
//!   [`ConnectionManager`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use quarry::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct User {
//!     id: Option<i64>,
//!     email: String,
//!     age: i64,
//! }
//!
//! impl Model for User {
//!     fn schema() -> ModelSchema<Self> {
//!         ModelSchema::<Self>::new()
//!             .column(Column::new("id", LogicalType::BigInt).primary_key().auto_increment())
//!             .column(Column::new("email", LogicalType::String).unique())
//!             .column(Column::new("age", LogicalType::Integer))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), QueryError> {
//!     let config = DatabaseConfig::builder()
//!         .url("sqlite://app.db")
//!         .auto_create_database(true)
//!         .auto_migrate(true)
//!         .build()?;
//!     let orm = OrmBuilder::new(config).register::<User>().connect().await?;
//!
//!     let mut user = User { id: None, email: "ada@example.com".into(), age: 36 };
//!     orm.repository::<User>()?.save(&mut user).await?;
//!
//!     let adults: Vec<User> = orm
//!         .query::<User>()?
//!         .r#where("age", ">=", 18)
//!         .order_by("email", Direction::Asc)
//!         .find()
//!         .await?;
//!
//!     orm.transaction(|tx| async move {
//!         tx.query::<User>()?.where_eq("email", "ada@example.com").increment("age", 1).await?;
//!         Ok::<_, QueryError>(())
//!     })
//!     .await?;
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

mod builder;
mod orm;

pub use builder::{OrmBuilder, quick_setup_from_env};
pub use orm::Orm;

/// The ORM core.
pub use quarry_query as core;

/// Schema management.
pub use quarry_migrate as migrate;

/// The SQLite driver.
pub use quarry_sqlite as sqlite;

// Re-export key types at the crate root
pub use quarry_migrate::{DdlGenerator, MigrationError, MigrationReport, SchemaManager};
pub use quarry_query::{
    CacheDirective, Column, ColumnDefault, CompareOp, CompiledQuery, Condition, ConnectionManager, DatabaseConfig,
    Dialect, DialectFactory, DialectKind, Direction, DriverConnection, ErrorCode, ExecuteResult, Filter, HookEvent,
    IsolationLevel, LogicalType, Model, ModelMeta, ModelSchema, PoolOptions, Query, QueryError, QueryLog,
    QueryResult, RawQuery, Record, Registry, Repository, ResultCache, Session, TransactionOptions, TrashedMode, Value,
};
pub use quarry_sqlite::{SqliteConfig, SqliteManager};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::{Orm, OrmBuilder};
    pub use quarry_query::prelude::*;
    pub use quarry_query::{DatabaseConfig, TrashedMode};
}
