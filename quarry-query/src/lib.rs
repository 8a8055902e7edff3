//! # quarry-query
//!
//! Core of the Quarry ORM: dialects, model metadata, the query builder and
//! compiler, the result cache, connection pooling, sessions, repositories
//! and transactions. Database drivers plug in through
//! [`connection::DriverConnection`] and [`connection::ConnectionManager`].
//!
//! ## Models
//!
//! ```rust
//! use quarry_query::{Column, LogicalType, Model, ModelSchema, Registry};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Post {
//!     id: i64,
//!     title: String,
//!     published: bool,
//!     deleted_at: Option<String>,
//! }
//!
//! impl Model for Post {
//!     fn schema() -> ModelSchema<Self> {
//!         ModelSchema::<Self>::new()
//!             .column(Column::new("id", LogicalType::BigInt).primary_key().auto_increment())
//!             .column(Column::new("title", LogicalType::String).index())
//!             .column(Column::new("published", LogicalType::Boolean).default_value(false))
//!             .column(Column::new("deleted_at", LogicalType::DateTime).nullable())
//!             .soft_delete("deleted_at")
//!             .scope("published", |q| q.where_eq("published", true))
//!     }
//! }
//!
//! let registry = Registry::new();
//! let meta = registry.register::<Post>().unwrap();
//! assert_eq!(meta.table(), "posts");
//! ```
//!
//! ## Filters
//!
//! ```rust
//! use quarry_query::{CompareOp, Filter, Value};
//!
//! let adults = Filter::compare("age", CompareOp::Ge, 18);
//! let staff = Filter::or([
//!     Filter::eq("role", "admin"),
//!     Filter::eq("role", "owner"),
//! ]);
//! let filter = Filter::and([adults, staff, Filter::IsNull("banned_at".into())]);
//! assert!(matches!(filter, Filter::And(ref parts) if parts.len() == 3));
//! assert_eq!(Value::from(18), Value::Int(18));
//! ```
//!
//! ## Queries
//!
//! ```rust,ignore
//! let recent: Vec<Post> = session
//!     .query::<Post>()?
//!     .scope("published")
//!     .where_like("title", "%rust%")
//!     .order_by("id", Direction::Desc)
//!     .limit(10)
//!     .cache(30)
//!     .find()
//!     .await?;
//! ```
//!
//! ## Logging
//!
//! Every statement is traced with `tracing`. Set `QUARRY_DEBUG=true` and
//! call [`logging::init`] (feature `tracing-subscriber`) for console output,
//! or record statements in memory through [`QueryLog`].

pub mod cache;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod filter;
pub mod logging;
pub mod metadata;
pub mod query;
pub mod query_log;
pub mod raw;
mod record;
mod relations;
pub mod repository;
pub mod session;
pub mod sql;
pub mod transaction;
mod value;

pub use cache::{CacheStats, ResultCache};
pub use connection::{
    ConnectionError, ConnectionManager, ConnectionString, DatabaseConfig, DriverConnection, EnvSource,
    ExecuteResult, MapEnvSource, Pool, PoolOptions, PoolStatus, PooledConnection, StdEnvSource,
};
pub use dialect::{Capabilities, Dialect, DialectFactory, DialectKind, MySql, Postgres, Sqlite};
pub use error::{ErrorCode, ErrorContext, QueryError, QueryResult};
pub use filter::{CompareOp, Condition, Filter};
pub use metadata::{
    Column, ColumnDefault, HookEvent, LogicalType, Model, ModelMeta, ModelSchema, Registry, Relation,
    RelationKind,
};
pub use query::{CacheDirective, Direction, Query, SetOperator, TrashedMode};
pub use query_log::{QueryEvent, QueryLog, QueryObserver};
pub use raw::RawQuery;
pub use record::Record;
pub use repository::Repository;
pub use session::{Session, SessionOptions};
pub use sql::CompiledQuery;
pub use transaction::{IsolationLevel, TransactionOptions};
pub use value::Value;

// Re-export logging utilities
pub use logging::{get_log_format, get_log_level, init as init_logging, init_debug, init_with_level, is_debug_enabled};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{ErrorCode, QueryError, QueryResult};
    pub use crate::filter::{Condition, Filter};
    pub use crate::metadata::{Column, LogicalType, Model, ModelSchema};
    pub use crate::query::{Direction, Query};
    pub use crate::record::Record;
    pub use crate::repository::Repository;
    pub use crate::session::Session;
    pub use crate::transaction::{IsolationLevel, TransactionOptions};
    pub use crate::value::Value;
}
