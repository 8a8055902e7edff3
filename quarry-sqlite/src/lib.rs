//! SQLite driver for the Quarry ORM.
//!
//! Statements run on `tokio-rusqlite`'s background thread. [`SqliteManager`]
//! plugs into [`quarry_query::Pool`]; an in-memory database is served by one
//! shared connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use quarry_query::{Pool, PoolOptions};
//! use quarry_sqlite::{SqliteConfig, SqliteManager};
//!
//! let config = SqliteConfig::from_url("sqlite://./app.db?busy_timeout=10000")?;
//! let pool = Pool::new(SqliteManager::new(config), PoolOptions::default())?;
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod types;

pub use config::{DatabasePath, JournalMode, SqliteConfig, SynchronousMode};
pub use connection::SqliteConnection;
pub use error::{SqliteError, SqliteResult};
pub use manager::SqliteManager;
