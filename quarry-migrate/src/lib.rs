//! # quarry-migrate
//!
//! Schema management for the Quarry ORM. [`DdlGenerator`] turns registered
//! model metadata into dialect-specific `CREATE TABLE` / `CREATE INDEX` /
//! `DROP TABLE` statements, and [`SchemaManager`] applies them through a
//! session.
//!
//! Migrations are additive only: [`SchemaManager::migrate`] creates the
//! tables that are missing and leaves existing ones alone.
//!
//! ## Example
//!
//! ```rust,ignore
//! use quarry_migrate::SchemaManager;
//!
//! let schema = SchemaManager::new(session.clone());
//! schema.drop_table::<User>().await?;
//! schema.create_table::<User>().await?;
//! let report = schema.migrate().await?;
//! println!("created {:?}", report.created);
//! ```

pub mod ddl;
pub mod error;
pub mod schema;

pub use ddl::DdlGenerator;
pub use error::{MigrateResult, MigrationError};
pub use schema::{MigrationReport, SchemaManager};
