//! Applies generated DDL through a session.

use std::sync::Arc;

use quarry_query::{CompiledQuery, Model, ModelMeta, Session, Value};
use tracing::{debug, info};

use crate::ddl::DdlGenerator;
use crate::error::MigrateResult;

/// Outcome of [`SchemaManager::migrate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Tables created, in registration order.
    pub created: Vec<String>,
    /// Tables that already existed and were left untouched.
    pub existing: Vec<String>,
}

/// Creates and drops tables for registered models.
///
/// Schema changes are strictly additive: [`migrate`](Self::migrate) only
/// creates missing tables. `drop_table` followed by `create_table` is the
/// way to reset a table.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    session: Session,
    ddl: DdlGenerator,
}

impl SchemaManager {
    /// Create a manager over a session's registry and dialect.
    pub fn new(session: Session) -> Self {
        let ddl = DdlGenerator::new(session.dialect().clone());
        Self { session, ddl }
    }

    /// The DDL generator in use.
    pub fn generator(&self) -> &DdlGenerator {
        &self.ddl
    }

    /// Create the table and indexes for `T`.
    pub async fn create_table<T: Model>(&self) -> MigrateResult<()> {
        let meta = self.session.registry().lookup::<T>()?;
        self.create_table_for(&meta).await
    }

    /// Create the table and indexes for already-resolved metadata.
    pub async fn create_table_for(&self, meta: &ModelMeta) -> MigrateResult<()> {
        for statement in self.ddl.create_statements(meta)? {
            self.session.execute_batch(&statement).await?;
        }
        info!(model = meta.name(), table = meta.table(), "Created table");
        Ok(())
    }

    /// Drop the table for `T` if it exists.
    pub async fn drop_table<T: Model>(&self) -> MigrateResult<()> {
        let meta = self.session.registry().lookup::<T>()?;
        self.session.execute_batch(&self.ddl.drop_table(&meta)?).await?;
        // Cached rows may describe the dropped table.
        self.session.cache().clear();
        info!(model = meta.name(), table = meta.table(), "Dropped table");
        Ok(())
    }

    /// Whether the table for `T` exists.
    pub async fn has_table<T: Model>(&self) -> MigrateResult<bool> {
        let meta = self.session.registry().lookup::<T>()?;
        self.table_exists(meta.table()).await
    }

    /// Whether a table with this name exists.
    pub async fn table_exists(&self, table: &str) -> MigrateResult<bool> {
        let query = CompiledQuery::new(self.session.dialect().table_exists_sql(), vec![Value::from(table)]);
        let rows = self.session.fetch(&query, None).await?;
        let count = rows.first().and_then(|row| row.get_i64("cnt")).unwrap_or(0);
        Ok(count > 0)
    }

    /// Create every missing table, in registration order. Existing tables
    /// are never altered or dropped.
    pub async fn migrate(&self) -> MigrateResult<MigrationReport> {
        let mut report = MigrationReport::default();
        let models: Vec<Arc<ModelMeta>> = self.session.registry().models();
        for meta in models {
            if self.table_exists(meta.table()).await? {
                debug!(table = meta.table(), "Table exists, skipping");
                report.existing.push(meta.table().to_string());
                continue;
            }
            self.create_table_for(&meta).await?;
            report.created.push(meta.table().to_string());
        }
        info!(
            created = report.created.len(),
            existing = report.existing.len(),
            "Schema migration finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quarry_query::{
        Column, DialectFactory, DialectKind, ErrorCode, LogicalType, ModelSchema, Pool, PoolOptions, QueryError,
        Registry, SessionOptions,
    };
    use quarry_sqlite::SqliteManager;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize)]
    struct Author {
        id: i64,
        name: String,
    }

    impl Model for Author {
        fn schema() -> ModelSchema<Self> {
            ModelSchema::<Self>::new()
                .column(Column::new("id", LogicalType::BigInt).primary_key().auto_increment())
                .column(Column::new("name", LogicalType::String).index())
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Book {
        id: i64,
        title: String,
    }

    impl Model for Book {
        fn schema() -> ModelSchema<Self> {
            ModelSchema::<Self>::new()
                .column(Column::new("id", LogicalType::BigInt).primary_key().auto_increment())
                .column(Column::new("title", LogicalType::String))
        }
    }

    fn manager() -> SchemaManager {
        let registry = Arc::new(Registry::new());
        registry.register::<Author>().unwrap();
        registry.register::<Book>().unwrap();
        let pool = Pool::new(SqliteManager::memory(), PoolOptions::default()).unwrap();
        let session = Session::new(
            registry,
            DialectFactory::for_kind(DialectKind::Sqlite),
            pool,
            SessionOptions::default(),
        );
        SchemaManager::new(session)
    }

    #[tokio::test]
    async fn test_migrate_creates_missing_tables_once() {
        let schema = manager();
        schema.create_table::<Book>().await.unwrap();

        let report = schema.migrate().await.unwrap();
        assert_eq!(report.created, vec!["authors".to_string()]);
        assert_eq!(report.existing, vec!["books".to_string()]);

        let again = schema.migrate().await.unwrap();
        assert!(again.created.is_empty());
        assert_eq!(again.existing.len(), 2);
    }

    #[tokio::test]
    async fn test_drop_then_has_table() {
        let schema = manager();
        schema.migrate().await.unwrap();
        assert!(schema.has_table::<Author>().await.unwrap());

        schema.drop_table::<Author>().await.unwrap();
        assert!(!schema.has_table::<Author>().await.unwrap());
        // Dropping a missing table is not an error.
        schema.drop_table::<Author>().await.unwrap();
    }

    #[tokio::test]
    async fn test_unregistered_model_fails_fast() {
        #[derive(Debug, Serialize, Deserialize)]
        struct Stray {
            id: i64,
        }
        impl Model for Stray {
            fn schema() -> ModelSchema<Self> {
                ModelSchema::<Self>::new().column(Column::new("id", LogicalType::BigInt).primary_key())
            }
        }

        let err: QueryError = manager().create_table::<Stray>().await.unwrap_err().into();
        assert_eq!(err.code, ErrorCode::ModelNotRegistered);
    }
}
