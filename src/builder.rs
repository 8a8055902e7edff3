//! Assembling an [`Orm`] from configuration, models and a driver.

use std::sync::Arc;

use quarry_migrate::SchemaManager;
use quarry_query::{
    ConnectionManager, DatabaseConfig, DialectFactory, DialectKind, Model, Pool, QueryError, QueryResult,
    Registry, Session, SessionOptions,
};
use quarry_sqlite::SqliteManager;
use tracing::info;

use crate::Orm;

/// Builder for an [`Orm`].
///
/// Registration errors are kept until `connect`, so calls chain:
///
/// ```rust,ignore
/// let orm = OrmBuilder::new(DatabaseConfig::sqlite_memory())
///     .register::<User>()
///     .register::<Post>()
///     .connect()
///     .await?;
/// ```
#[derive(Debug)]
pub struct OrmBuilder {
    config: DatabaseConfig,
    registry: Arc<Registry>,
    error: Option<QueryError>,
}

impl OrmBuilder {
    /// Start from a validated configuration.
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            registry: Arc::new(Registry::new()),
            error: None,
        }
    }

    /// The configuration this builder connects with.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Register a model. A duplicate registration fails `connect`.
    pub fn register<T: Model>(mut self) -> Self {
        if self.error.is_none() {
            if let Err(err) = self.registry.register::<T>() {
                self.error = Some(err);
            }
        }
        self
    }

    /// Connect with the built-in SQLite driver.
    pub async fn connect(self) -> QueryResult<Orm> {
        if self.config.dialect != DialectKind::Sqlite {
            return Err(QueryError::unsupported_dialect(self.config.dialect.name())
                .with_help("Only SQLite ships a driver; use connect_with and a ConnectionManager for other dialects"));
        }
        let manager = SqliteManager::from_database_config(&self.config).map_err(QueryError::from)?;
        self.connect_with(manager).await
    }

    /// Connect through any driver.
    ///
    /// With `auto_migrate` set, missing tables for the registered models are
    /// created before this returns.
    pub async fn connect_with(self, manager: impl ConnectionManager) -> QueryResult<Orm> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let dialect = DialectFactory::for_kind(self.config.dialect);
        let pool = Pool::new(manager, self.config.pool.clone())?;
        let options = SessionOptions {
            statement_timeout: self.config.statement_timeout,
            cache_capacity: self.config.cache_capacity,
        };
        let session = Session::new(self.registry, dialect, pool, options);

        if self.config.auto_migrate {
            SchemaManager::new(session.clone()).migrate().await?;
        }
        info!(
            dialect = self.config.dialect.name(),
            models = session.registry().len(),
            "ORM connected"
        );
        Ok(Orm::from_session(session, self.config.auto_migrate))
    }
}

/// Connect with configuration read from the environment (`DATABASE_URL` or
/// the `DB_*` variables) and the built-in SQLite driver. Models are
/// registered afterwards with [`Orm::register`].
pub async fn quick_setup_from_env() -> QueryResult<Orm> {
    OrmBuilder::new(DatabaseConfig::from_env()?).connect().await
}
