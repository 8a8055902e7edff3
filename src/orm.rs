//! The connected ORM handle.

use std::future::Future;
use std::sync::Arc;

use quarry_migrate::SchemaManager;
use quarry_query::{
    Dialect, Model, Query, QueryError, QueryLog, QueryResult, RawQuery, Repository, ResultCache, Session,
    TransactionOptions,
};

/// A connected ORM: one registry, one pool, one cache.
///
/// Cloning is cheap and shares everything.
#[derive(Debug, Clone)]
pub struct Orm {
    session: Session,
    auto_migrate: bool,
}

impl Orm {
    pub(crate) fn from_session(session: Session, auto_migrate: bool) -> Self {
        Self { session, auto_migrate }
    }

    /// The root session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Register a model after connecting. With `auto_migrate` set, its table
    /// is created when missing.
    pub async fn register<T: Model>(&self) -> QueryResult<()> {
        self.session.registry().register::<T>()?;
        if self.auto_migrate {
            let schema = self.schema();
            if !schema.has_table::<T>().await? {
                schema.create_table::<T>().await?;
            }
        }
        Ok(())
    }

    /// Repository for `T`.
    pub fn repository<T: Model>(&self) -> QueryResult<Repository<T>> {
        self.session.repository::<T>()
    }

    /// Query builder for `T`.
    pub fn query<T: Model>(&self) -> QueryResult<Query<T>> {
        self.session.query::<T>()
    }

    /// Raw SQL with `?` placeholders.
    pub fn raw(&self, sql: impl Into<String>) -> RawQuery {
        self.session.raw(sql)
    }

    /// Run `f` in a transaction; see [`Session::transaction`].
    pub async fn transaction<F, Fut, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<QueryError>,
    {
        self.session.transaction(f).await
    }

    /// Run `f` in a transaction with explicit options.
    pub async fn transaction_with<F, Fut, R, E>(&self, options: TransactionOptions, f: F) -> Result<R, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<QueryError>,
    {
        self.session.transaction_with(options, f).await
    }

    /// Schema manager for the registered models.
    pub fn schema(&self) -> SchemaManager {
        SchemaManager::new(self.session.clone())
    }

    /// The SQL dialect.
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        self.session.dialect()
    }

    /// Executed-statement log.
    pub fn query_log(&self) -> &QueryLog {
        self.session.query_log()
    }

    /// Result cache.
    pub fn cache(&self) -> &ResultCache {
        self.session.cache()
    }

    /// Close the pool. Later operations fail with `PoolClosed`.
    pub fn close(&self) {
        self.session.close();
    }
}
