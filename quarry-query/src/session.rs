//! Sessions: the execution context shared by queries and repositories.
//!
//! A [`Session`] bundles the model registry, the dialect, the connection
//! pool, the result cache and the query log. It is cheap to clone. A
//! session created by [`Session::transaction`] routes every statement
//! through the transaction's connection instead of the pool.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::cache::ResultCache;
use crate::connection::{DriverConnection, ExecuteResult, Pool, PooledConnection};
use crate::dialect::Dialect;
use crate::error::{QueryError, QueryResult};
use crate::metadata::{Model, Registry};
use crate::query::Query;
use crate::query_log::{QueryEvent, QueryLog};
use crate::raw::RawQuery;
use crate::record::Record;
use crate::repository::Repository;
use crate::sql::CompiledQuery;
use crate::transaction::TransactionHandle;
use crate::value::Value;

/// Session-wide settings.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Default statement timeout; `Query::timeout` overrides it.
    pub statement_timeout: Option<Duration>,
    /// Maximum number of cached result sets.
    pub cache_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            statement_timeout: None,
            cache_capacity: ResultCache::DEFAULT_CAPACITY,
        }
    }
}

struct Shared {
    registry: Arc<Registry>,
    dialect: Arc<dyn Dialect>,
    pool: Pool,
    cache: ResultCache,
    query_log: QueryLog,
    statement_timeout: Option<Duration>,
}

#[derive(Clone)]
pub(crate) enum Executor {
    Pool,
    Transaction(Arc<TransactionHandle>),
}

/// Execution context for queries, repositories and transactions.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
    pub(crate) executor: Executor,
}

#[derive(Debug, Clone, Copy)]
enum StatementKind {
    Query,
    Execute,
    Batch,
}

enum Outcome {
    Rows(Vec<Record>),
    Done(ExecuteResult),
}

impl Session {
    /// Create a session over an existing pool.
    pub fn new(registry: Arc<Registry>, dialect: Arc<dyn Dialect>, pool: Pool, options: SessionOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                dialect,
                pool,
                cache: ResultCache::new(options.cache_capacity),
                query_log: QueryLog::new(),
                statement_timeout: options.statement_timeout,
            }),
            executor: Executor::Pool,
        }
    }

    pub(crate) fn with_executor(&self, executor: Executor) -> Self {
        Self {
            shared: self.shared.clone(),
            executor,
        }
    }

    /// Model registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.shared.registry
    }

    /// SQL dialect.
    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.shared.dialect
    }

    /// Connection pool.
    pub fn pool(&self) -> &Pool {
        &self.shared.pool
    }

    /// Result cache.
    pub fn cache(&self) -> &ResultCache {
        &self.shared.cache
    }

    /// Query log.
    pub fn query_log(&self) -> &QueryLog {
        &self.shared.query_log
    }

    /// Default statement timeout.
    pub fn statement_timeout(&self) -> Option<Duration> {
        self.shared.statement_timeout
    }

    /// Whether statements run inside a transaction.
    pub fn in_transaction(&self) -> bool {
        matches!(self.executor, Executor::Transaction(_))
    }

    /// Start a query against a registered model.
    pub fn query<T: Model>(&self) -> QueryResult<Query<T>> {
        let meta = self.shared.registry.lookup::<T>()?;
        Ok(Query::new(self.clone(), meta))
    }

    /// Repository for a registered model.
    pub fn repository<T: Model>(&self) -> QueryResult<Repository<T>> {
        let meta = self.shared.registry.lookup::<T>()?;
        Ok(Repository::new(self.clone(), meta))
    }

    /// Raw SQL with `?` placeholders.
    pub fn raw(&self, sql: impl Into<String>) -> RawQuery {
        RawQuery::new(self.clone(), sql)
    }

    /// Run a compiled statement that returns rows.
    pub async fn fetch(&self, query: &CompiledQuery, timeout: Option<Duration>) -> QueryResult<Vec<Record>> {
        match self.run(StatementKind::Query, &query.sql, &query.params, timeout).await? {
            Outcome::Rows(rows) => Ok(rows),
            Outcome::Done(_) => Ok(Vec::new()),
        }
    }

    /// Run a compiled statement that returns no rows.
    pub async fn execute(&self, query: &CompiledQuery, timeout: Option<Duration>) -> QueryResult<ExecuteResult> {
        match self.run(StatementKind::Execute, &query.sql, &query.params, timeout).await? {
            Outcome::Done(result) => Ok(result),
            Outcome::Rows(rows) => Ok(ExecuteResult {
                rows_affected: rows.len() as u64,
                last_insert_id: None,
            }),
        }
    }

    /// Run parameterless statements, such as DDL scripts.
    pub async fn execute_batch(&self, sql: &str) -> QueryResult<()> {
        self.run(StatementKind::Batch, sql, &[], None).await.map(|_| ())
    }

    /// Close the underlying pool.
    pub fn close(&self) {
        self.shared.pool.close();
    }

    async fn run(
        &self,
        kind: StatementKind,
        sql: &str,
        params: &[Value],
        timeout: Option<Duration>,
    ) -> QueryResult<Outcome> {
        let timeout = timeout.or(self.shared.statement_timeout);
        match &self.executor {
            Executor::Pool => {
                let mut conn = self.shared.pool.acquire().await?;
                self.run_on(&mut conn, kind, sql, params, timeout).await
            }
            Executor::Transaction(handle) => {
                let mut guard = handle.lock().await;
                let conn = guard.as_mut().ok_or_else(QueryError::transaction_closed)?;
                self.run_on(conn, kind, sql, params, timeout).await
            }
        }
    }

    async fn run_on(
        &self,
        conn: &mut PooledConnection,
        kind: StatementKind,
        sql: &str,
        params: &[Value],
        timeout: Option<Duration>,
    ) -> QueryResult<Outcome> {
        debug!(sql = %sql, params = params.len(), ?kind, "Executing statement");
        let started = Instant::now();

        let result = match timeout {
            Some(limit) => {
                let attempt = tokio::time::timeout(limit, dispatch(&mut **conn, kind, sql, params)).await;
                match attempt {
                    Ok(result) => result,
                    Err(_) => {
                        // The driver may still be mid-statement.
                        conn.mark_broken();
                        warn!(sql = %sql, timeout_ms = limit.as_millis() as u64, "Statement timed out");
                        Err(QueryError::timeout(limit.as_millis() as u64))
                    }
                }
            }
            None => dispatch(&mut **conn, kind, sql, params).await,
        };

        let log = &self.shared.query_log;
        if log.is_active() {
            let mut event = QueryEvent::new(sql, params.to_vec(), started.elapsed());
            if result.is_err() {
                event = event.failed();
            }
            log.record(event);
        }

        result.map_err(|err| if err.context.sql.is_none() { err.with_sql(sql) } else { err })
    }

    pub(crate) async fn run_statement_on(&self, conn: &mut PooledConnection, sql: &str) -> QueryResult<()> {
        self.run_on(conn, StatementKind::Execute, sql, &[], None).await.map(|_| ())
    }
}

async fn dispatch(
    conn: &mut dyn DriverConnection,
    kind: StatementKind,
    sql: &str,
    params: &[Value],
) -> QueryResult<Outcome> {
    match kind {
        StatementKind::Query => conn.query(sql, params).await.map(Outcome::Rows),
        StatementKind::Execute => conn.execute(sql, params).await.map(Outcome::Done),
        StatementKind::Batch => conn
            .execute_batch(sql)
            .await
            .map(|()| Outcome::Done(ExecuteResult::default())),
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("dialect", &self.shared.dialect.name())
            .field("models", &self.shared.registry.len())
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}
