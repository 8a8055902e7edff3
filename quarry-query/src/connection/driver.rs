//! The contract database drivers implement.

use async_trait::async_trait;

use crate::error::QueryResult;
use crate::record::Record;
use crate::value::Value;

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteResult {
    /// Rows inserted, updated or deleted.
    pub rows_affected: u64,
    /// Last generated row id, where the engine reports one.
    pub last_insert_id: Option<i64>,
}

/// One open database connection.
///
/// Placeholders in `sql` already follow the connection's dialect; `params`
/// are in placeholder order.
#[async_trait]
pub trait DriverConnection: Send {
    /// Run a statement that returns rows.
    async fn query(&mut self, sql: &str, params: &[Value]) -> QueryResult<Vec<Record>>;

    /// Run a statement that returns no rows.
    async fn execute(&mut self, sql: &str, params: &[Value]) -> QueryResult<ExecuteResult>;

    /// Run several semicolon-separated statements without parameters.
    async fn execute_batch(&mut self, sql: &str) -> QueryResult<()>;

    /// Check the connection is still usable.
    async fn ping(&mut self) -> QueryResult<()> {
        self.query("SELECT 1", &[]).await.map(|_| ())
    }
}

/// Opens connections for a [`Pool`](super::Pool).
#[async_trait]
pub trait ConnectionManager: Send + Sync + 'static {
    /// Open a new connection.
    async fn connect(&self) -> QueryResult<Box<dyn DriverConnection>>;

    /// Upper bound on useful concurrent connections, if the backend has one
    /// (an in-memory SQLite database is a single connection).
    fn max_connections_hint(&self) -> Option<usize> {
        None
    }
}
