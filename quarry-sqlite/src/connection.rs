//! SQLite connection wrapper.

use async_trait::async_trait;
use quarry_query::{DriverConnection, ExecuteResult, QueryError, QueryResult, Record, Value};
use rusqlite::params_from_iter;
use tokio_rusqlite::Connection;
use tracing::{instrument, trace};

use crate::error::SqliteError;
use crate::types::{row_to_record, to_sqlite};

/// One SQLite connection, driven on `tokio-rusqlite`'s background thread.
#[derive(Clone)]
pub struct SqliteConnection {
    conn: Connection,
}

impl SqliteConnection {
    /// Wrap an open connection.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// The underlying `tokio-rusqlite` handle.
    pub fn inner(&self) -> &Connection {
        &self.conn
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection").finish_non_exhaustive()
    }
}

fn is_insert(sql: &str) -> bool {
    sql.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("insert"))
}

#[async_trait]
impl DriverConnection for SqliteConnection {
    #[instrument(skip(self, sql, params), fields(sql = %sql, params = params.len()))]
    async fn query(&mut self, sql: &str, params: &[Value]) -> QueryResult<Vec<Record>> {
        let sql = sql.to_string();
        let params: Vec<_> = params.iter().map(to_sqlite).collect();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
                let rows = stmt.query_map(params_from_iter(params.iter()), |row| row_to_record(row, &columns))?;
                let records: Result<Vec<_>, _> = rows.collect();
                Ok(records?)
            })
            .await
            .map_err(|e| QueryError::from(SqliteError::from(e)))
    }

    #[instrument(skip(self, sql, params), fields(sql = %sql, params = params.len()))]
    async fn execute(&mut self, sql: &str, params: &[Value]) -> QueryResult<ExecuteResult> {
        let insert = is_insert(sql);
        let sql = sql.to_string();
        let params: Vec<_> = params.iter().map(to_sqlite).collect();

        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&sql)?;
                // Statements such as PRAGMA report rows even when run for
                // their side effect.
                let rows_affected = if stmt.column_count() > 0 {
                    let mut rows = stmt.query(params_from_iter(params.iter()))?;
                    let mut count = 0u64;
                    while rows.next()?.is_some() {
                        count += 1;
                    }
                    count
                } else {
                    stmt.execute(params_from_iter(params.iter()))? as u64
                };
                drop(stmt);
                let last_insert_id = (insert && rows_affected > 0).then(|| conn.last_insert_rowid());
                Ok(ExecuteResult {
                    rows_affected,
                    last_insert_id,
                })
            })
            .await
            .map_err(|e| QueryError::from(SqliteError::from(e)))
    }

    async fn execute_batch(&mut self, sql: &str) -> QueryResult<()> {
        let sql = sql.to_string();
        trace!(sql = %sql, "SQLite batch");

        self.conn
            .call(move |conn| Ok(conn.execute_batch(&sql)?))
            .await
            .map_err(|e| QueryError::from(SqliteError::from(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    async fn memory() -> SqliteConnection {
        SqliteConnection::new(Connection::open_in_memory().await.unwrap())
    }

    #[test]
    fn test_is_insert() {
        assert!(is_insert("  INSERT INTO t VALUES (1)"));
        assert!(is_insert("insert into t values (1)"));
        assert!(!is_insert("UPDATE t SET a = 1"));
        assert!(!is_insert("ins"));
    }

    #[tokio::test]
    async fn test_execute_and_query() {
        let mut conn = memory().await;
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL)")
            .await
            .unwrap();

        let result = conn
            .execute("INSERT INTO t (name) VALUES (?)", &[Value::from("a")])
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, Some(1));

        let rows = conn
            .query("SELECT id, name FROM t WHERE name = ?", &[Value::from("a")])
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("id"), Some(&json!(1)));
        assert_eq!(rows[0].get("name"), Some(&json!("a")));
    }

    #[tokio::test]
    async fn test_insert_returning_through_query() {
        let mut conn = memory().await;
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)").await.unwrap();
        let rows = conn
            .query("INSERT INTO t (name) VALUES (?) RETURNING id", &[Value::from("x")])
            .await
            .unwrap();
        assert_eq!(rows[0].get_i64("id"), Some(1));
    }

    #[tokio::test]
    async fn test_unique_violation_maps_to_constraint_code() {
        let mut conn = memory().await;
        conn.execute_batch("CREATE TABLE t (email TEXT UNIQUE)").await.unwrap();
        conn.execute("INSERT INTO t VALUES (?)", &[Value::from("a@x")]).await.unwrap();
        let err = conn
            .execute("INSERT INTO t VALUES (?)", &[Value::from("a@x")])
            .await
            .unwrap_err();
        assert_eq!(err.code, quarry_query::ErrorCode::UniqueConstraint);
        assert_eq!(err.context.field.as_deref(), Some("email"));
    }
}
