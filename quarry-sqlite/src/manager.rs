//! Connection manager handed to the Quarry pool.

use std::sync::Arc;

use async_trait::async_trait;
use quarry_query::{ConnectionManager, DatabaseConfig, DriverConnection, QueryError, QueryResult};
use rusqlite::OpenFlags;
use tokio::sync::OnceCell;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

use crate::config::{DatabasePath, SqliteConfig};
use crate::connection::SqliteConnection;
use crate::error::{SqliteError, SqliteResult};

/// Opens SQLite connections for a [`quarry_query::Pool`].
///
/// Every connection to `:memory:` would see its own empty database, so an
/// in-memory manager opens a single connection and hands out clones of it;
/// it also caps the pool at one connection so statements are serialized.
#[derive(Clone)]
pub struct SqliteManager {
    config: Arc<SqliteConfig>,
    shared: Arc<OnceCell<Connection>>,
}

impl SqliteManager {
    /// Create a manager. Nothing is opened until the pool asks.
    pub fn new(config: SqliteConfig) -> Self {
        Self {
            config: Arc::new(config),
            shared: Arc::new(OnceCell::new()),
        }
    }

    /// Manager for a private in-memory database.
    pub fn memory() -> Self {
        Self::new(SqliteConfig::memory())
    }

    /// Manager for a SQLite URL.
    pub fn from_url(url: &str) -> SqliteResult<Self> {
        Ok(Self::new(SqliteConfig::from_url(url)?))
    }

    /// Manager derived from an ORM database configuration.
    pub fn from_database_config(config: &DatabaseConfig) -> SqliteResult<Self> {
        Ok(Self::new(SqliteConfig::from_database_config(config)?))
    }

    /// The driver configuration.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    async fn open(config: &SqliteConfig) -> SqliteResult<Connection> {
        let init_sql = config.init_sql();
        let conn = match &config.path {
            DatabasePath::Memory => Connection::open_in_memory().await?,
            DatabasePath::File(path) => {
                let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                if config.create_if_missing {
                    flags |= OpenFlags::SQLITE_OPEN_CREATE;
                }
                Connection::open_with_flags(path, flags).await.map_err(|e| {
                    SqliteError::connection(format!("cannot open '{}': {}", path.display(), e))
                })?
            }
        };

        conn.call(move |conn| {
            conn.execute_batch(&init_sql)?;
            Ok(())
        })
        .await?;

        debug!(path = %config.path.display(), "Opened SQLite connection");
        Ok(conn)
    }
}

impl std::fmt::Debug for SqliteManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteManager")
            .field("path", &self.config.path.display())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ConnectionManager for SqliteManager {
    async fn connect(&self) -> QueryResult<Box<dyn DriverConnection>> {
        let conn = if self.config.path.is_memory() {
            let config = self.config.clone();
            self.shared
                .get_or_try_init(|| async move {
                    info!("Opening shared in-memory SQLite database");
                    Self::open(&config).await
                })
                .await
                .map_err(QueryError::from)?
                .clone()
        } else {
            Self::open(&self.config).await.map_err(QueryError::from)?
        };
        Ok(Box::new(SqliteConnection::new(conn)))
    }

    fn max_connections_hint(&self) -> Option<usize> {
        self.config.path.is_memory().then_some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use quarry_query::{ErrorCode, Pool, PoolOptions, Value};

    #[tokio::test]
    async fn test_memory_connections_share_one_database() {
        let manager = SqliteManager::memory();
        let mut first = manager.connect().await.unwrap();
        first.execute_batch("CREATE TABLE t (x INTEGER)").await.unwrap();
        first.execute("INSERT INTO t VALUES (?)", &[Value::Int(1)]).await.unwrap();
        drop(first);

        let mut second = manager.connect().await.unwrap();
        let rows = second.query("SELECT x FROM t", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn test_memory_caps_pool_at_one() {
        let pool = Pool::new(SqliteManager::memory(), PoolOptions::new().max_connections(8)).unwrap();
        assert_eq!(pool.options().max_connections, 1);
        assert_eq!(SqliteManager::new(SqliteConfig::file("x.db")).max_connections_hint(), None);
    }

    #[tokio::test]
    async fn test_file_database_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let manager = SqliteManager::new(SqliteConfig::file(&path));
        let mut conn = manager.connect().await.unwrap();
        conn.ping().await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_missing_file_without_create_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = SqliteConfig::file(dir.path().join("absent.db")).create_if_missing(false);
        let err = SqliteManager::new(config).connect().await.err().unwrap();
        assert_eq!(err.code, ErrorCode::ConnectionFailed);
    }
}
