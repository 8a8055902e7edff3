//! Database configuration.

use std::time::Duration;

use tracing::info;

use super::{ConnectionError, ConnectionString, EnvSource, PoolOptions, StdEnvSource};
use crate::cache::ResultCache;
use crate::dialect::DialectKind;
use crate::error::{QueryError, QueryResult};

/// Validated database configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// Dialect family.
    pub dialect: DialectKind,
    /// Host, for network dialects.
    pub host: Option<String>,
    /// Port, defaulted from the dialect.
    pub port: Option<u16>,
    /// Username.
    pub user: Option<String>,
    /// Password.
    pub password: Option<String>,
    /// Database name, or file path (`:memory:` for in-memory) for SQLite.
    pub database: String,
    /// Pool sizing.
    pub pool: PoolOptions,
    /// Default per-statement timeout.
    pub statement_timeout: Option<Duration>,
    /// Create the database (or SQLite file) if it does not exist.
    pub auto_create_database: bool,
    /// Create missing tables for registered models on connect.
    pub auto_migrate: bool,
    /// Maximum number of cached result sets.
    pub cache_capacity: usize,
}

impl DatabaseConfig {
    /// Start building a configuration.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// In-memory SQLite with a single shared connection.
    pub fn sqlite_memory() -> Self {
        Self {
            dialect: DialectKind::Sqlite,
            host: None,
            port: None,
            user: None,
            password: None,
            database: ":memory:".to_string(),
            pool: PoolOptions::default().max_connections(1).max_idle(1),
            statement_timeout: None,
            auto_create_database: true,
            auto_migrate: false,
            cache_capacity: ResultCache::DEFAULT_CAPACITY,
        }
    }

    /// Parse a connection URL into a configuration.
    pub fn from_url(url: &str) -> QueryResult<Self> {
        Self::builder().url(url).build()
    }

    /// Load from the process environment.
    ///
    /// `DATABASE_URL` wins when set; otherwise `DB_DIALECT`, `DB_HOST`,
    /// `DB_PORT`, `DB_USER`, `DB_PASSWORD` and `DB_NAME` are read.
    /// `DB_MAX_OPEN` and `DB_MAX_IDLE` size the pool in both cases.
    pub fn from_env() -> QueryResult<Self> {
        Self::from_env_source(&StdEnvSource)
    }

    /// Load from an arbitrary environment source.
    pub fn from_env_source(env: &dyn EnvSource) -> QueryResult<Self> {
        let mut builder = Self::builder();
        if let Some(url) = env.get_non_empty("DATABASE_URL") {
            info!("Loading database configuration from DATABASE_URL");
            builder = builder.url(url);
        } else {
            info!("Loading database configuration from DB_* variables");
            let dialect = env
                .get_non_empty("DB_DIALECT")
                .ok_or_else(|| QueryError::missing_configuration("DB_DIALECT"))?;
            builder = builder.with_dialect(dialect);
            if let Some(host) = env.get_non_empty("DB_HOST") {
                builder = builder.host(host);
            }
            if let Some(port) = env.parse::<u16>("DB_PORT")? {
                builder = builder.port(port);
            }
            if let Some(user) = env.get_non_empty("DB_USER") {
                builder = builder.user(user);
            }
            if let Some(password) = env.get("DB_PASSWORD") {
                builder = builder.password(password);
            }
            if let Some(name) = env.get_non_empty("DB_NAME") {
                builder = builder.database(name);
            }
        }

        let max_open = env.parse::<usize>("DB_MAX_OPEN")?;
        let max_idle = env.parse::<usize>("DB_MAX_IDLE")?;
        if max_open.is_some() || max_idle.is_some() {
            let defaults = PoolOptions::default();
            let max_open = max_open.unwrap_or(defaults.max_connections);
            builder = builder.connection_pool(max_open, max_idle.unwrap_or(defaults.max_idle.min(max_open)));
        }
        builder.build()
    }

    /// Whether this is an in-memory SQLite database.
    pub fn is_memory(&self) -> bool {
        self.dialect == DialectKind::Sqlite && self.database == ":memory:"
    }
}

/// Builder for [`DatabaseConfig`]; `build()` validates everything before
/// any connection is attempted.
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    url: Option<String>,
    dialect: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
    pool: Option<(usize, usize)>,
    acquire_timeout: Option<Duration>,
    statement_timeout: Option<Duration>,
    auto_create_database: bool,
    auto_migrate: bool,
    cache_capacity: Option<usize>,
}

impl ConfigBuilder {
    /// Dialect name (`postgres`, `mysql`, `sqlite`, or an alias).
    pub fn with_dialect(mut self, dialect: impl Into<String>) -> Self {
        self.dialect = Some(dialect.into());
        self
    }

    /// Connection URL; explicitly set fields take precedence over its parts.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Host.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Username.
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Password.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Database name or SQLite path.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Pool limits.
    pub fn connection_pool(mut self, max_open: usize, max_idle: usize) -> Self {
        self.pool = Some((max_open, max_idle));
        self
    }

    /// How long to wait for a pooled connection.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Default per-statement timeout.
    pub fn statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = Some(timeout);
        self
    }

    /// Create the database if it does not exist.
    pub fn auto_create_database(mut self, enabled: bool) -> Self {
        self.auto_create_database = enabled;
        self
    }

    /// Create missing tables on connect.
    pub fn auto_migrate(mut self, enabled: bool) -> Self {
        self.auto_migrate = enabled;
        self
    }

    /// Result cache capacity.
    pub fn cache_capacity(mut self, entries: usize) -> Self {
        self.cache_capacity = Some(entries);
        self
    }

    /// Validate and build.
    pub fn build(self) -> QueryResult<DatabaseConfig> {
        let parsed = self.url.as_deref().map(ConnectionString::parse).transpose()?;

        let dialect = match (&self.dialect, &parsed) {
            (Some(name), _) => DialectKind::parse(name)?,
            (None, Some(conn)) => conn.dialect(),
            (None, None) => return Err(QueryError::missing_configuration("dialect")),
        };
        if let Some(conn) = &parsed {
            if conn.dialect() != dialect {
                return Err(QueryError::configuration(format!(
                    "Dialect '{}' does not match connection URL scheme '{}'",
                    dialect,
                    conn.dialect()
                )));
            }
        }

        let from_url = |f: fn(&ConnectionString) -> Option<&str>| {
            parsed.as_ref().and_then(|c| f(c)).map(String::from)
        };
        let host = self.host.clone().or_else(|| from_url(ConnectionString::host));
        let user = self.user.clone().or_else(|| from_url(ConnectionString::user));
        let password = self.password.clone().or_else(|| from_url(ConnectionString::password));
        let database = self.database.clone().or_else(|| from_url(ConnectionString::database));
        let port = self
            .port
            .or_else(|| parsed.as_ref().and_then(ConnectionString::port))
            .or_else(|| dialect.default_port());

        let database = match dialect {
            DialectKind::Sqlite => database.ok_or_else(|| QueryError::missing_configuration("database"))?,
            DialectKind::MySql | DialectKind::Postgres => {
                if host.is_none() {
                    return Err(QueryError::missing_configuration("host"));
                }
                database.ok_or_else(|| QueryError::missing_configuration("database"))?
            }
        };

        let mut pool = PoolOptions::default();
        if dialect == DialectKind::Sqlite && database == ":memory:" {
            pool = pool.max_connections(1).max_idle(1);
        }
        if let Some((max_open, max_idle)) = self.pool {
            pool = pool.max_connections(max_open).max_idle(max_idle);
        }
        if let Some(timeout) = self.acquire_timeout {
            pool = pool.acquire_timeout(timeout);
        }
        pool.validate()?;

        if let Some(timeout) = self.statement_timeout {
            if timeout.is_zero() {
                return Err(ConnectionError::InvalidOption {
                    key: "statement_timeout".to_string(),
                    message: "must be greater than zero".to_string(),
                }
                .into());
            }
        }

        let config = DatabaseConfig {
            dialect,
            host,
            port,
            user,
            password,
            database,
            pool,
            statement_timeout: self.statement_timeout,
            auto_create_database: self.auto_create_database,
            auto_migrate: self.auto_migrate,
            cache_capacity: self.cache_capacity.unwrap_or(ResultCache::DEFAULT_CAPACITY),
        };
        info!(
            dialect = %config.dialect,
            host = ?config.host,
            database = %config.database,
            max_connections = config.pool.max_connections,
            "DatabaseConfig built"
        );
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::MapEnvSource;
    use crate::error::ErrorCode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_missing_dialect() {
        let err = DatabaseConfig::builder().database("x").build().unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingConfiguration);
    }

    #[test]
    fn test_unknown_dialect() {
        let err = DatabaseConfig::builder()
            .with_dialect("oracle")
            .database("x")
            .build()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedDialect);
    }

    #[test]
    fn test_network_dialect_needs_host_and_database() {
        let err = DatabaseConfig::builder()
            .with_dialect("mysql")
            .database("shop")
            .build()
            .unwrap_err();
        assert!(err.message.contains("host"));

        let err = DatabaseConfig::builder()
            .with_dialect("mysql")
            .host("localhost")
            .build()
            .unwrap_err();
        assert!(err.message.contains("database"));
    }

    #[test]
    fn test_url_with_overrides() {
        let config = DatabaseConfig::builder()
            .url("postgres://app:secret@db:6543/shop")
            .database("analytics")
            .statement_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(config.dialect, DialectKind::Postgres);
        assert_eq!(config.port, Some(6543));
        assert_eq!(config.database, "analytics");
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert_eq!(config.statement_timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_memory_sqlite_uses_single_connection() {
        let config = DatabaseConfig::builder()
            .with_dialect("sqlite")
            .database(":memory:")
            .build()
            .unwrap();
        assert!(config.is_memory());
        assert_eq!(config.pool.max_connections, 1);
    }

    #[test]
    fn test_invalid_pool() {
        let err = DatabaseConfig::builder()
            .with_dialect("sqlite")
            .database("app.db")
            .connection_pool(2, 5)
            .build()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_from_env_variables() {
        let env = MapEnvSource::new()
            .set("DB_DIALECT", "postgresql")
            .set("DB_HOST", "db.internal")
            .set("DB_PORT", "5433")
            .set("DB_USER", "svc")
            .set("DB_NAME", "orders")
            .set("DB_MAX_OPEN", "25")
            .set("DB_MAX_IDLE", "4");
        let config = DatabaseConfig::from_env_source(&env).unwrap();
        assert_eq!(config.dialect, DialectKind::Postgres);
        assert_eq!(config.host.as_deref(), Some("db.internal"));
        assert_eq!(config.port, Some(5433));
        assert_eq!(config.pool.max_connections, 25);
        assert_eq!(config.pool.max_idle, 4);
    }

    #[test]
    fn test_from_env_prefers_database_url() {
        let env = MapEnvSource::new()
            .set("DATABASE_URL", "sqlite::memory:")
            .set("DB_DIALECT", "mysql");
        let config = DatabaseConfig::from_env_source(&env).unwrap();
        assert!(config.is_memory());
    }

    #[test]
    fn test_from_env_missing_dialect() {
        let err = DatabaseConfig::from_env_source(&MapEnvSource::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::MissingConfiguration);
    }

    #[test]
    fn test_from_env_bad_number() {
        let env = MapEnvSource::new()
            .set("DB_DIALECT", "sqlite")
            .set("DB_NAME", "x.db")
            .set("DB_PORT", "abc");
        let err = DatabaseConfig::from_env_source(&env).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfiguration);
    }
}
