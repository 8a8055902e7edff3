//! SQLite configuration.

use std::path::{Path, PathBuf};

use quarry_query::{ConnectionString, DatabaseConfig};

use crate::error::{SqliteError, SqliteResult};

/// SQLite database configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    /// Database path (or in-memory).
    pub path: DatabasePath,
    /// Create the database file when it does not exist.
    pub create_if_missing: bool,
    /// Enforce foreign keys.
    pub foreign_keys: bool,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: Option<u32>,
    /// Cache size (in pages, negative for KiB).
    pub cache_size: Option<i32>,
    /// Synchronous mode.
    pub synchronous: SynchronousMode,
    /// Journal mode. Ignored for in-memory databases.
    pub journal_mode: JournalMode,
}

/// Where the database lives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DatabasePath {
    /// In-memory database.
    #[default]
    Memory,
    /// File-based database.
    File(PathBuf),
}

impl DatabasePath {
    /// Check if this is an in-memory database.
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory)
    }

    /// Display form of the path.
    pub fn display(&self) -> String {
        match self {
            Self::Memory => ":memory:".to_string(),
            Self::File(path) => path.display().to_string(),
        }
    }
}

/// SQLite synchronous mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SynchronousMode {
    /// Fastest, not crash safe.
    Off,
    /// Safe in WAL mode.
    #[default]
    Normal,
    /// Sync on every commit.
    Full,
    /// Full plus directory sync.
    Extra,
}

impl SynchronousMode {
    /// Get the SQLite pragma value.
    pub fn as_pragma(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::Normal => "NORMAL",
            Self::Full => "FULL",
            Self::Extra => "EXTRA",
        }
    }

    fn parse(value: &str) -> SqliteResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "off" | "0" => Ok(Self::Off),
            "normal" | "1" => Ok(Self::Normal),
            "full" | "2" => Ok(Self::Full),
            "extra" | "3" => Ok(Self::Extra),
            other => Err(SqliteError::config(format!("unknown synchronous mode '{}'", other))),
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JournalMode {
    /// Delete the journal after each transaction.
    Delete,
    /// Truncate instead of deleting.
    Truncate,
    /// Keep the journal file.
    Persist,
    /// Journal in memory.
    Memory,
    /// Write-ahead logging.
    #[default]
    Wal,
    /// No journal.
    Off,
}

impl JournalMode {
    /// Get the SQLite pragma value.
    pub fn as_pragma(&self) -> &'static str {
        match self {
            Self::Delete => "DELETE",
            Self::Truncate => "TRUNCATE",
            Self::Persist => "PERSIST",
            Self::Memory => "MEMORY",
            Self::Wal => "WAL",
            Self::Off => "OFF",
        }
    }

    fn parse(value: &str) -> SqliteResult<Self> {
        match value.to_ascii_lowercase().as_str() {
            "delete" => Ok(Self::Delete),
            "truncate" => Ok(Self::Truncate),
            "persist" => Ok(Self::Persist),
            "memory" => Ok(Self::Memory),
            "wal" => Ok(Self::Wal),
            "off" => Ok(Self::Off),
            other => Err(SqliteError::config(format!("unknown journal mode '{}'", other))),
        }
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: DatabasePath::Memory,
            create_if_missing: true,
            foreign_keys: true,
            busy_timeout_ms: Some(5000),
            cache_size: Some(-2000),
            synchronous: SynchronousMode::Normal,
            journal_mode: JournalMode::Wal,
        }
    }
}

impl SqliteConfig {
    /// In-memory database.
    pub fn memory() -> Self {
        Self::default()
    }

    /// File-based database.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            path: DatabasePath::File(path.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    /// Parse a SQLite URL such as `sqlite::memory:` or
    /// `sqlite://data/app.db?foreign_keys=false&busy_timeout=10000`.
    pub fn from_url(url: &str) -> SqliteResult<Self> {
        let parsed = ConnectionString::parse(url).map_err(|e| SqliteError::config(e.to_string()))?;
        if parsed.dialect() != quarry_query::DialectKind::Sqlite {
            return Err(SqliteError::config(format!("not a SQLite URL: {}", parsed.dialect().name())));
        }
        let mut config = if parsed.is_memory() {
            Self::memory()
        } else {
            let path = parsed
                .database()
                .ok_or_else(|| SqliteError::config("database path is required"))?;
            Self::file(path)
        };
        for (key, value) in parsed.params() {
            config.apply_option(key, value)?;
        }
        Ok(config)
    }

    /// Derive driver settings from a validated database configuration.
    pub fn from_database_config(db: &DatabaseConfig) -> SqliteResult<Self> {
        let mut config = if db.is_memory() {
            Self::memory()
        } else {
            Self::file(&db.database)
        };
        config.create_if_missing = db.auto_create_database;
        Ok(config)
    }

    fn apply_option(&mut self, key: &str, value: &str) -> SqliteResult<()> {
        let flag = || matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "on" | "yes");
        match key {
            "mode" if value == "memory" => self.path = DatabasePath::Memory,
            "mode" if value == "ro" || value == "rw" => self.create_if_missing = false,
            "mode" => {}
            "foreign_keys" => self.foreign_keys = flag(),
            "create" => self.create_if_missing = flag(),
            "busy_timeout" => {
                let ms = value
                    .parse()
                    .map_err(|_| SqliteError::config(format!("invalid busy_timeout '{}'", value)))?;
                self.busy_timeout_ms = Some(ms);
            }
            "cache_size" => {
                let size = value
                    .parse()
                    .map_err(|_| SqliteError::config(format!("invalid cache_size '{}'", value)))?;
                self.cache_size = Some(size);
            }
            "synchronous" => self.synchronous = SynchronousMode::parse(value)?,
            "journal_mode" => self.journal_mode = JournalMode::parse(value)?,
            _ => {}
        }
        Ok(())
    }

    /// Pragmas run on every new connection.
    pub fn init_sql(&self) -> String {
        let mut sql = String::new();
        sql.push_str(if self.foreign_keys {
            "PRAGMA foreign_keys = ON;\n"
        } else {
            "PRAGMA foreign_keys = OFF;\n"
        });
        if !self.path.is_memory() {
            sql.push_str(&format!("PRAGMA journal_mode = {};\n", self.journal_mode.as_pragma()));
        }
        sql.push_str(&format!("PRAGMA synchronous = {};\n", self.synchronous.as_pragma()));
        if let Some(timeout) = self.busy_timeout_ms {
            sql.push_str(&format!("PRAGMA busy_timeout = {};\n", timeout));
        }
        if let Some(cache) = self.cache_size {
            sql.push_str(&format!("PRAGMA cache_size = {};\n", cache));
        }
        sql
    }

    /// Enable or disable foreign keys.
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    /// Create the file when missing.
    pub fn create_if_missing(mut self, enabled: bool) -> Self {
        self.create_if_missing = enabled;
        self
    }

    /// Set the busy timeout in milliseconds.
    pub fn busy_timeout(mut self, ms: u32) -> Self {
        self.busy_timeout_ms = Some(ms);
        self
    }

    /// Set the synchronous mode.
    pub fn synchronous(mut self, mode: SynchronousMode) -> Self {
        self.synchronous = mode;
        self
    }

    /// Set the journal mode.
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.journal_mode = mode;
        self
    }
}
