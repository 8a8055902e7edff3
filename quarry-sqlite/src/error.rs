//! Error types for SQLite operations.

use quarry_query::{ErrorCode, QueryError};
use rusqlite::ffi;
use thiserror::Error;

/// Result type for SQLite operations.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Error type for SQLite operations.
#[derive(Error, Debug)]
pub enum SqliteError {
    /// Error reported by the SQLite engine.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),

    /// Invalid driver configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Opening the database failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A value could not be converted to or from SQLite.
    #[error("Type conversion error: {0}")]
    TypeConversion(String),
}

impl SqliteError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a type conversion error.
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    /// The engine's extended result code, if this came from SQLite.
    pub fn extended_code(&self) -> Option<i32> {
        match self {
            Self::Sqlite(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))) => {
                Some(e.extended_code)
            }
            _ => None,
        }
    }

    /// The engine's own message, without the wrapper formatting.
    pub fn engine_message(&self) -> Option<&str> {
        match self {
            Self::Sqlite(tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(_, Some(msg)))) => {
                Some(msg.as_str())
            }
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SqliteError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(tokio_rusqlite::Error::Rusqlite(err))
    }
}

impl From<SqliteError> for QueryError {
    fn from(err: SqliteError) -> Self {
        let constraint = match err.extended_code() {
            Some(ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY) => {
                Some(ErrorCode::UniqueConstraint)
            }
            Some(ffi::SQLITE_CONSTRAINT_FOREIGNKEY) => Some(ErrorCode::ForeignKeyConstraint),
            Some(ffi::SQLITE_CONSTRAINT_NOTNULL) => Some(ErrorCode::NotNullConstraint),
            Some(ffi::SQLITE_CONSTRAINT_CHECK) => Some(ErrorCode::CheckConstraint),
            _ => None,
        };
        if let Some(code) = constraint {
            let message = err.engine_message().map_or_else(|| err.to_string(), str::to_string);
            let mut mapped = QueryError::constraint_violation(code, message.clone());
            if let Some(field) = constrained_column(&message) {
                mapped = mapped.with_field(field);
            }
            return mapped.with_source(err);
        }

        match err {
            SqliteError::Sqlite(tokio_rusqlite::Error::ConnectionClosed) => {
                QueryError::connection("SQLite connection closed")
            }
            SqliteError::Sqlite(e) => QueryError::database(e.to_string()).with_source(e),
            SqliteError::Config(msg) => QueryError::configuration(msg),
            SqliteError::Connection(msg) => QueryError::connection(msg),
            SqliteError::TypeConversion(msg) => QueryError::serialization(msg),
        }
    }
}

// SQLite reports "UNIQUE constraint failed: users.email"; take the first
// column after the table prefix.
fn constrained_column(message: &str) -> Option<&str> {
    let (_, detail) = message.split_once("constraint failed: ")?;
    let first = detail.split(',').next()?.trim();
    Some(first.rsplit('.').next().unwrap_or(first))
}
