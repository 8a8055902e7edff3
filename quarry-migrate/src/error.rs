//! Error types for schema management.

use quarry_query::QueryError;
use thiserror::Error;

/// Result type alias for schema operations.
pub type MigrateResult<T> = Result<T, MigrationError>;

/// Errors raised while generating or applying DDL.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// An identifier exceeds what the dialect accepts.
    #[error("Identifier '{identifier}' is {length} characters long; {dialect} allows at most {max}")]
    IdentifierTooLong {
        /// The offending identifier.
        identifier: String,
        /// Its length.
        length: usize,
        /// Dialect limit.
        max: usize,
        /// Dialect name.
        dialect: &'static str,
    },

    /// The statement failed in the database.
    #[error(transparent)]
    Query(#[from] QueryError),
}

impl MigrationError {
    /// Whether the error came from the database rather than DDL generation.
    pub fn is_database_error(&self) -> bool {
        matches!(self, Self::Query(_))
    }
}

impl From<MigrationError> for QueryError {
    fn from(err: MigrationError) -> Self {
        match err {
            MigrationError::Query(inner) => inner,
            MigrationError::IdentifierTooLong { ref identifier, .. } => {
                let field = identifier.clone();
                QueryError::invalid_operation(err.to_string())
                    .with_context("generate DDL")
                    .with_field(field)
                    .with_suggestion("Use a shorter table or column name")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_query::ErrorCode;

    #[test]
    fn test_identifier_error_converts() {
        let err = MigrationError::IdentifierTooLong {
            identifier: "x".repeat(70),
            length: 70,
            max: 63,
            dialect: "postgres",
        };
        assert!(err.to_string().contains("at most 63"));
        let query: QueryError = err.into();
        assert_eq!(query.code, ErrorCode::InvalidOperation);
    }

    #[test]
    fn test_query_error_passes_through() {
        let err: MigrationError = QueryError::database("no such table").into();
        assert!(err.is_database_error());
        let back: QueryError = err.into();
        assert_eq!(back.code, ErrorCode::DatabaseError);
    }
}
