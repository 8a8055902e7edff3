//! Error types shared by every Quarry component.
//!
//! Every failure surfaces as a [`QueryError`] carrying an [`ErrorCode`] for
//! programmatic handling plus optional context (model, field, SQL) and
//! suggestions.
//!
//! # Error Codes
//!
//! Codes render as `Q{category}{number}`:
//! - 1xxx: Query and metadata errors (invalid column, unregistered model, ...)
//! - 2xxx: Constraint violations (unique, foreign key, ...)
//! - 3xxx: Connection errors (timeout, pool)
//! - 4xxx: Transaction errors
//! - 5xxx: Execution errors (statement timeout, parameters, hooks)
//! - 6xxx: Data errors (serialization)
//! - 7xxx: Configuration errors
//! - 9xxx: Internal errors
//!
//! ```rust
//! use quarry_query::{ErrorCode, QueryError};
//!
//! let err = QueryError::invalid_column("User", "nickname");
//! assert_eq!(err.code, ErrorCode::InvalidColumn);
//! assert_eq!(err.code.code(), "Q1003");
//! assert!(err.to_string().contains("nickname"));
//! ```
//!
//! Not-found is not an error: lookups return `Option`. `RecordNotFound` is
//! reserved for operations that require a row to exist (update of a missing
//! primary key, restore of a missing row).

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Query errors (1xxx)
    /// Record required but not found (Q1001).
    RecordNotFound = 1001,
    /// Invalid filter or operator (Q1002).
    InvalidFilter = 1002,
    /// Column not declared on the model (Q1003).
    InvalidColumn = 1003,
    /// Set operation sides select different columns (Q1004).
    ShapeMismatch = 1004,
    /// Model type has not been registered (Q1005).
    ModelNotRegistered = 1005,
    /// Model type registered twice (Q1006).
    DuplicateModel = 1006,
    /// Scope name not declared on the model (Q1007).
    UnknownScope = 1007,
    /// Relation name not declared on the model (Q1008).
    UnknownRelation = 1008,
    /// Operation not valid for this query or model (Q1009).
    InvalidOperation = 1009,

    // Constraint errors (2xxx)
    /// Unique constraint violation (Q2001).
    UniqueConstraint = 2001,
    /// Foreign key constraint violation (Q2002).
    ForeignKeyConstraint = 2002,
    /// Check constraint violation (Q2003).
    CheckConstraint = 2003,
    /// Not null constraint violation (Q2004).
    NotNullConstraint = 2004,

    // Connection errors (3xxx)
    /// Database connection failed (Q3001).
    ConnectionFailed = 3001,
    /// Connection pool exhausted (Q3002).
    PoolExhausted = 3002,
    /// Timed out waiting for a connection (Q3003).
    ConnectionTimeout = 3003,
    /// Pool has been closed (Q3004).
    PoolClosed = 3004,

    // Transaction errors (4xxx)
    /// Transaction failed to begin or commit (Q4001).
    TransactionFailed = 4001,
    /// Transaction rolled back after a panic or failure (Q4002).
    TransactionAborted = 4002,
    /// Transaction handle used after completion (Q4003).
    TransactionClosed = 4003,

    // Execution errors (5xxx)
    /// Statement timeout (Q5001).
    QueryTimeout = 5001,
    /// Invalid or mismatched parameters (Q5002).
    InvalidParameter = 5002,
    /// General database error (Q5003).
    DatabaseError = 5003,
    /// A lifecycle hook rejected the operation (Q5004).
    HookAborted = 5004,

    // Data errors (6xxx)
    /// Serialization error (Q6001).
    SerializationError = 6001,
    /// Deserialization error (Q6002).
    DeserializationError = 6002,

    // Configuration errors (7xxx)
    /// Invalid configuration (Q7001).
    InvalidConfiguration = 7001,
    /// Missing configuration (Q7002).
    MissingConfiguration = 7002,
    /// Invalid connection string (Q7003).
    InvalidConnectionString = 7003,
    /// Dialect not supported (Q7004).
    UnsupportedDialect = 7004,

    // Internal errors (9xxx)
    /// Internal error (Q9001).
    Internal = 9001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "Q1001").
    pub fn code(&self) -> String {
        format!("Q{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::RecordNotFound => "Record not found",
            Self::InvalidFilter => "Invalid filter condition",
            Self::InvalidColumn => "Invalid column",
            Self::ShapeMismatch => "Set operation shape mismatch",
            Self::ModelNotRegistered => "Model not registered",
            Self::DuplicateModel => "Model already registered",
            Self::UnknownScope => "Unknown scope",
            Self::UnknownRelation => "Unknown relation",
            Self::InvalidOperation => "Invalid operation",
            Self::UniqueConstraint => "Unique constraint violation",
            Self::ForeignKeyConstraint => "Foreign key constraint violation",
            Self::CheckConstraint => "Check constraint violation",
            Self::NotNullConstraint => "Not null constraint violation",
            Self::ConnectionFailed => "Database connection failed",
            Self::PoolExhausted => "Connection pool exhausted",
            Self::ConnectionTimeout => "Connection timeout",
            Self::PoolClosed => "Connection pool closed",
            Self::TransactionFailed => "Transaction failed",
            Self::TransactionAborted => "Transaction aborted",
            Self::TransactionClosed => "Transaction already closed",
            Self::QueryTimeout => "Query timeout",
            Self::InvalidParameter => "Invalid parameter",
            Self::DatabaseError => "Database error",
            Self::HookAborted => "Hook aborted operation",
            Self::SerializationError => "Serialization error",
            Self::DeserializationError => "Deserialization error",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::MissingConfiguration => "Missing configuration",
            Self::InvalidConnectionString => "Invalid connection string",
            Self::UnsupportedDialect => "Unsupported dialect",
            Self::Internal => "Internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Additional context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation that was being performed.
    pub operation: Option<String>,
    /// The model involved.
    pub model: Option<String>,
    /// The field involved.
    pub field: Option<String>,
    /// The SQL statement (if available).
    pub sql: Option<String>,
    /// Suggestions for fixing the error.
    pub suggestions: Vec<String>,
    /// Help text.
    pub help: Option<String>,
}

/// Errors that can occur anywhere in the ORM core.
///
/// Cloning shares the source error, so a deferred builder error can be
/// reported more than once.
#[derive(Error, Debug, Clone)]
pub struct QueryError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The source error (if any).
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl QueryError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add context about the operation.
    pub fn with_context(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Add a suggestion for fixing the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context.suggestions.push(suggestion.into());
        self
    }

    /// Add help text.
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.context.help = Some(help.into());
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.context.model = Some(model.into());
        self
    }

    /// Set the field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.context.field = Some(field.into());
        self
    }

    /// Set the SQL statement.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.context.sql = Some(sql.into());
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    // ============== Constructor Functions ==============

    /// A row that had to exist was not found.
    pub fn not_found(model: impl Into<String>) -> Self {
        let model = model.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("No {} record found matching the query", model),
        )
        .with_model(&model)
        .with_suggestion(format!("Verify the {} exists before modifying it", model))
    }

    /// An unknown filter operator or malformed predicate.
    pub fn invalid_filter(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidFilter, message.into())
    }

    /// A column name that the model does not declare.
    pub fn invalid_column(model: impl Into<String>, column: impl Into<String>) -> Self {
        let model = model.into();
        let column = column.into();
        Self::new(
            ErrorCode::InvalidColumn,
            format!("Unknown column '{}' on model {}", column, model),
        )
        .with_model(&model)
        .with_field(&column)
        .with_suggestion("Check the column name against the registered model schema")
    }

    /// Two sides of a set operation select different column lists.
    pub fn shape_mismatch(left: &[String], right: &[String]) -> Self {
        Self::new(
            ErrorCode::ShapeMismatch,
            format!(
                "Set operation requires identical column lists: [{}] vs [{}]",
                left.join(", "),
                right.join(", ")
            ),
        )
        .with_suggestion("Use select() on both queries with the same columns")
    }

    /// The model type was never registered with the session registry.
    pub fn model_not_registered(model: impl Into<String>) -> Self {
        let model = model.into();
        Self::new(
            ErrorCode::ModelNotRegistered,
            format!("Model {} is not registered", model),
        )
        .with_model(&model)
        .with_suggestion(format!("Call register::<{}>() before using it", model))
    }

    /// The model type was registered twice.
    pub fn duplicate_model(model: impl Into<String>) -> Self {
        let model = model.into();
        Self::new(
            ErrorCode::DuplicateModel,
            format!("Model {} is already registered", model),
        )
        .with_model(&model)
    }

    /// A scope name the model does not declare.
    pub fn unknown_scope(model: impl Into<String>, scope: impl Into<String>) -> Self {
        let model = model.into();
        let scope = scope.into();
        Self::new(
            ErrorCode::UnknownScope,
            format!("Model {} has no scope named '{}'", model, scope),
        )
        .with_model(&model)
    }

    /// A relation name the model does not declare.
    pub fn unknown_relation(model: impl Into<String>, relation: impl Into<String>) -> Self {
        let model = model.into();
        let relation = relation.into();
        Self::new(
            ErrorCode::UnknownRelation,
            format!("Model {} has no relation named '{}'", model, relation),
        )
        .with_model(&model)
        .with_field(&relation)
    }

    /// An operation that is not valid in the current state.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidOperation, message.into())
    }

    /// Create a constraint violation error with a specific code.
    pub fn constraint_violation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message.into())
    }

    /// Create a unique constraint violation error.
    pub fn unique_violation(model: impl Into<String>, field: impl Into<String>) -> Self {
        let model = model.into();
        let field = field.into();
        Self::new(
            ErrorCode::UniqueConstraint,
            format!("Unique constraint violated on {}.{}", model, field),
        )
        .with_model(&model)
        .with_field(&field)
        .with_suggestion(format!("A record with this {} already exists", field))
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorCode::ConnectionFailed, format!("Connection error: {}", message))
            .with_suggestion("Check that the database server is running")
            .with_suggestion("Verify the connection settings are correct")
    }

    /// Timed out waiting for a pooled connection.
    pub fn connection_timeout(duration_ms: u64) -> Self {
        Self::new(
            ErrorCode::ConnectionTimeout,
            format!("Timed out after {}ms waiting for a connection", duration_ms),
        )
        .with_suggestion("Increase max_connections or acquire_timeout in the pool options")
        .with_suggestion("Ensure connections are released promptly")
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(max_connections: usize) -> Self {
        Self::new(
            ErrorCode::PoolExhausted,
            format!("Connection pool exhausted (max {} connections)", max_connections),
        )
        .with_suggestion("Increase max_connections in pool configuration")
    }

    /// The pool has been closed.
    pub fn pool_closed() -> Self {
        Self::new(ErrorCode::PoolClosed, "Connection pool is closed")
    }

    /// Create a statement timeout error.
    pub fn timeout(duration_ms: u64) -> Self {
        Self::new(
            ErrorCode::QueryTimeout,
            format!("Query timed out after {}ms", duration_ms),
        )
        .with_suggestion("Add indexes to improve query performance")
        .with_suggestion("Increase the statement timeout if the query is expected to be slow")
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorCode::TransactionFailed, format!("Transaction error: {}", message))
    }

    /// The unit of work was rolled back.
    pub fn transaction_aborted(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            ErrorCode::TransactionAborted,
            format!("Transaction aborted and rolled back: {}", message),
        )
    }

    /// The transaction handle was used after commit or rollback.
    pub fn transaction_closed() -> Self {
        Self::new(
            ErrorCode::TransactionClosed,
            "Transaction has already been committed or rolled back",
        )
        .with_help("Sessions passed to a transaction closure must not outlive it")
    }

    /// Bound parameters do not match the statement.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameter, message.into())
    }

    /// A lifecycle hook rejected the operation.
    pub fn hook_aborted(model: impl Into<String>, event: impl fmt::Display, cause: QueryError) -> Self {
        let model = model.into();
        Self::new(
            ErrorCode::HookAborted,
            format!("{} hook on {} aborted the operation: {}", event, model, cause),
        )
        .with_model(&model)
        .with_source(cause)
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializationError, message.into())
    }

    /// Create a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(
            ErrorCode::DeserializationError,
            format!("Failed to deserialize result: {}", message),
        )
        .with_suggestion("Check that the model matches the database schema")
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message.into())
    }

    /// A required configuration field was not supplied.
    pub fn missing_configuration(field: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(
            ErrorCode::MissingConfiguration,
            format!("Missing required configuration field: {}", field),
        )
        .with_field(&field)
    }

    /// The requested dialect is not supported.
    pub fn unsupported_dialect(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            ErrorCode::UnsupportedDialect,
            format!("Unsupported dialect: {}", name),
        )
        .with_suggestion("Use one of: mysql, postgres, sqlite")
    }

    /// Create a general database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorCode::Internal, format!("Internal error: {}", message))
    }

    // ============== Error Checks ==============

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::RecordNotFound
    }

    /// Check if this is a constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::UniqueConstraint
                | ErrorCode::ForeignKeyConstraint
                | ErrorCode::CheckConstraint
                | ErrorCode::NotNullConstraint
        )
    }

    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self.code, ErrorCode::QueryTimeout | ErrorCode::ConnectionTimeout)
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConnectionFailed
                | ErrorCode::PoolExhausted
                | ErrorCode::ConnectionTimeout
                | ErrorCode::PoolClosed
        )
    }

    /// Check if this is a configuration error.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::InvalidConfiguration
                | ErrorCode::MissingConfiguration
                | ErrorCode::InvalidConnectionString
                | ErrorCode::UnsupportedDialect
        )
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConnectionTimeout | ErrorCode::PoolExhausted | ErrorCode::QueryTimeout
        )
    }

    // ============== Display Functions ==============

    /// Display the full error with all context and suggestions.
    pub fn display_full(&self) -> String {
        let mut output = String::new();

        output.push_str(&format!("Error [{}]: {}\n", self.code.code(), self.message));

        if let Some(ref op) = self.context.operation {
            output.push_str(&format!("  -> While: {}\n", op));
        }
        if let Some(ref model) = self.context.model {
            output.push_str(&format!("  -> Model: {}\n", model));
        }
        if let Some(ref field) = self.context.field {
            output.push_str(&format!("  -> Field: {}\n", field));
        }

        if let Some(ref sql) = self.context.sql {
            let sql_display = if sql.chars().count() > 200 {
                format!("{}...", sql.chars().take(200).collect::<String>())
            } else {
                sql.clone()
            };
            output.push_str(&format!("  -> SQL: {}\n", sql_display));
        }

        if !self.context.suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for (i, suggestion) in self.context.suggestions.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, suggestion));
            }
        }

        if let Some(ref help) = self.context.help {
            output.push_str(&format!("\nHelp: {}\n", help));
        }

        output
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::serialization(err.to_string()).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_format() {
        assert_eq!(ErrorCode::RecordNotFound.code(), "Q1001");
        assert_eq!(ErrorCode::UniqueConstraint.code(), "Q2001");
        assert_eq!(ErrorCode::ConnectionFailed.code(), "Q3001");
        assert_eq!(ErrorCode::UnsupportedDialect.code(), "Q7004");
    }

    #[test]
    fn test_unique_violation_error() {
        let err = QueryError::unique_violation("users", "email");
        assert!(err.is_constraint_violation());
        assert_eq!(err.context.model, Some("users".to_string()));
        assert_eq!(err.context.field, Some("email".to_string()));
    }

    #[test]
    fn test_timeout_predicates() {
        assert!(QueryError::timeout(100).is_timeout());
        assert!(QueryError::connection_timeout(100).is_timeout());
        assert!(QueryError::connection_timeout(100).is_connection_error());
        assert!(!QueryError::timeout(100).is_connection_error());
    }

    #[test]
    fn test_configuration_predicates() {
        assert!(QueryError::unsupported_dialect("oracle").is_configuration_error());
        assert!(QueryError::missing_configuration("host").is_configuration_error());
        assert!(!QueryError::database("boom").is_configuration_error());
    }

    #[test]
    fn test_hook_aborted_keeps_cause() {
        let cause = QueryError::invalid_parameter("name is empty");
        let err = QueryError::hook_aborted("User", "before_create", cause);
        assert_eq!(err.code, ErrorCode::HookAborted);
        assert!(err.message.contains("name is empty"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_display_full() {
        let err = QueryError::invalid_column("User", "nickname")
            .with_sql("SELECT \"nickname\" FROM \"users\"")
            .with_context("compile");
        let output = err.display_full();
        assert!(output.contains("Q1003"));
        assert!(output.contains("While: compile"));
        assert!(output.contains("SQL: SELECT"));
        assert!(output.contains("Suggestions:"));
    }
}
