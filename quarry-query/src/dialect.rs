//! SQL dialect abstraction.
//!
//! A [`Dialect`] turns logical operations (placeholders, identifier quoting,
//! random ordering, JSON extraction, full-text search, column types) into
//! engine-specific SQL fragments. The query compiler and DDL generator only
//! ever talk to this trait; they never match on which engine is in use.
//!
//! ```rust
//! use quarry_query::dialect::DialectFactory;
//!
//! let pg = DialectFactory::create("postgres").unwrap();
//! assert_eq!(pg.placeholder(2), "$2");
//! assert_eq!(pg.quote_identifier("users"), "\"users\"");
//!
//! assert!(DialectFactory::create("oracle").is_err());
//! ```

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::error::{QueryError, QueryResult};
use crate::metadata::LogicalType;
use crate::transaction::IsolationLevel;

/// Capability flags advertised by a dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// `INSERT ... RETURNING` is available.
    pub supports_returning: bool,
    /// Some form of upsert is available.
    pub supports_upsert: bool,
    /// `SELECT ... FOR UPDATE` row locking is available.
    pub supports_for_update: bool,
    /// Longest identifier the engine accepts.
    pub max_identifier_length: usize,
}

/// Known dialect families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DialectKind {
    /// MySQL / MariaDB.
    MySql,
    /// PostgreSQL.
    Postgres,
    /// SQLite.
    Sqlite,
}

impl DialectKind {
    /// Canonical dialect name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
        }
    }

    /// Parse a dialect identifier, accepting common aliases.
    pub fn parse(name: &str) -> QueryResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            other => Err(QueryError::unsupported_dialect(other)),
        }
    }

    /// Default network port, if the engine has one.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::MySql => Some(3306),
            Self::Postgres => Some(5432),
            Self::Sqlite => None,
        }
    }
}

impl fmt::Display for DialectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Engine-specific SQL fragment generation.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// Which family this dialect belongs to.
    fn kind(&self) -> DialectKind;

    /// Dialect name.
    fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Placeholder for the 1-based parameter `index`.
    fn placeholder(&self, index: usize) -> Cow<'static, str>;

    /// Quote an identifier, escaping embedded quote characters.
    fn quote_identifier(&self, ident: &str) -> String;

    /// Function producing a random value for `ORDER BY`.
    fn random_function(&self) -> &'static str;

    /// Expression for the current date.
    fn date_function(&self) -> &'static str;

    /// Expression extracting `path` (dotted, optionally `$.`-prefixed) from a
    /// JSON column as text.
    fn json_extract(&self, column: &str, path: &str) -> String;

    /// Full-text predicate matching `column` against the bound term at
    /// `placeholder`.
    fn full_text_search(&self, column: &str, placeholder: &str) -> String;

    /// Column type for a logical type.
    fn column_type(&self, ty: LogicalType) -> &'static str;

    /// Full column definition tail for an auto-increment primary key,
    /// following the quoted column name.
    fn auto_increment_primary_key(&self, ty: LogicalType) -> String;

    /// Literal for a boolean default.
    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "TRUE" } else { "FALSE" }
    }

    /// Capability flags.
    fn capabilities(&self) -> Capabilities;

    /// Parameterized query returning one row with a `cnt` column that is
    /// non-zero when the table bound to the first parameter exists.
    fn table_exists_sql(&self) -> String;

    /// Statements that open a transaction.
    fn begin_transaction(&self, isolation: Option<IsolationLevel>) -> Vec<String> {
        match isolation {
            Some(level) => vec![format!("BEGIN ISOLATION LEVEL {}", level.as_sql())],
            None => vec!["BEGIN".to_string()],
        }
    }

    /// `LIMIT`/`OFFSET` tail with values inlined, or `None` when neither is
    /// set.
    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String> {
        match (limit, offset) {
            (None, None) => None,
            (Some(l), None) => Some(format!("LIMIT {}", l)),
            (None, Some(o)) => Some(format!("OFFSET {}", o)),
            (Some(l), Some(o)) => Some(format!("LIMIT {} OFFSET {}", l, o)),
        }
    }

    /// Row-locking suffix, if supported.
    fn for_update_clause(&self) -> Option<&'static str> {
        if self.capabilities().supports_for_update {
            Some("FOR UPDATE")
        } else {
            None
        }
    }
}

fn json_path_segments(path: &str) -> Vec<&str> {
    let trimmed = path.trim_start_matches('$').trim_start_matches('.');
    trimmed.split('.').filter(|s| !s.is_empty()).collect()
}

// Body of a single-quoted SQL string literal.
fn string_literal_body(text: &str) -> String {
    text.replace('\'', "''")
}

fn json_dollar_path(path: &str) -> String {
    let segments = json_path_segments(path);
    if segments.is_empty() {
        "$".to_string()
    } else {
        format!("$.{}", segments.join("."))
    }
}

/// MySQL / MariaDB.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySql;

impl Dialect for MySql {
    fn kind(&self) -> DialectKind {
        DialectKind::MySql
    }

    fn placeholder(&self, _index: usize) -> Cow<'static, str> {
        Cow::Borrowed("?")
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("`{}`", ident.replace('`', "``"))
    }

    fn random_function(&self) -> &'static str {
        "RAND()"
    }

    fn date_function(&self) -> &'static str {
        "CURDATE()"
    }

    fn json_extract(&self, column: &str, path: &str) -> String {
        format!(
            "JSON_UNQUOTE(JSON_EXTRACT({}, '{}'))",
            self.quote_identifier(column),
            // Backslash is an escape character in MySQL string literals.
            string_literal_body(&json_dollar_path(path).replace('\\', "\\\\"))
        )
    }

    fn full_text_search(&self, column: &str, placeholder: &str) -> String {
        format!(
            "MATCH({}) AGAINST({} IN NATURAL LANGUAGE MODE)",
            self.quote_identifier(column),
            placeholder
        )
    }

    fn column_type(&self, ty: LogicalType) -> &'static str {
        match ty {
            LogicalType::Integer => "INT",
            LogicalType::BigInt => "BIGINT",
            LogicalType::Float => "DOUBLE",
            LogicalType::Boolean => "TINYINT(1)",
            LogicalType::String => "VARCHAR(255)",
            LogicalType::Text => "TEXT",
            LogicalType::DateTime => "DATETIME(6)",
            LogicalType::Json => "JSON",
            LogicalType::Uuid => "CHAR(36)",
            LogicalType::Bytes => "BLOB",
        }
    }

    fn auto_increment_primary_key(&self, ty: LogicalType) -> String {
        format!("{} NOT NULL AUTO_INCREMENT PRIMARY KEY", self.column_type(ty))
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_returning: false,
            supports_upsert: true,
            supports_for_update: true,
            max_identifier_length: 64,
        }
    }

    fn table_exists_sql(&self) -> String {
        "SELECT COUNT(*) AS cnt FROM information_schema.tables \
         WHERE table_schema = DATABASE() AND table_name = ?"
            .to_string()
    }

    fn begin_transaction(&self, isolation: Option<IsolationLevel>) -> Vec<String> {
        let mut statements = Vec::new();
        if let Some(level) = isolation {
            statements.push(format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()));
        }
        statements.push("START TRANSACTION".to_string());
        statements
    }

    // OFFSET requires a LIMIT; the documented idiom is the largest u64.
    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String> {
        match (limit, offset) {
            (None, Some(o)) => Some(format!("LIMIT {} OFFSET {}", u64::MAX, o)),
            (Some(l), Some(o)) => Some(format!("LIMIT {} OFFSET {}", l, o)),
            (Some(l), None) => Some(format!("LIMIT {}", l)),
            (None, None) => None,
        }
    }
}

/// PostgreSQL.
#[derive(Debug, Clone, Copy, Default)]
pub struct Postgres;

impl Dialect for Postgres {
    fn kind(&self) -> DialectKind {
        DialectKind::Postgres
    }

    fn placeholder(&self, index: usize) -> Cow<'static, str> {
        Cow::Owned(format!("${}", index))
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn random_function(&self) -> &'static str {
        "RANDOM()"
    }

    fn date_function(&self) -> &'static str {
        "CURRENT_DATE"
    }

    fn json_extract(&self, column: &str, path: &str) -> String {
        let segments = json_path_segments(path);
        let column = self.quote_identifier(column);
        match segments.as_slice() {
            [single] => format!("{}->>'{}'", column, string_literal_body(single)),
            _ => format!("{}#>>'{{{}}}'", column, string_literal_body(&segments.join(","))),
        }
    }

    fn full_text_search(&self, column: &str, placeholder: &str) -> String {
        format!(
            "to_tsvector('english', {}) @@ plainto_tsquery('english', {})",
            self.quote_identifier(column),
            placeholder
        )
    }

    fn column_type(&self, ty: LogicalType) -> &'static str {
        match ty {
            LogicalType::Integer => "INTEGER",
            LogicalType::BigInt => "BIGINT",
            LogicalType::Float => "DOUBLE PRECISION",
            LogicalType::Boolean => "BOOLEAN",
            LogicalType::String => "VARCHAR(255)",
            LogicalType::Text => "TEXT",
            LogicalType::DateTime => "TIMESTAMPTZ",
            LogicalType::Json => "JSONB",
            LogicalType::Uuid => "UUID",
            LogicalType::Bytes => "BYTEA",
        }
    }

    fn auto_increment_primary_key(&self, ty: LogicalType) -> String {
        match ty {
            LogicalType::Integer => "SERIAL PRIMARY KEY".to_string(),
            _ => "BIGSERIAL PRIMARY KEY".to_string(),
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_returning: true,
            supports_upsert: true,
            supports_for_update: true,
            max_identifier_length: 63,
        }
    }

    fn table_exists_sql(&self) -> String {
        "SELECT COUNT(*) AS cnt FROM information_schema.tables \
         WHERE table_schema = current_schema() AND table_name = $1"
            .to_string()
    }
}

/// SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sqlite;

impl Dialect for Sqlite {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite
    }

    fn placeholder(&self, _index: usize) -> Cow<'static, str> {
        Cow::Borrowed("?")
    }

    fn quote_identifier(&self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }

    fn random_function(&self) -> &'static str {
        "RANDOM()"
    }

    fn date_function(&self) -> &'static str {
        "DATE('now')"
    }

    fn json_extract(&self, column: &str, path: &str) -> String {
        format!(
            "json_extract({}, '{}')",
            self.quote_identifier(column),
            string_literal_body(&json_dollar_path(path))
        )
    }

    // No FTS virtual table is assumed; substring matching keeps the predicate
    // usable on plain tables.
    fn full_text_search(&self, column: &str, placeholder: &str) -> String {
        format!(
            "{} LIKE '%' || {} || '%'",
            self.quote_identifier(column),
            placeholder
        )
    }

    fn column_type(&self, ty: LogicalType) -> &'static str {
        match ty {
            LogicalType::Integer | LogicalType::BigInt | LogicalType::Boolean => "INTEGER",
            LogicalType::Float => "REAL",
            LogicalType::String
            | LogicalType::Text
            | LogicalType::DateTime
            | LogicalType::Json
            | LogicalType::Uuid => "TEXT",
            LogicalType::Bytes => "BLOB",
        }
    }

    fn auto_increment_primary_key(&self, _ty: LogicalType) -> String {
        "INTEGER PRIMARY KEY AUTOINCREMENT".to_string()
    }

    fn bool_literal(&self, value: bool) -> &'static str {
        if value { "1" } else { "0" }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_returning: true,
            supports_upsert: true,
            supports_for_update: false,
            max_identifier_length: 1024,
        }
    }

    fn table_exists_sql(&self) -> String {
        "SELECT COUNT(*) AS cnt FROM sqlite_master WHERE type = 'table' AND name = ?".to_string()
    }

    // Take the write lock up front so concurrent writers queue on
    // busy_timeout instead of failing at their first write.
    fn begin_transaction(&self, _isolation: Option<IsolationLevel>) -> Vec<String> {
        vec!["BEGIN IMMEDIATE".to_string()]
    }

    fn limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> Option<String> {
        match (limit, offset) {
            (None, Some(o)) => Some(format!("LIMIT -1 OFFSET {}", o)),
            (Some(l), Some(o)) => Some(format!("LIMIT {} OFFSET {}", l, o)),
            (Some(l), None) => Some(format!("LIMIT {}", l)),
            (None, None) => None,
        }
    }
}

/// Constructs dialects by name.
pub struct DialectFactory;

impl DialectFactory {
    /// Create a dialect from an identifier such as `"postgres"`.
    ///
    /// Unknown identifiers fail here, never later at query time.
    pub fn create(name: &str) -> QueryResult<Arc<dyn Dialect>> {
        Ok(Self::for_kind(DialectKind::parse(name)?))
    }

    /// Create a dialect for a known family.
    pub fn for_kind(kind: DialectKind) -> Arc<dyn Dialect> {
        match kind {
            DialectKind::MySql => Arc::new(MySql),
            DialectKind::Postgres => Arc::new(Postgres),
            DialectKind::Sqlite => Arc::new(Sqlite),
        }
    }

    /// Names accepted by [`DialectFactory::create`].
    pub fn available_dialects() -> &'static [&'static str] {
        &["mysql", "postgres", "sqlite"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_placeholders() {
        assert_eq!(Postgres.placeholder(3), "$3");
        assert_eq!(MySql.placeholder(3), "?");
        assert_eq!(Sqlite.placeholder(3), "?");
    }

    #[test]
    fn test_quote_identifier_escapes() {
        assert_eq!(Postgres.quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(MySql.quote_identifier("order"), "`order`");
    }

    #[test]
    fn test_helpers() {
        assert_eq!(MySql.random_function(), "RAND()");
        assert_eq!(Sqlite.date_function(), "DATE('now')");
        assert_eq!(
            Sqlite.json_extract("meta", "$.tags.first"),
            "json_extract(\"meta\", '$.tags.first')"
        );
        assert_eq!(Postgres.json_extract("meta", "name"), "\"meta\"->>'name'");
        assert_eq!(
            Postgres.json_extract("meta", "a.b"),
            "\"meta\"#>>'{a,b}'"
        );
        assert_eq!(
            MySql.full_text_search("content", "?"),
            "MATCH(`content`) AGAINST(? IN NATURAL LANGUAGE MODE)"
        );
    }

    #[test]
    fn test_json_path_quotes_are_escaped() {
        let hostile = "a'); DROP TABLE users; --";
        assert_eq!(
            Sqlite.json_extract("meta", hostile),
            "json_extract(\"meta\", '$.a''); DROP TABLE users; --')"
        );
        assert_eq!(
            Postgres.json_extract("meta", "o'neil"),
            "\"meta\"->>'o''neil'"
        );
        assert_eq!(
            Postgres.json_extract("meta", "x.o'neil"),
            "\"meta\"#>>'{x,o''neil}'"
        );
        assert_eq!(
            MySql.json_extract("meta", "a\\'b"),
            "JSON_UNQUOTE(JSON_EXTRACT(`meta`, '$.a\\\\''b'))"
        );
    }

    #[test]
    fn test_factory() {
        assert_eq!(DialectFactory::create("PostgreSQL").unwrap().kind(), DialectKind::Postgres);
        assert_eq!(DialectFactory::create("mariadb").unwrap().kind(), DialectKind::MySql);
        let err = DialectFactory::create("oracle").unwrap_err();
        assert_eq!(err.code, ErrorCode::UnsupportedDialect);
        assert_eq!(DialectFactory::available_dialects().len(), 3);
    }

    #[test]
    fn test_for_update_capability() {
        assert_eq!(Sqlite.for_update_clause(), None);
        assert_eq!(Postgres.for_update_clause(), Some("FOR UPDATE"));
    }

    #[test]
    fn test_limit_offset() {
        assert_eq!(Postgres.limit_offset(None, None), None);
        assert_eq!(Postgres.limit_offset(None, Some(5)).as_deref(), Some("OFFSET 5"));
        assert_eq!(Sqlite.limit_offset(None, Some(5)).as_deref(), Some("LIMIT -1 OFFSET 5"));
        assert_eq!(Sqlite.limit_offset(Some(2), Some(5)).as_deref(), Some("LIMIT 2 OFFSET 5"));
        assert_eq!(
            MySql.limit_offset(None, Some(1)).as_deref(),
            Some("LIMIT 18446744073709551615 OFFSET 1")
        );
    }

    #[test]
    fn test_begin_transaction() {
        assert_eq!(
            MySql.begin_transaction(Some(IsolationLevel::Serializable)),
            vec![
                "SET TRANSACTION ISOLATION LEVEL SERIALIZABLE".to_string(),
                "START TRANSACTION".to_string()
            ]
        );
        assert_eq!(Sqlite.begin_transaction(None), vec!["BEGIN IMMEDIATE".to_string()]);
    }
}
