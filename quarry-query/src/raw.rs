//! Raw SQL escape hatch.
//!
//! Raw statements are written with `?` markers regardless of dialect; the
//! markers are rewritten to the session dialect's placeholder style and
//! their count is checked against the bound values before anything runs.
//! Values are always sent as parameters, never spliced into the text.
//!
//! ```rust,ignore
//! #[derive(Deserialize)]
//! struct Total {
//!     author_id: i64,
//!     total: i64,
//! }
//!
//! let totals: Vec<Total> = session
//!     .raw("SELECT author_id, COUNT(*) AS total FROM articles WHERE published = ? GROUP BY author_id")
//!     .bind(true)
//!     .find()
//!     .await?;
//! ```

use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::connection::ExecuteResult;
use crate::error::QueryResult;
use crate::record::Record;
use crate::session::Session;
use crate::sql::{CompiledQuery, SqlWriter};
use crate::value::Value;

/// A raw SQL statement bound to a session.
#[derive(Debug, Clone)]
pub struct RawQuery {
    session: Session,
    sql: String,
    params: Vec<Value>,
    timeout: Option<Duration>,
}

impl RawQuery {
    pub(crate) fn new(session: Session, sql: impl Into<String>) -> Self {
        Self {
            session,
            sql: sql.into(),
            params: Vec::new(),
            timeout: None,
        }
    }

    /// Bind the next `?` marker.
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }

    /// Bind several markers at once.
    pub fn bind_all<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.params.extend(values.into_iter().map(Into::into));
        self
    }

    /// Per-statement timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The statement as it will be sent, in the session's dialect.
    pub fn compile(&self) -> QueryResult<CompiledQuery> {
        let mut writer = SqlWriter::new(self.session.dialect().as_ref());
        writer.push_raw(&self.sql, &self.params)?;
        Ok(writer.finish())
    }

    /// Run and decode each row.
    pub async fn find<R: DeserializeOwned>(self) -> QueryResult<Vec<R>> {
        self.find_records().await?.into_iter().map(Record::decode).collect()
    }

    /// Run and return generic records.
    pub async fn find_records(self) -> QueryResult<Vec<Record>> {
        let compiled = self.compile()?;
        self.session.fetch(&compiled, self.timeout).await
    }

    /// Run a statement that returns no rows.
    pub async fn execute(self) -> QueryResult<ExecuteResult> {
        let compiled = self.compile()?;
        self.session.execute(&compiled, self.timeout).await
    }
}
