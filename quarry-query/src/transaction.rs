//! Transactions with async closures and savepoints.
//!
//! [`Session::transaction`] checks out one pooled connection, begins a
//! transaction on it and hands the closure a [`Session`] bound to that
//! connection:
//!
//! - `Ok` commits
//! - `Err` rolls back and returns the closure's error unchanged
//! - a panic is caught, rolled back and reported as `TransactionAborted`
//!
//! Calling `transaction` again on a transactional session opens a
//! savepoint instead, so a failing inner block can be undone without
//! abandoning the outer one.
//!
//! ```rust
//! use quarry_query::transaction::{IsolationLevel, TransactionOptions};
//!
//! let options = TransactionOptions::new().isolation(IsolationLevel::Serializable);
//! assert_eq!(options.isolation, Some(IsolationLevel::Serializable));
//! assert_eq!(IsolationLevel::ReadCommitted.as_sql(), "READ COMMITTED");
//! ```
//!
//! ```rust,ignore
//! let user = session
//!     .transaction(|tx| async move {
//!         let mut user = User::new("ada");
//!         tx.repository::<User>()?.save(&mut user).await?;
//!         tx.raw("UPDATE stats SET users = users + 1").execute().await?;
//!         Ok::<_, QueryError>(user)
//!     })
//!     .await?;
//! ```

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use futures::FutureExt;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::connection::PooledConnection;
use crate::error::QueryError;
use crate::session::{Executor, Session};

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Dirty reads allowed.
    ReadUncommitted,
    /// Only committed data is visible.
    ReadCommitted,
    /// Rows read once read the same again.
    RepeatableRead,
    /// Full serializability.
    Serializable,
}

impl IsolationLevel {
    /// SQL spelling.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Options for a top-level transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Isolation level; `None` keeps the server default.
    pub isolation: Option<IsolationLevel>,
}

impl TransactionOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = Some(level);
        self
    }
}

/// The connection owned by an open transaction.
///
/// Statements take the async mutex in turn, so concurrent use of one
/// transactional session is serialized. Once the transaction ends the slot
/// is empty and every statement fails with `TransactionClosed`. A handle
/// dropped with the slot still full (the caller's future was cancelled)
/// rolls back in the background before the connection is released.
pub(crate) struct TransactionHandle {
    conn: Mutex<Option<PooledConnection>>,
    savepoints: AtomicU32,
    closed: AtomicBool,
}

impl TransactionHandle {
    fn new(conn: PooledConnection) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            savepoints: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, Option<PooledConnection>> {
        self.conn.lock().await
    }

    fn next_savepoint(&self) -> String {
        format!("quarry_sp_{}", self.savepoints.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run `COMMIT` or `ROLLBACK` and release the connection. A failed
    /// commit is followed by a rollback; a connection whose rollback fails
    /// is discarded.
    ///
    /// The connection stays in the slot until the outcome is known, so a
    /// cancelled `finish` still leaves the rollback to `Drop`.
    async fn finish(&self, session: &Session, commit: bool) -> Result<(), QueryError> {
        let mut guard = self.conn.lock().await;
        self.closed.store(true, Ordering::Release);
        let Some(conn) = guard.as_mut() else {
            return Err(QueryError::transaction_closed());
        };

        let outcome = if commit {
            match session.run_statement_on(conn, "COMMIT").await {
                Ok(()) => {
                    debug!("Transaction committed");
                    Ok(())
                }
                Err(err) => {
                    warn!(error = %err, "Commit failed, rolling back");
                    if session.run_statement_on(conn, "ROLLBACK").await.is_err() {
                        conn.mark_broken();
                    }
                    Err(QueryError::transaction(format!("commit failed: {}", err.message)).with_source(err))
                }
            }
        } else {
            let rolled_back = session.run_statement_on(conn, "ROLLBACK").await;
            if let Err(err) = &rolled_back {
                warn!(error = %err, "Rollback failed, discarding connection");
                conn.mark_broken();
            } else {
                debug!("Transaction rolled back");
            }
            rolled_back
        };
        guard.take();
        outcome
    }
}

impl Drop for TransactionHandle {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.get_mut().take() else {
            return;
        };
        warn!("Transaction abandoned before completion, rolling back");
        // The loan, and with it the pool permit, lasts until the rollback
        // has run, so no other caller can observe the open transaction.
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(err) = conn.execute_batch("ROLLBACK").await {
                        warn!(error = %err, "Rollback of abandoned transaction failed, discarding connection");
                        conn.mark_broken();
                    }
                });
            }
            Err(_) => conn.mark_broken(),
        }
    }
}

impl Session {
    /// Run `f` inside a transaction with default options.
    ///
    /// On a session that is already transactional this opens a savepoint.
    pub async fn transaction<F, Fut, R, E>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<QueryError>,
    {
        self.transaction_with(TransactionOptions::default(), f).await
    }

    /// Run `f` inside a transaction with explicit options. Options are
    /// ignored for savepoints.
    pub async fn transaction_with<F, Fut, R, E>(&self, options: TransactionOptions, f: F) -> Result<R, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<QueryError>,
    {
        match &self.executor {
            Executor::Transaction(handle) => self.savepoint(handle.clone(), f).await,
            Executor::Pool => self.top_level(options, f).await,
        }
    }

    async fn top_level<F, Fut, R, E>(&self, options: TransactionOptions, f: F) -> Result<R, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<QueryError>,
    {
        let handle = Arc::new(TransactionHandle::new(self.pool().acquire().await?));
        let begun = {
            let mut guard = handle.lock().await;
            let mut begun = Ok(());
            if let Some(conn) = guard.as_mut() {
                for statement in self.dialect().begin_transaction(options.isolation) {
                    begun = self.run_statement_on(conn, &statement).await;
                    if begun.is_err() {
                        break;
                    }
                }
            }
            begun
        };
        if let Err(err) = begun {
            let _ = handle.finish(self, false).await;
            return Err(err.into());
        }
        debug!(isolation = ?options.isolation, "Transaction started");

        let tx = self.with_executor(Executor::Transaction(handle.clone()));

        match AssertUnwindSafe(f(tx)).catch_unwind().await {
            Ok(Ok(value)) => {
                handle.finish(self, true).await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                let _ = handle.finish(self, false).await;
                Err(err)
            }
            Err(panic) => {
                let _ = handle.finish(self, false).await;
                Err(QueryError::transaction_aborted(panic_message(&*panic)).into())
            }
        }
    }

    async fn savepoint<F, Fut, R, E>(&self, handle: Arc<TransactionHandle>, f: F) -> Result<R, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<QueryError>,
    {
        if handle.is_closed() {
            return Err(QueryError::transaction_closed().into());
        }
        let name = handle.next_savepoint();
        self.execute_batch(&format!("SAVEPOINT {}", name)).await?;
        debug!(savepoint = %name, "Savepoint created");

        match AssertUnwindSafe(f(self.clone())).catch_unwind().await {
            Ok(Ok(value)) => {
                self.execute_batch(&format!("RELEASE SAVEPOINT {}", name)).await?;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.rollback_to(&name).await;
                Err(err)
            }
            Err(panic) => {
                self.rollback_to(&name).await;
                Err(QueryError::transaction_aborted(panic_message(&*panic)).into())
            }
        }
    }

    async fn rollback_to(&self, name: &str) {
        let undo = format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}");
        if let Err(err) = self.execute_batch(&undo).await {
            warn!(savepoint = %name, error = %err, "Failed to roll back savepoint");
        } else {
            debug!(savepoint = %name, "Savepoint rolled back");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic inside transaction".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_isolation_level_sql() {
        assert_eq!(IsolationLevel::ReadUncommitted.as_sql(), "READ UNCOMMITTED");
        assert_eq!(IsolationLevel::RepeatableRead.as_sql(), "REPEATABLE READ");
    }

    #[test]
    fn test_options_default_keeps_server_isolation() {
        assert_eq!(TransactionOptions::new().isolation, None);
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(&*boxed), "panic: boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bad"));
        assert_eq!(panic_message(&*boxed), "panic: bad");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*boxed), "panic inside transaction");
    }
}
