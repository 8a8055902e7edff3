//! Generic connection pool.
//!
//! A semaphore bounds the number of connections in use; returned
//! connections go back to an idle queue capped at `max_idle` and are reused
//! until they exceed their idle timeout or maximum lifetime. Connections are
//! opened lazily.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, trace};

use super::{ConnectionManager, DriverConnection, PoolOptions};
use crate::error::{QueryError, QueryResult};

struct IdleConnection {
    conn: Box<dyn DriverConnection>,
    created_at: Instant,
    last_used: Instant,
}

/// Statistics about pool usage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections currently handed out.
    pub in_use: usize,
    /// Idle connections ready for reuse.
    pub idle: usize,
    /// Connections opened over the pool's lifetime.
    pub opens: u64,
    /// Acquisitions served by an idle connection.
    pub reuses: u64,
    /// Idle connections dropped for exceeding their timeouts.
    pub expirations: u64,
}

struct PoolInner {
    manager: Box<dyn ConnectionManager>,
    options: PoolOptions,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection>>,
    stats: Mutex<PoolStatus>,
    closed: AtomicBool,
}

/// A bounded pool of driver connections. Cloning shares the pool.
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    /// Create a pool. No connection is opened until the first acquire.
    ///
    /// The manager's connection hint, if lower, caps `max_connections`.
    pub fn new(manager: impl ConnectionManager, options: PoolOptions) -> QueryResult<Self> {
        options.validate()?;
        let mut options = options;
        if let Some(hint) = manager.max_connections_hint() {
            options.max_connections = options.max_connections.min(hint.max(1));
            options.max_idle = options.max_idle.min(options.max_connections);
        }
        info!(
            max_connections = options.max_connections,
            max_idle = options.max_idle,
            "Connection pool created"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                manager: Box::new(manager),
                semaphore: Arc::new(Semaphore::new(options.max_connections)),
                idle: Mutex::new(VecDeque::with_capacity(options.max_idle)),
                stats: Mutex::new(PoolStatus::default()),
                closed: AtomicBool::new(false),
                options,
            }),
        })
    }

    /// Effective pool options.
    pub fn options(&self) -> &PoolOptions {
        &self.inner.options
    }

    /// Acquire a connection, waiting up to `acquire_timeout` for a free slot.
    pub async fn acquire(&self) -> QueryResult<PooledConnection> {
        if self.is_closed() {
            return Err(QueryError::pool_closed());
        }
        trace!("Acquiring connection from pool");

        let timeout = self.inner.options.acquire_timeout;
        let permit = match tokio::time::timeout(timeout, self.inner.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(QueryError::pool_closed()),
            Err(_) => {
                debug!(timeout_ms = timeout.as_millis() as u64, "Timed out waiting for a connection");
                return Err(QueryError::connection_timeout(timeout.as_millis() as u64));
            }
        };

        if let Some(idle) = self.take_idle() {
            self.inner.stats.lock().in_use += 1;
            return Ok(PooledConnection {
                conn: Some(idle.conn),
                created_at: idle.created_at,
                broken: false,
                pool: self.inner.clone(),
                _permit: permit,
            });
        }

        debug!("No idle connections, opening new connection");
        let conn = self.inner.manager.connect().await?;
        {
            let mut stats = self.inner.stats.lock();
            stats.opens += 1;
            stats.in_use += 1;
        }
        Ok(PooledConnection {
            conn: Some(conn),
            created_at: Instant::now(),
            broken: false,
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    fn take_idle(&self) -> Option<IdleConnection> {
        let options = &self.inner.options;
        let mut idle = self.inner.idle.lock();
        while let Some(candidate) = idle.pop_front() {
            let lifetime_expired = options
                .max_lifetime
                .is_some_and(|max| candidate.created_at.elapsed() > max);
            let idle_expired = options
                .idle_timeout
                .is_some_and(|max| candidate.last_used.elapsed() > max);
            if lifetime_expired || idle_expired {
                self.inner.stats.lock().expirations += 1;
                continue;
            }
            self.inner.stats.lock().reuses += 1;
            return Some(candidate);
        }
        None
    }

    /// Current usage.
    pub fn status(&self) -> PoolStatus {
        let mut status = self.inner.stats.lock().clone();
        status.idle = self.inner.idle.lock().len();
        status
    }

    /// Close the pool: idle connections are dropped and further acquires
    /// fail with `PoolClosed`. Connections in use are dropped when returned.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            self.inner.semaphore.close();
            self.inner.idle.lock().clear();
            info!("Connection pool closed");
        }
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("options", &self.inner.options)
            .field("status", &self.status())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A connection on loan from a [`Pool`]; returned on drop.
pub struct PooledConnection {
    conn: Option<Box<dyn DriverConnection>>,
    created_at: Instant,
    broken: bool,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Discard the connection instead of returning it to the pool, for
    /// example after a timed-out statement left it in an unknown state.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Deref for PooledConnection {
    type Target = dyn DriverConnection;

    fn deref(&self) -> &Self::Target {
        match self.conn.as_deref() {
            Some(conn) => conn,
            // Only `Drop` takes the connection.
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.conn.as_deref_mut() {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        {
            let mut stats = self.pool.stats.lock();
            stats.in_use = stats.in_use.saturating_sub(1);
        }
        if self.broken || self.pool.closed.load(Ordering::Acquire) {
            trace!("Discarding connection");
            return;
        }
        let mut idle = self.pool.idle.lock();
        if idle.len() < self.pool.options.max_idle {
            idle.push_back(IdleConnection {
                conn,
                created_at: self.created_at,
                last_used: Instant::now(),
            });
        }
        // The permit is released after this, so a waiter sees the idle entry.
    }
}
