//! Executed-statement observation.
//!
//! Every statement a session runs is reported to the [`QueryLog`]. When
//! nothing is listening the cost is a single atomic load; enabling the log
//! keeps an in-memory list of [`QueryEvent`]s, and any number of
//! [`QueryObserver`]s can be attached for custom sinks.
//!
//! ```rust
//! use std::time::Duration;
//! use quarry_query::query_log::{QueryEvent, QueryLog};
//!
//! let log = QueryLog::new();
//! log.record(QueryEvent::new("SELECT 1", vec![], Duration::from_millis(1)));
//! assert!(log.entries().is_empty());
//!
//! log.enable();
//! log.record(QueryEvent::new("SELECT 2", vec![], Duration::from_millis(1)));
//! assert_eq!(log.entries()[0].sql, "SELECT 2");
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::warn;

use crate::value::Value;

/// One executed statement.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEvent {
    /// SQL text as sent to the driver.
    pub sql: String,
    /// Bound parameters.
    pub params: Vec<Value>,
    /// Wall-clock execution time.
    pub duration: Duration,
    /// Whether the statement failed.
    pub failed: bool,
}

impl QueryEvent {
    /// Event for a successful statement.
    pub fn new(sql: impl Into<String>, params: Vec<Value>, duration: Duration) -> Self {
        Self {
            sql: sql.into(),
            params,
            duration,
            failed: false,
        }
    }

    /// Mark the statement as failed.
    pub fn failed(mut self) -> Self {
        self.failed = true;
        self
    }
}

/// Receives every executed statement.
pub trait QueryObserver: Send + Sync {
    /// Called after each statement completes.
    fn on_query(&self, event: &QueryEvent);
}

impl<F> QueryObserver for F
where
    F: Fn(&QueryEvent) + Send + Sync,
{
    fn on_query(&self, event: &QueryEvent) {
        self(event)
    }
}

const COLLECTING: u8 = 1;
const OBSERVED: u8 = 1 << 1;
const SLOW_WATCH: u8 = 1 << 2;

/// In-memory statement collector plus observer fan-out.
pub struct QueryLog {
    // COLLECTING | OBSERVED | SLOW_WATCH
    flags: AtomicU8,
    entries: Mutex<Vec<QueryEvent>>,
    observers: RwLock<Vec<Arc<dyn QueryObserver>>>,
    slow_threshold: RwLock<Option<Duration>>,
    query_count: AtomicU64,
}

impl QueryLog {
    /// Create a disabled log.
    pub fn new() -> Self {
        Self {
            flags: AtomicU8::new(0),
            entries: Mutex::new(Vec::new()),
            observers: RwLock::new(Vec::new()),
            slow_threshold: RwLock::new(None),
            query_count: AtomicU64::new(0),
        }
    }

    /// Start collecting entries.
    pub fn enable(&self) {
        self.flags.fetch_or(COLLECTING, Ordering::Release);
    }

    /// Stop collecting entries. Already collected entries are kept.
    pub fn disable(&self) {
        self.flags.fetch_and(!COLLECTING, Ordering::Release);
    }

    /// Whether entries are being collected.
    pub fn is_enabled(&self) -> bool {
        self.flags.load(Ordering::Acquire) & COLLECTING != 0
    }

    /// Whether anything consumes events: collection, an observer or a slow
    /// query threshold. Sessions skip building events when this is false.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.flags.load(Ordering::Acquire) != 0
    }

    /// Attach an observer.
    pub fn add_observer(&self, observer: Arc<dyn QueryObserver>) {
        self.observers.write().push(observer);
        self.flags.fetch_or(OBSERVED, Ordering::Release);
    }

    /// Warn through `tracing` about statements slower than `threshold`.
    pub fn set_slow_threshold(&self, threshold: Option<Duration>) {
        let mut slot = self.slow_threshold.write();
        *slot = threshold;
        if slot.is_some() {
            self.flags.fetch_or(SLOW_WATCH, Ordering::Release);
        } else {
            self.flags.fetch_and(!SLOW_WATCH, Ordering::Release);
        }
    }

    /// Collected entries, oldest first.
    pub fn entries(&self) -> Vec<QueryEvent> {
        self.entries.lock().clone()
    }

    /// Drop collected entries.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Statements recorded so far, whether or not they were collected.
    /// Sessions only record while the log [is active](Self::is_active).
    pub fn query_count(&self) -> u64 {
        self.query_count.load(Ordering::Relaxed)
    }

    /// Record an executed statement.
    pub fn record(&self, event: QueryEvent) {
        self.query_count.fetch_add(1, Ordering::Relaxed);
        let flags = self.flags.load(Ordering::Acquire);

        let threshold = if flags & SLOW_WATCH != 0 { *self.slow_threshold.read() } else { None };
        if let Some(threshold) = threshold {
            if event.duration >= threshold {
                warn!(
                    target: "quarry::query",
                    sql = %event.sql,
                    duration_ms = event.duration.as_millis() as u64,
                    threshold_ms = threshold.as_millis() as u64,
                    "Slow query detected"
                );
            }
        }

        if flags & OBSERVED != 0 {
            for observer in self.observers.read().iter() {
                observer.on_query(&event);
            }
        }

        if flags & COLLECTING != 0 {
            self.entries.lock().push(event);
        }
    }
}

impl Default for QueryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for QueryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryLog")
            .field("enabled", &self.is_enabled())
            .field("observers", &self.observers.read().len())
            .field("query_count", &self.query_count())
            .finish()
    }
}
