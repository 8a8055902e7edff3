//! Pool options.

use std::time::Duration;

use super::{ConnectionError, ConnectionResult};

/// Connection pool sizing and lifetimes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Maximum number of open connections.
    pub max_connections: usize,
    /// Maximum number of idle connections kept for reuse.
    pub max_idle: usize,
    /// Maximum time to wait for a connection.
    pub acquire_timeout: Duration,
    /// Idle time after which a connection is closed instead of reused.
    pub idle_timeout: Option<Duration>,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            max_idle: 2,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(600)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

impl PoolOptions {
    /// Create new pool options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set max connections.
    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    /// Set max idle connections.
    pub fn max_idle(mut self, n: usize) -> Self {
        self.max_idle = n;
        self
    }

    /// Set acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Disable idle timeout.
    pub fn no_idle_timeout(mut self) -> Self {
        self.idle_timeout = None;
        self
    }

    /// Set max lifetime.
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Check the options are usable.
    pub fn validate(&self) -> ConnectionResult<()> {
        if self.max_connections == 0 {
            return Err(ConnectionError::InvalidOption {
                key: "max_connections".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.max_idle > self.max_connections {
            return Err(ConnectionError::InvalidOption {
                key: "max_idle".to_string(),
                message: format!(
                    "{} exceeds max_connections ({})",
                    self.max_idle, self.max_connections
                ),
            });
        }
        if self.acquire_timeout.is_zero() {
            return Err(ConnectionError::InvalidOption {
                key: "acquire_timeout".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let opts = PoolOptions::new()
            .max_connections(20)
            .max_idle(5)
            .no_idle_timeout();

        assert_eq!(opts.max_connections, 20);
        assert_eq!(opts.max_idle, 5);
        assert_eq!(opts.idle_timeout, None);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(PoolOptions::new().max_connections(0).validate().is_err());
        assert!(PoolOptions::new().max_connections(2).max_idle(3).validate().is_err());
        assert!(PoolOptions::new().acquire_timeout(Duration::ZERO).validate().is_err());
    }
}
