use std::time::Duration;

use crate::error::Error;

/// Tuning for an [`EventStore`](crate::EventStore).
///
/// ```rust
/// use ledger::StoreConfig;
///
/// let config = StoreConfig::default()
///     .with_backlog_warning(64)
///     .and_then(|c| c.with_request_timeout_ms(250))
///     .unwrap();
///
/// assert_eq!(config.backlog_warning(), 64);
/// assert_eq!(config.request_timeout().as_millis(), 250);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    log_capacity: usize,
    backlog_warning: usize,
    request_timeout_ms: u64,
}

impl StoreConfig {
    /// Initial number of events the log allocates room for. Zero is allowed.
    pub fn with_log_capacity(self, log_capacity: usize) -> Self {
        Self {
            log_capacity,
            ..self
        }
    }

    /// Queue depth at which a listener is reported as falling behind.
    pub fn with_backlog_warning(self, backlog_warning: usize) -> Result<Self, Error> {
        if backlog_warning == 0 {
            return Err(Error::InvalidConfig {
                message: "backlog_warning cannot be 0".to_string(),
                parameter: Some("backlog_warning".to_string()),
            });
        }
        Ok(Self {
            backlog_warning,
            ..self
        })
    }

    /// How long [`EventStore::request`](crate::EventStore::request) waits for a verdict.
    pub fn with_request_timeout_ms(self, request_timeout_ms: u64) -> Result<Self, Error> {
        if request_timeout_ms == 0 {
            return Err(Error::InvalidConfig {
                message: "request_timeout_ms cannot be 0".to_string(),
                parameter: Some("request_timeout_ms".to_string()),
            });
        }
        Ok(Self {
            request_timeout_ms,
            ..self
        })
    }

    pub fn log_capacity(&self) -> usize {
        self.log_capacity
    }

    pub fn backlog_warning(&self) -> usize {
        self.backlog_warning
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn request_timeout_ms(&self) -> u64 {
        self.request_timeout_ms
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            log_capacity: 1024,
            backlog_warning: 256,
            request_timeout_ms: 5_000,
        }
    }
}
