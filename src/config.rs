//! Configuration for [`SyncConnector`](crate::SyncConnector).
use std::time::Duration;

use crate::{Error, Result};

/// Configuration for [`SyncConnector`](crate::SyncConnector).
// Not implementing `Copy` as `base_url` and `token` are heap-allocated.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the flagd sync service. The sync endpoint path is appended to it.
    ///
    /// Defaults to [`SyncConfig::DEFAULT_BASE_URL`].
    pub base_url: String,
    /// Optional bearer token sent with every subscription request.
    pub token: Option<String>,
    /// Delay before the first reconnect attempt. It is also the upper bound of the random jitter
    /// added to every reconnect delay.
    ///
    /// Defaults to [`SyncConfig::DEFAULT_INITIAL_BACKOFF`].
    pub initial_backoff: Duration,
    /// Upper bound for the exponentially growing reconnect delay (jitter excluded).
    ///
    /// Defaults to [`SyncConfig::DEFAULT_MAX_BACKOFF`].
    pub max_backoff: Duration,
    /// Number of raw messages a transport session may buffer before the worker reads them.
    pub receive_queue_capacity: usize,
    /// Number of payloads buffered for consumers. Payloads arriving while the queue is full are
    /// dropped.
    pub delivery_queue_capacity: usize,
    /// Timeout for establishing a connection to the sync service.
    pub connect_timeout: Duration,
    /// Largest accepted stream frame in bytes. A longer frame ends the session with an error.
    ///
    /// Defaults to [`SyncConfig::DEFAULT_MAX_FRAME_SIZE`].
    pub max_frame_size: usize,
}

impl SyncConfig {
    /// Default value for [`SyncConfig::base_url`].
    pub const DEFAULT_BASE_URL: &'static str = "http://localhost:8015";
    /// Default value for [`SyncConfig::initial_backoff`].
    pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(2);
    /// Default value for [`SyncConfig::max_backoff`].
    pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(120);
    /// Default value for both queue capacities.
    pub const DEFAULT_QUEUE_CAPACITY: usize = 5;
    /// Default value for [`SyncConfig::connect_timeout`].
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
    /// Default value for [`SyncConfig::max_frame_size`]. Same as gRPC's default inbound limit.
    pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

    /// Create a new `SyncConfig` using default configuration.
    pub fn new() -> SyncConfig {
        SyncConfig::default()
    }

    /// Update base URL with `base_url`.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> SyncConfig {
        self.base_url = base_url.into();
        self
    }

    /// Set bearer token used to authenticate subscription requests.
    pub fn with_token(mut self, token: impl Into<String>) -> SyncConfig {
        self.token = Some(token.into());
        self
    }

    /// Update initial and maximum reconnect delays.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> SyncConfig {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Update receive queue capacity with `capacity`.
    pub fn with_receive_queue_capacity(mut self, capacity: usize) -> SyncConfig {
        self.receive_queue_capacity = capacity;
        self
    }

    /// Update delivery queue capacity with `capacity`.
    pub fn with_delivery_queue_capacity(mut self, capacity: usize) -> SyncConfig {
        self.delivery_queue_capacity = capacity;
        self
    }

    /// Update connect timeout with `timeout`.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> SyncConfig {
        self.connect_timeout = timeout;
        self
    }

    /// Update maximum frame size with `max_frame_size`.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> SyncConfig {
        self.max_frame_size = max_frame_size;
        self
    }

    /// Check that the configuration can be used to start a connector.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfiguration`] if a queue capacity or `max_frame_size` is zero, or
    /// if `max_backoff` is smaller than `initial_backoff`.
    pub fn validate(&self) -> Result<()> {
        if self.receive_queue_capacity == 0 {
            return Err(Error::InvalidConfiguration(
                "receive_queue_capacity must be greater than zero",
            ));
        }
        if self.delivery_queue_capacity == 0 {
            return Err(Error::InvalidConfiguration(
                "delivery_queue_capacity must be greater than zero",
            ));
        }
        if self.max_frame_size == 0 {
            return Err(Error::InvalidConfiguration(
                "max_frame_size must be greater than zero",
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(Error::InvalidConfiguration(
                "max_backoff must not be smaller than initial_backoff",
            ));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> SyncConfig {
        SyncConfig {
            base_url: SyncConfig::DEFAULT_BASE_URL.to_owned(),
            token: None,
            initial_backoff: SyncConfig::DEFAULT_INITIAL_BACKOFF,
            max_backoff: SyncConfig::DEFAULT_MAX_BACKOFF,
            receive_queue_capacity: SyncConfig::DEFAULT_QUEUE_CAPACITY,
            delivery_queue_capacity: SyncConfig::DEFAULT_QUEUE_CAPACITY,
            connect_timeout: SyncConfig::DEFAULT_CONNECT_TIMEOUT,
            max_frame_size: SyncConfig::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}
