use std::sync::Arc;

/// Represents a result type for operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Enum representing possible errors returned by the sync connector.
///
/// Transport failures that happen while the worker is running are never returned through this
/// type. They are recovered by reconnecting and surfaced to consumers as
/// [`PayloadType::Error`](crate::PayloadType::Error) payloads.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum Error {
    /// Invalid base URL configuration.
    #[error("invalid base_url configuration")]
    InvalidBaseUrl(#[source] url::ParseError),

    /// Configuration values that cannot be used to start the connector.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),

    /// The transport was closed and cannot open new sessions.
    #[error("transport is closed")]
    TransportClosed,

    /// Indicates that the sync worker thread panicked. This should normally never happen.
    #[error("sync worker panicked")]
    WorkerPanicked,

    /// The payload stream has no producers left and all queued payloads were consumed.
    #[error("payload stream is closed")]
    StreamClosed,

    /// An I/O error.
    #[error(transparent)]
    // std::io::Error is not clonable, so we're wrapping it in an Arc.
    Io(Arc<std::io::Error>),

    /// Network error.
    #[error(transparent)]
    Network(Arc<reqwest::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(Arc::new(value))
    }
}

impl From<reqwest::Error> for Error {
    fn from(value: reqwest::Error) -> Self {
        Error::Network(Arc::new(value.without_url()))
    }
}
