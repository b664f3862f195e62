//! Raw messages produced by a transport session.
use std::sync::Arc;

use derive_more::Display;
use serde::{Deserialize, Deserializer};

/// Sync state attached to every response of the sync stream.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncState {
    /// State was not set by the server.
    #[default]
    #[display(fmt = "SYNC_STATE_UNSPECIFIED")]
    Unspecified,
    /// Full snapshot of all flag configurations.
    #[display(fmt = "SYNC_STATE_ALL")]
    All,
    /// Incremental addition.
    #[display(fmt = "SYNC_STATE_ADD")]
    Add,
    /// Incremental update.
    #[display(fmt = "SYNC_STATE_UPDATE")]
    Update,
    /// Incremental deletion.
    #[display(fmt = "SYNC_STATE_DELETE")]
    Delete,
    /// Keep-alive message without configuration.
    #[display(fmt = "SYNC_STATE_PING")]
    Ping,
    /// State value not known to this client.
    #[display(fmt = "UNRECOGNIZED")]
    Unrecognized,
}

impl SyncState {
    /// Map a proto enum name to a state. Unknown names map to [`SyncState::Unrecognized`].
    pub fn from_name(name: &str) -> SyncState {
        match name {
            "SYNC_STATE_UNSPECIFIED" => SyncState::Unspecified,
            "SYNC_STATE_ALL" => SyncState::All,
            "SYNC_STATE_ADD" => SyncState::Add,
            "SYNC_STATE_UPDATE" => SyncState::Update,
            "SYNC_STATE_DELETE" => SyncState::Delete,
            "SYNC_STATE_PING" => SyncState::Ping,
            _ => SyncState::Unrecognized,
        }
    }

    /// Map a proto enum number to a state. Unknown numbers map to [`SyncState::Unrecognized`].
    pub fn from_number(number: i64) -> SyncState {
        match number {
            0 => SyncState::Unspecified,
            1 => SyncState::All,
            2 => SyncState::Add,
            3 => SyncState::Update,
            4 => SyncState::Delete,
            5 => SyncState::Ping,
            _ => SyncState::Unrecognized,
        }
    }
}

// JSON encoders of proto enums may emit either the name or the number.
impl<'de> Deserialize<'de> for SyncState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Name(String),
            Number(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Name(name) => SyncState::from_name(&name),
            Raw::Number(number) => SyncState::from_number(number),
        })
    }
}

/// A single response of the sync stream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncFlagsResponse {
    /// Opaque flag configuration. Only meaningful for [`SyncState::All`].
    #[serde(default)]
    pub flag_configuration: String,
    /// Kind of the update.
    #[serde(default)]
    pub state: SyncState,
}

impl SyncFlagsResponse {
    /// Create a full-sync response carrying `flag_configuration`.
    pub fn full(flag_configuration: impl Into<String>) -> SyncFlagsResponse {
        SyncFlagsResponse {
            flag_configuration: flag_configuration.into(),
            state: SyncState::All,
        }
    }

    /// Create a response with `state` and no configuration.
    pub fn with_state(state: SyncState) -> SyncFlagsResponse {
        SyncFlagsResponse {
            flag_configuration: String::new(),
            state,
        }
    }
}

/// Cause of a failed transport session.
#[derive(thiserror::Error, Debug, Clone)]
#[non_exhaustive]
pub enum StreamError {
    /// Connection or body read failure.
    #[error(transparent)]
    // reqwest::Error is not clonable, so we're wrapping it in an Arc.
    Network(Arc<reqwest::Error>),

    /// The server answered the subscription with a non-success HTTP status.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// The server terminated the stream with an error frame.
    #[error("stream aborted by server (code {code}): {message}")]
    Remote {
        /// gRPC status code reported by the server.
        code: i32,
        /// Human-readable status message.
        message: String,
    },

    /// A stream frame could not be decoded.
    #[error("malformed stream frame")]
    Decode(#[source] Arc<serde_json::Error>),

    /// A stream frame exceeded the configured maximum frame size.
    #[error("stream frame exceeds {limit} bytes")]
    FrameTooLarge {
        /// Maximum accepted frame size in bytes.
        limit: usize,
    },

    /// The session went away without reporting completion or an error.
    #[error("stream session disconnected")]
    Disconnected,
}

impl From<reqwest::Error> for StreamError {
    fn from(value: reqwest::Error) -> Self {
        StreamError::Network(Arc::new(value.without_url()))
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(value: serde_json::Error) -> Self {
        StreamError::Decode(Arc::new(value))
    }
}

/// A message received from a transport session.
///
/// Exactly one of response, error, or completion is carried by each message.
#[derive(Debug, Clone)]
pub enum StreamMessage {
    /// A response carrying a sync state and possibly a configuration payload.
    Response(SyncFlagsResponse),
    /// The session failed.
    Error(StreamError),
    /// The server finished the stream normally.
    Complete,
}

impl From<SyncFlagsResponse> for StreamMessage {
    fn from(value: SyncFlagsResponse) -> Self {
        StreamMessage::Response(value)
    }
}

impl From<StreamError> for StreamMessage {
    fn from(value: StreamError) -> Self {
        StreamMessage::Error(value)
    }
}
