//! Classification of raw stream messages into actions for the sync worker.
use crate::{
    message::{StreamMessage, SyncState},
    StreamPayload,
};

/// Content of the [`PayloadType::Error`](crate::PayloadType::Error) notice sent to consumers
/// when the stream fails.
pub const CONNECTION_ERROR_MESSAGE: &str = "connection error, retrying";

/// What the sync worker should do with a received message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Hand the payload to consumers. An error payload also ends the current session.
    Deliver(StreamPayload),
    /// Drop the message. The connection is still considered healthy.
    Ignore(SyncState),
    /// The server finished the stream normally.
    Complete,
}

/// Decide what to do with `message`.
///
/// Only full snapshots are delivered as data; incremental and keep-alive states are ignored
/// because consumers replace their whole configuration on every payload.
pub fn classify(message: &StreamMessage) -> Action {
    match message {
        StreamMessage::Error(_) => Action::Deliver(StreamPayload::error(CONNECTION_ERROR_MESSAGE)),
        StreamMessage::Complete => Action::Complete,
        StreamMessage::Response(response) => match response.state {
            SyncState::All => {
                Action::Deliver(StreamPayload::data(response.flag_configuration.clone()))
            }
            state @ (SyncState::Unspecified
            | SyncState::Add
            | SyncState::Update
            | SyncState::Delete
            | SyncState::Ping
            | SyncState::Unrecognized) => Action::Ignore(state),
        },
    }
}
