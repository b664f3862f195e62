//! Transport sessions feeding raw stream messages to the sync worker.
//!
//! A [`SyncTransport`] opens one streaming call per connection attempt. Each session pushes
//! messages into a [`SessionSink`]. The worker reads them from the paired [`SessionReceiver`]
//! and drops the receiver when it's done with the session, which tells the session to release
//! its connection.
use serde::Serialize;
use tokio::sync::mpsc;

use crate::{
    message::{StreamError, StreamMessage, SyncFlagsResponse},
    Result,
};

/// Subscription request sent when opening a session.
///
/// An empty request asks the server for full snapshots of all flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncRequest {}

/// A source of flag sync streams.
pub trait SyncTransport: Send + Sync {
    /// Open a new session issuing `request` and start feeding its messages into `sink`.
    ///
    /// This must not block waiting for messages. Every session should finish by sending either
    /// [`StreamMessage::Complete`] or [`StreamMessage::Error`] and then drop the sink.
    ///
    /// # Errors
    ///
    /// Returns an error if the session cannot be started at all. The worker treats that the same
    /// way as a failed stream.
    fn sync_flags(&self, request: SyncRequest, sink: SessionSink) -> Result<()>;

    /// Release the transport's resources and terminate open sessions.
    ///
    /// Open sessions must drop their sinks promptly so that a worker blocked on the session
    /// receive wakes up. Called at most once, by the shutdown controller.
    fn close(&self);
}

/// Create a receive queue for one session, buffering up to `capacity` messages.
pub fn session_channel(capacity: usize) -> (SessionSink, SessionReceiver) {
    let (sender, receiver) = mpsc::channel(capacity);
    (SessionSink { sender }, SessionReceiver { receiver })
}

/// Sending half of a session receive queue.
///
/// All sending methods return `false` once the worker has abandoned the session, in which case
/// the session should stop and release its resources.
#[derive(Debug, Clone)]
pub struct SessionSink {
    sender: mpsc::Sender<StreamMessage>,
}

impl SessionSink {
    /// Forward a response. Waits while the receive queue is full.
    pub async fn on_next(&self, response: SyncFlagsResponse) -> bool {
        self.sender.send(response.into()).await.is_ok()
    }

    /// Report a failed stream.
    pub async fn on_error(&self, error: StreamError) -> bool {
        self.sender.send(error.into()).await.is_ok()
    }

    /// Report normal completion of the stream.
    pub async fn on_completed(&self) -> bool {
        self.sender.send(StreamMessage::Complete).await.is_ok()
    }

    /// Send `message` from a thread that is not running an async runtime.
    ///
    /// # Panics
    ///
    /// Panics if called within an asynchronous execution context.
    pub fn blocking_send(&self, message: StreamMessage) -> bool {
        self.sender.blocking_send(message).is_ok()
    }

    /// Resolves once the worker has dropped the receiving half.
    pub async fn closed(&self) {
        self.sender.closed().await
    }

    /// Returns `true` if the worker has dropped the receiving half.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Receiving half of a session receive queue, owned by the sync worker.
#[derive(Debug)]
pub struct SessionReceiver {
    receiver: mpsc::Receiver<StreamMessage>,
}

impl SessionReceiver {
    /// Block waiting for the next message.
    ///
    /// Returns `None` once every sink of the session has been dropped and the queue is drained.
    pub fn recv(&mut self) -> Option<StreamMessage> {
        self.receiver.blocking_recv()
    }
}
