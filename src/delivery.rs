//! Bounded hand-off queue between the sync worker and consumers.
//!
//! The worker never blocks on consumers: [`DeliveryQueue::offer`] drops the payload when the
//! queue is full. Consumers block in [`PayloadStream::take`] until a payload arrives. The queue
//! is lock-free, so any number of consumers may wait on it concurrently.
use std::time::Duration;

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};

use crate::{Error, Result, StreamPayload};

/// Producer side of the delivery queue.
#[derive(Debug, Clone)]
pub(crate) struct DeliveryQueue {
    sender: Sender<StreamPayload>,
}

impl DeliveryQueue {
    /// Create a queue holding at most `capacity` payloads, along with its consumer handle.
    pub(crate) fn new(capacity: usize) -> (DeliveryQueue, PayloadStream) {
        let (sender, receiver) = bounded(capacity);
        (DeliveryQueue { sender }, PayloadStream { receiver })
    }

    /// Enqueue `payload` without blocking.
    ///
    /// Returns `false` if the payload was dropped because the queue is full.
    #[must_use]
    pub(crate) fn offer(&self, payload: StreamPayload) -> bool {
        match self.sender.try_send(payload) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            // All consumer handles are gone, nobody is going to miss the payload.
            Err(TrySendError::Disconnected(_)) => true,
        }
    }
}

/// Consumer handle of the sync stream.
///
/// Payloads are received in the order the connector accepted them. Cloned handles share the same
/// queue: every payload is received by exactly one of them.
#[derive(Debug, Clone)]
pub struct PayloadStream {
    receiver: Receiver<StreamPayload>,
}

impl PayloadStream {
    /// Block waiting for the next payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] once the connector is gone and the queue is drained.
    pub fn take(&self) -> Result<StreamPayload> {
        self.receiver.recv().map_err(|_| Error::StreamClosed)
    }

    /// Return the next payload if one is immediately available.
    pub fn try_take(&self) -> Option<StreamPayload> {
        match self.receiver.try_recv() {
            Ok(payload) => Some(payload),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Block waiting for the next payload for at most `timeout`.
    ///
    /// Returns `Ok(None)` if no payload arrived in time.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StreamClosed`] once the connector is gone and the queue is drained.
    pub fn take_timeout(&self, timeout: Duration) -> Result<Option<StreamPayload>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(payload) => Ok(Some(payload)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::StreamClosed),
        }
    }

    /// Number of payloads currently waiting in the queue.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// Returns `true` if no payload is waiting in the queue.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Blocking iterator over payloads. Ends when the stream is closed.
    pub fn iter(&self) -> impl Iterator<Item = StreamPayload> + '_ {
        self.receiver.iter()
    }
}
