//! Idempotent shutdown switch shared between the sync worker and its owner.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender},
        Arc,
    },
    time::Duration,
};

use crate::{
    transport::SyncTransport,
    worker::{Pause, PauseOutcome},
};

/// Stops the sync worker and releases the transport.
///
/// Only the first call to [`ShutdownController::shutdown`] does any work, so it's safe to call
/// from any number of threads, any number of times.
pub(crate) struct ShutdownController {
    flag: AtomicBool,
    transport: Arc<dyn SyncTransport>,
    /// Wakes the worker if it's sleeping between reconnect attempts.
    stop_sender: SyncSender<()>,
}

impl ShutdownController {
    /// Create a controller releasing `transport`, along with the signal the worker sleeps on.
    pub(crate) fn new(transport: Arc<dyn SyncTransport>) -> (ShutdownController, StopSignal) {
        // Buffer size of 1 is enough: the stop command is sent at most once.
        let (stop_sender, stop_receiver) = sync_channel::<()>(1);
        let controller = ShutdownController {
            flag: AtomicBool::new(false),
            transport,
            stop_sender,
        };
        (
            controller,
            StopSignal {
                receiver: stop_receiver,
            },
        )
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Request shutdown. Returns `true` if this call performed the release.
    pub(crate) fn shutdown(&self) -> bool {
        if self
            .flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        log::debug!(target: "flagd", "shutdown requested, closing transport");
        self.transport.close();
        // Error means the worker is gone already, there's nothing left to wake.
        let _ = self.stop_sender.try_send(());
        true
    }
}

/// Backoff sleep that is cut short by [`ShutdownController::shutdown`].
pub(crate) struct StopSignal {
    receiver: Receiver<()>,
}

impl Pause for StopSignal {
    fn pause(&mut self, duration: Duration) -> PauseOutcome {
        match self.receiver.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => PauseOutcome::Elapsed,
            Ok(()) => {
                log::debug!(target: "flagd", "sync worker received stop command");
                PauseOutcome::Stopped
            }
            // Only happens if the controller is dropped while the worker still runs. Nobody can
            // stop the worker after that, so stop now instead of reconnecting without a sleep.
            Err(RecvTimeoutError::Disconnected) => PauseOutcome::Stopped,
        }
    }
}
