//! The reconnect loop run by the sync worker thread.
//!
//! The loop is a state machine:
//!
//! ```text
//! Connecting -> Streaming -> Completed | Errored -> Backoff -> Connecting -> ...
//! ```
//!
//! with `Shutdown` reachable from every state. Completion and errors share the backoff path: the
//! server may legitimately end a sync cycle, and the worker always reconnects until it's shut
//! down.
use std::{sync::Arc, time::Duration};

use crate::{
    backoff::Backoff,
    classify::{classify, Action},
    delivery::DeliveryQueue,
    message::{StreamError, StreamMessage},
    shutdown::ShutdownController,
    transport::{session_channel, SessionReceiver, SyncRequest, SyncTransport},
    PayloadType, SyncConfig,
};

/// How a [`Pause`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PauseOutcome {
    /// The full duration has passed.
    Elapsed,
    /// Shutdown was requested while sleeping.
    Stopped,
}

/// Sleep between reconnect attempts.
pub(crate) trait Pause {
    fn pause(&mut self, duration: Duration) -> PauseOutcome;
}

enum LoopState {
    Connecting,
    /// The receiver is the only handle to the open session. Dropping it releases the session.
    Streaming(SessionReceiver),
    Completed,
    Errored,
    Backoff,
    Shutdown,
}

pub(crate) struct ReconnectLoop<P> {
    transport: Arc<dyn SyncTransport>,
    delivery: DeliveryQueue,
    shutdown: Arc<ShutdownController>,
    backoff: Backoff,
    receive_queue_capacity: usize,
    pause: P,
}

impl<P: Pause> ReconnectLoop<P> {
    pub(crate) fn new(
        transport: Arc<dyn SyncTransport>,
        delivery: DeliveryQueue,
        shutdown: Arc<ShutdownController>,
        config: &SyncConfig,
        pause: P,
    ) -> ReconnectLoop<P> {
        ReconnectLoop {
            transport,
            delivery,
            shutdown,
            backoff: Backoff::new(config.initial_backoff, config.max_backoff),
            receive_queue_capacity: config.receive_queue_capacity,
            pause,
        }
    }

    /// Run until shutdown is requested.
    pub(crate) fn run(mut self) {
        let mut state = LoopState::Connecting;
        loop {
            state = match state {
                LoopState::Connecting => self.connect(),
                LoopState::Streaming(receiver) => self.stream(receiver),
                LoopState::Completed | LoopState::Errored => {
                    // Check for shutdown to avoid the sleep.
                    if self.shutdown.is_shutdown() {
                        LoopState::Shutdown
                    } else {
                        LoopState::Backoff
                    }
                }
                LoopState::Backoff => self.back_off(),
                LoopState::Shutdown => {
                    log::info!(target: "flagd", "shutdown invoked, exiting sync stream listener");
                    return;
                }
            };
        }
    }

    fn connect(&mut self) -> LoopState {
        if self.shutdown.is_shutdown() {
            return LoopState::Shutdown;
        }

        let (sink, receiver) = session_channel(self.receive_queue_capacity);
        log::debug!(target: "flagd", "opening sync stream");
        match self.transport.sync_flags(SyncRequest::default(), sink) {
            Ok(()) => LoopState::Streaming(receiver),
            Err(_) if self.shutdown.is_shutdown() => LoopState::Shutdown,
            Err(err) => {
                log::warn!(target: "flagd", "failed to open sync stream: {err}");
                self.fail(&StreamMessage::Error(StreamError::Disconnected))
            }
        }
    }

    fn stream(&mut self, mut receiver: SessionReceiver) -> LoopState {
        while !self.shutdown.is_shutdown() {
            let message = match receiver.recv() {
                // Shutdown may have been requested while the message was waiting in the queue.
                Some(_) if self.shutdown.is_shutdown() => return LoopState::Shutdown,
                Some(message) => message,
                None if self.shutdown.is_shutdown() => {
                    log::info!(target: "flagd", "sync stream receive interrupted by shutdown");
                    return LoopState::Shutdown;
                }
                None => StreamMessage::Error(StreamError::Disconnected),
            };

            if let StreamMessage::Error(err) = &message {
                log::warn!(
                    target: "flagd",
                    delay_ms = self.backoff.current().as_millis() as u64;
                    "error from sync stream, retrying: {err}"
                );
                return self.fail(&message);
            }

            match classify(&message) {
                Action::Complete => {
                    // The stream is complete. This is not considered an error.
                    log::debug!(target: "flagd", "sync stream completed");
                    return LoopState::Completed;
                }
                Action::Deliver(payload) => {
                    if !self.delivery.offer(payload) {
                        log::warn!(target: "flagd", "delivery queue is full, dropping flag configuration");
                    }
                }
                Action::Ignore(state) => {
                    log::info!(target: "flagd", "ignored sync message of state {state}");
                }
            }

            // The connection is healthy, start over from the initial delay on the next failure.
            self.backoff.reset();
        }

        LoopState::Shutdown
    }

    /// Notify consumers about a failed stream and move to the error state.
    fn fail(&mut self, message: &StreamMessage) -> LoopState {
        if let Action::Deliver(notice) = classify(message) {
            debug_assert_eq!(notice.kind(), PayloadType::Error);
            if !self.delivery.offer(notice) {
                log::warn!(target: "flagd", "failed to convey error status, queue is full");
            }
        }
        LoopState::Errored
    }

    fn back_off(&mut self) -> LoopState {
        let delay = self.backoff.next_delay();
        log::debug!(
            target: "flagd",
            delay_ms = delay.as_millis() as u64;
            "waiting before reconnecting to sync stream"
        );
        match self.pause.pause(delay) {
            PauseOutcome::Elapsed => LoopState::Connecting,
            PauseOutcome::Stopped => LoopState::Shutdown,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::{Duration, Instant},
    };

    use super::{Pause, PauseOutcome, ReconnectLoop};
    use crate::{
        classify::CONNECTION_ERROR_MESSAGE,
        delivery::DeliveryQueue,
        message::{StreamError, StreamMessage, SyncFlagsResponse, SyncState},
        shutdown::ShutdownController,
        transport::{testing::ScriptedTransport, SessionSink, SyncRequest, SyncTransport},
        Error, PayloadType, StreamPayload, SyncConfig,
    };

    const INITIAL: Duration = Duration::from_secs(2);

    /// Records requested delays without sleeping and requests shutdown on the `stop_at`-th pause.
    struct RecordingPause {
        delays: Arc<Mutex<Vec<Duration>>>,
        stop_at: usize,
        controller: Arc<ShutdownController>,
    }

    impl Pause for RecordingPause {
        fn pause(&mut self, duration: Duration) -> PauseOutcome {
            let mut delays = self.delays.lock().unwrap();
            delays.push(duration);
            if delays.len() >= self.stop_at {
                self.controller.shutdown();
                PauseOutcome::Stopped
            } else {
                PauseOutcome::Elapsed
            }
        }
    }

    struct Outcome {
        payloads: Vec<StreamPayload>,
        delays: Vec<Duration>,
        transport: Arc<ScriptedTransport>,
    }

    fn run_scripted(
        scripts: Vec<Vec<StreamMessage>>,
        delivery_capacity: usize,
        stop_at: usize,
    ) -> Outcome {
        let config = SyncConfig::new()
            .with_backoff(INITIAL, Duration::from_secs(120))
            .with_delivery_queue_capacity(delivery_capacity);
        let transport = Arc::new(ScriptedTransport::new(scripts));
        let (controller, _signal) = ShutdownController::new(transport.clone());
        let controller = Arc::new(controller);
        let (delivery, stream) = DeliveryQueue::new(config.delivery_queue_capacity);
        let delays = Arc::new(Mutex::new(Vec::new()));
        let pause = RecordingPause {
            delays: delays.clone(),
            stop_at,
            controller: controller.clone(),
        };

        ReconnectLoop::new(transport.clone(), delivery, controller, &config, pause).run();

        let delays = delays.lock().unwrap().clone();
        Outcome {
            // The worker dropped the producer, so the iterator ends after draining the queue.
            payloads: stream.iter().collect(),
            delays,
            transport,
        }
    }

    fn full(content: &str) -> StreamMessage {
        SyncFlagsResponse::full(content).into()
    }

    fn error() -> StreamMessage {
        StreamError::Status(503).into()
    }

    fn assert_delay(delay: Duration, base: Duration) {
        assert!(
            delay >= base && delay < base + INITIAL,
            "{delay:?} must be in [{base:?}, {:?})",
            base + INITIAL
        );
    }

    #[test]
    fn delivers_snapshots_and_error_notices_in_order() {
        let outcome = run_scripted(
            vec![
                vec![full("v1"), error()],
                vec![full("v2"), StreamMessage::Complete],
            ],
            5,
            2,
        );

        assert_eq!(
            outcome.payloads,
            [
                StreamPayload::data("v1"),
                StreamPayload::error(CONNECTION_ERROR_MESSAGE),
                StreamPayload::data("v2"),
            ]
        );
        assert_eq!(outcome.transport.opened(), 2);
    }

    #[test]
    fn drops_snapshots_beyond_queue_capacity() {
        let mut script: Vec<_> = (1..=6).map(|i| full(&format!("v{i}"))).collect();
        script.push(StreamMessage::Complete);

        let outcome = run_scripted(vec![script], 5, 1);

        let contents: Vec<_> = outcome
            .payloads
            .into_iter()
            .map(StreamPayload::into_content)
            .collect();
        assert_eq!(contents, ["v1", "v2", "v3", "v4", "v5"]);
    }

    #[test]
    fn error_notice_is_dropped_when_queue_is_full() {
        let outcome = run_scripted(vec![vec![full("v1"), error()]], 1, 1);

        assert_eq!(outcome.payloads, [StreamPayload::data("v1")]);
    }

    #[test]
    fn non_snapshot_states_deliver_nothing() {
        let mut script: Vec<StreamMessage> = [
            SyncState::Unspecified,
            SyncState::Add,
            SyncState::Update,
            SyncState::Delete,
            SyncState::Ping,
            SyncState::Unrecognized,
        ]
        .into_iter()
        .map(|state| SyncFlagsResponse::with_state(state).into())
        .collect();
        script.push(StreamMessage::Complete);

        let outcome = run_scripted(vec![script], 5, 1);

        assert!(outcome.payloads.is_empty());
    }

    #[test]
    fn consecutive_failures_double_the_delay() {
        let outcome = run_scripted(vec![vec![error()], vec![error()], vec![error()]], 5, 3);

        assert_eq!(outcome.delays.len(), 3);
        assert_delay(outcome.delays[0], Duration::from_secs(2));
        assert_delay(outcome.delays[1], Duration::from_secs(4));
        assert_delay(outcome.delays[2], Duration::from_secs(8));
        assert_eq!(outcome.payloads.len(), 3);
    }

    #[test]
    fn delay_is_capped() {
        let config = SyncConfig::new().with_backoff(INITIAL, Duration::from_secs(5));
        let transport = Arc::new(ScriptedTransport::new(vec![vec![error()]; 4]));
        let (controller, _signal) = ShutdownController::new(transport.clone());
        let controller = Arc::new(controller);
        let (delivery, _stream) = DeliveryQueue::new(5);
        let delays = Arc::new(Mutex::new(Vec::new()));
        let pause = RecordingPause {
            delays: delays.clone(),
            stop_at: 4,
            controller: controller.clone(),
        };

        ReconnectLoop::new(transport, delivery, controller, &config, pause).run();

        let delays = delays.lock().unwrap();
        assert_delay(delays[2], Duration::from_secs(5));
        assert_delay(delays[3], Duration::from_secs(5));
    }

    #[test]
    fn ignored_message_resets_the_delay() {
        let ping: StreamMessage = SyncFlagsResponse::with_state(SyncState::Ping).into();
        let outcome = run_scripted(vec![vec![error()], vec![error()], vec![ping, error()]], 5, 3);

        assert_delay(outcome.delays[0], Duration::from_secs(2));
        assert_delay(outcome.delays[1], Duration::from_secs(4));
        assert_delay(outcome.delays[2], Duration::from_secs(2));
    }

    #[test]
    fn completion_backs_off_without_error_notice() {
        let outcome = run_scripted(
            vec![vec![StreamMessage::Complete], vec![StreamMessage::Complete]],
            5,
            2,
        );

        assert!(outcome.payloads.is_empty());
        assert_delay(outcome.delays[0], Duration::from_secs(2));
        assert_delay(outcome.delays[1], Duration::from_secs(4));
    }

    #[test]
    fn session_vanishing_counts_as_error() {
        // The script ends without completion, so the session drops its sink.
        let outcome = run_scripted(vec![vec![full("v1")]], 5, 1);

        assert_eq!(
            outcome.payloads,
            [
                StreamPayload::data("v1"),
                StreamPayload::error(CONNECTION_ERROR_MESSAGE),
            ]
        );
    }

    /// Fails every attempt to open a session.
    #[derive(Default)]
    struct RefusingTransport {
        attempts: AtomicUsize,
    }

    impl SyncTransport for RefusingTransport {
        fn sync_flags(&self, _request: SyncRequest, _sink: SessionSink) -> crate::Result<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(Error::from(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))
        }

        fn close(&self) {}
    }

    #[test]
    fn failing_to_open_session_counts_as_error() {
        let config = SyncConfig::new().with_backoff(INITIAL, Duration::from_secs(120));
        let transport = Arc::new(RefusingTransport::default());
        let (controller, _signal) = ShutdownController::new(transport.clone());
        let controller = Arc::new(controller);
        let (delivery, stream) = DeliveryQueue::new(5);
        let delays = Arc::new(Mutex::new(Vec::new()));
        let pause = RecordingPause {
            delays: delays.clone(),
            stop_at: 3,
            controller: controller.clone(),
        };

        ReconnectLoop::new(transport.clone(), delivery, controller, &config, pause).run();

        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
        let kinds: Vec<_> = stream.iter().map(|p| p.kind()).collect();
        assert_eq!(kinds, [PayloadType::Error; 3]);
        let delays = delays.lock().unwrap();
        assert_delay(delays[0], Duration::from_secs(2));
        assert_delay(delays[1], Duration::from_secs(4));
        assert_delay(delays[2], Duration::from_secs(8));
    }

    /// Requests shutdown from inside the first session, then sends an error on it.
    #[derive(Default)]
    struct ShutdownThenErrorTransport {
        controller: Mutex<Option<Arc<ShutdownController>>>,
    }

    impl SyncTransport for ShutdownThenErrorTransport {
        fn sync_flags(&self, _request: SyncRequest, sink: SessionSink) -> crate::Result<()> {
            let Some(controller) = self.controller.lock().unwrap().take() else {
                return Err(Error::TransportClosed);
            };
            std::thread::spawn(move || {
                controller.shutdown();
                let _ = sink.blocking_send(StreamError::Status(503).into());
            });
            Ok(())
        }

        fn close(&self) {}
    }

    #[test]
    fn message_received_after_shutdown_is_not_classified() {
        let transport = Arc::new(ShutdownThenErrorTransport::default());
        let (controller, signal) = ShutdownController::new(transport.clone());
        let controller = Arc::new(controller);
        *transport.controller.lock().unwrap() = Some(controller.clone());
        let (delivery, stream) = DeliveryQueue::new(5);

        ReconnectLoop::new(transport, delivery, controller.clone(), &SyncConfig::new(), signal)
            .run();

        assert!(controller.is_shutdown());
        assert!(stream.iter().next().is_none());
    }

    fn spawn_worker(
        transport: Arc<ScriptedTransport>,
        config: SyncConfig,
    ) -> (Arc<ShutdownController>, std::thread::JoinHandle<()>) {
        let (controller, signal) = ShutdownController::new(transport.clone());
        let controller = Arc::new(controller);
        let (delivery, _stream) = DeliveryQueue::new(config.delivery_queue_capacity);
        let handle = {
            let controller = controller.clone();
            std::thread::spawn(move || {
                ReconnectLoop::new(transport, delivery, controller, &config, signal).run()
            })
        };
        (controller, handle)
    }

    fn wait_until(condition: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn shutdown_interrupts_blocked_receive() {
        // No scripts: the session stays open and silent until the transport is closed.
        let transport = Arc::new(ScriptedTransport::default());
        let (controller, handle) = spawn_worker(transport.clone(), SyncConfig::new());
        wait_until(|| transport.opened() == 1);

        assert!(controller.shutdown());
        handle.join().unwrap();

        assert_eq!(transport.opened(), 1);
        assert_eq!(transport.closed(), 1);
    }

    #[test]
    fn shutdown_interrupts_backoff_sleep() {
        let transport = Arc::new(ScriptedTransport::new(vec![vec![error()]]));
        let config = SyncConfig::new().with_backoff(Duration::from_secs(60), Duration::from_secs(60));
        let (controller, handle) = spawn_worker(transport.clone(), config);
        wait_until(|| transport.opened() == 1);

        let start = Instant::now();
        controller.shutdown();
        handle.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(30));
        assert_eq!(transport.opened(), 1);
    }
}
