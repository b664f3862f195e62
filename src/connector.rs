//! The sync connector: a background worker keeping flag configuration in sync with a flagd
//! server.
use std::sync::Arc;

use crate::{
    delivery::{DeliveryQueue, PayloadStream},
    http::HttpTransport,
    shutdown::ShutdownController,
    transport::SyncTransport,
    worker::ReconnectLoop,
    Error, Result, SyncConfig,
};

/// A flag sync stream connector.
///
/// The connector runs a background thread that subscribes to the sync stream, reconnects with
/// exponential backoff whenever the stream ends or fails, and publishes full configuration
/// snapshots to a bounded queue available through [`SyncConnector::stream`].
///
/// Dropping the connector stops the worker without waiting for it to exit. Use
/// [`SyncConnector::shutdown`] to wait for it.
///
/// # Examples
///
/// ```no_run
/// # use flagd_sync::{SyncConfig, SyncConnector};
/// let connector = SyncConnector::start(SyncConfig::new().with_base_url("http://localhost:8015"))?;
/// let stream = connector.stream();
/// let payload = stream.take()?;
/// println!("{}: {}", payload.kind(), payload.content());
/// connector.shutdown()?;
/// # Ok::<(), flagd_sync::Error>(())
/// ```
pub struct SyncConnector {
    /// Taken by [`SyncConnector::shutdown`].
    join_handle: Option<std::thread::JoinHandle<()>>,
    shutdown: Arc<ShutdownController>,
    stream: PayloadStream,
}

impl SyncConnector {
    /// Start a connector streaming from the flagd sync service described by `config`.
    ///
    /// # Errors
    ///
    /// This method can return the following errors:
    /// - [`Error::InvalidConfiguration`] if `config` fails [`SyncConfig::validate`].
    /// - [`Error::InvalidBaseUrl`] if the base URL cannot be parsed.
    /// - [`Error::Network`] if the HTTP client cannot be built.
    /// - [`Error::Io`] if the worker thread failed to start.
    pub fn start(config: SyncConfig) -> Result<SyncConnector> {
        config.validate()?;
        let transport = HttpTransport::new(&config)?;
        SyncConnector::start_with_transport(Arc::new(transport), config)
    }

    /// Start a connector streaming from a custom `transport`.
    ///
    /// Transport settings in `config` (`base_url`, `token`, `connect_timeout`) are ignored.
    ///
    /// # Errors
    ///
    /// This method can return the following errors:
    /// - [`Error::InvalidConfiguration`] if `config` fails [`SyncConfig::validate`].
    /// - [`Error::Io`] if the worker thread failed to start.
    pub fn start_with_transport(
        transport: Arc<dyn SyncTransport>,
        config: SyncConfig,
    ) -> Result<SyncConnector> {
        config.validate()?;

        let (delivery, stream) = DeliveryQueue::new(config.delivery_queue_capacity);
        let (controller, stop_signal) = ShutdownController::new(transport.clone());
        let shutdown = Arc::new(controller);

        let join_handle = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name("flagd-sync".to_owned())
                .spawn(move || {
                    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                        ReconnectLoop::new(transport, delivery, shutdown, &config, stop_signal)
                            .run()
                    }));

                    if let Err(panic) = result {
                        log::error!(target: "flagd", "sync worker panicked, flag configurations are stale");
                        // Re-raise so that `shutdown()` reports it.
                        std::panic::resume_unwind(panic);
                    }
                })?
        };

        Ok(SyncConnector {
            join_handle: Some(join_handle),
            shutdown,
            stream,
        })
    }

    /// Get a handle to the queue of payloads produced by this connector.
    ///
    /// Every call returns a handle to the same queue.
    pub fn stream(&self) -> PayloadStream {
        self.stream.clone()
    }

    /// Stop the connector.
    ///
    /// This closes the transport and signals the worker to exit, but does not wait for it to
    /// actually stop. Calling it more than once, from any thread, is a no-op.
    pub fn stop(&self) {
        self.shutdown.shutdown();
    }

    /// Returns `true` once [`SyncConnector::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_shutdown()
    }

    /// Stop the connector and block waiting for the worker to exit.
    ///
    /// If you don't need to wait for the worker to exit, use [`SyncConnector::stop`] instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WorkerPanicked`] if the worker thread has panicked.
    pub fn shutdown(mut self) -> Result<()> {
        // Send stop signal in case it wasn't sent before.
        self.stop();

        if let Some(join_handle) = self.join_handle.take() {
            join_handle.join().map_err(|_| Error::WorkerPanicked)?;
        }

        Ok(())
    }
}

impl Drop for SyncConnector {
    fn drop(&mut self) {
        self.stop();
    }
}
