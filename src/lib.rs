//! A resilient client for the flagd flag sync stream.
//!
//! # Overview
//!
//! [`SyncConnector`] keeps a long-lived subscription to a flagd sync service and republishes
//! full flag configuration snapshots to local consumers. It runs a single background thread
//! that:
//!
//! - opens a [transport](transport::SyncTransport) session issuing a full-sync request,
//! - classifies every received message, delivering full snapshots and ignoring incremental and
//!   keep-alive updates,
//! - reconnects with capped exponential [backoff](backoff::Backoff) plus random jitter whenever
//!   the stream completes or fails, for as long as the connector is running.
//!
//! Consumers read [`StreamPayload`]s from a bounded [`PayloadStream`]. A consumer that can't keep
//! up loses payloads rather than stalling the connection: when the queue is full, new payloads are
//! dropped. Since every data payload is a complete snapshot, the next one makes up for any that
//! were lost.
//!
//! [`HttpTransport`] is the default transport. Any other source can be plugged in by implementing
//! [`SyncTransport`](transport::SyncTransport) and using [`SyncConnector::start_with_transport`].
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum and are only returned while starting or shutting
//! down a connector. Failures of the stream itself are recovered automatically; consumers are
//! notified with a [`PayloadType::Error`] payload and should keep using the last configuration
//! they received.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate for logging messages with
//! the `flagd` target. Consider integrating a `log`-compatible logger implementation for better
//! visibility into connector operations.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

pub mod backoff;
pub mod classify;
pub mod message;
pub mod transport;

mod config;
mod connector;
mod delivery;
mod error;
mod http;
mod payload;
mod shutdown;
mod worker;

pub use config::SyncConfig;
pub use connector::SyncConnector;
pub use delivery::PayloadStream;
pub use error::{Error, Result};
pub use http::HttpTransport;
pub use payload::{PayloadType, StreamPayload};
