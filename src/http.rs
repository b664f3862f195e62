//! HTTP transport for the flagd sync stream.
//!
//! Speaks the JSON streaming form of `flagd.sync.v1.FlagSyncService/SyncFlags`: the request is a
//! JSON-encoded [`SyncRequest`] and the response body is newline-delimited JSON where every line
//! holds either a `result` (a [`SyncFlagsResponse`]) or an `error` status.
use reqwest::{header, Url};
use serde::Deserialize;
use tokio::sync::watch;

use crate::{
    message::{StreamError, SyncFlagsResponse},
    transport::{SessionSink, SyncRequest, SyncTransport},
    Error, Result, SyncConfig,
};

const SYNC_ENDPOINT: &str = "/flagd.sync.v1.FlagSyncService/SyncFlags";

/// A [`SyncTransport`] streaming flag configurations over HTTP.
///
/// Every session runs on its own thread with a single-threaded async runtime, so sessions never
/// share state with each other or with the worker.
pub struct HttpTransport {
    // Client holds a connection pool internally, so we're reusing the client between sessions.
    client: reqwest::Client,
    url: Url,
    token: Option<String>,
    max_frame_size: usize,
    /// Flipped to `true` once by [`SyncTransport::close`]. Open sessions watch it.
    closed: watch::Sender<bool>,
}

impl HttpTransport {
    /// Create a transport for the sync service at `config.base_url`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidBaseUrl`] if the base URL cannot be parsed.
    /// - [`Error::Network`] if the HTTP client cannot be built.
    pub fn new(config: &SyncConfig) -> Result<HttpTransport> {
        let url = Url::parse(&format!(
            "{}{}",
            config.base_url.trim_end_matches('/'),
            SYNC_ENDPOINT
        ))
        .map_err(Error::InvalidBaseUrl)?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(concat!("flagd-sync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let (closed, _) = watch::channel(false);

        Ok(HttpTransport {
            client,
            url,
            token: config.token.clone(),
            max_frame_size: config.max_frame_size,
            closed,
        })
    }

    /// Full URL of the sync endpoint.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl SyncTransport for HttpTransport {
    fn sync_flags(&self, request: SyncRequest, sink: SessionSink) -> Result<()> {
        if *self.closed.borrow() {
            return Err(Error::TransportClosed);
        }

        let mut builder = self
            .client
            .post(self.url.clone())
            .header(header::ACCEPT, "application/x-ndjson")
            .json(&request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        let closed = self.closed.subscribe();
        let decoder = LineDecoder::new(self.max_frame_size);

        std::thread::Builder::new()
            .name("flagd-sync-session".to_owned())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        log::warn!(target: "flagd", "failed to start session runtime: {err}");
                        // Dropping the sink reports the session as disconnected.
                        return;
                    }
                };
                runtime.block_on(run_session(builder, decoder, sink, closed));
            })?;

        Ok(())
    }

    fn close(&self) {
        self.closed.send_replace(true);
    }
}

async fn run_session(
    request: reqwest::RequestBuilder,
    decoder: LineDecoder,
    sink: SessionSink,
    mut closed: watch::Receiver<bool>,
) {
    tokio::select! {
        // Returning drops the response and the sink, which releases the connection and wakes
        // the worker.
        _ = closed.wait_for(|closed| *closed) => {
            log::debug!(target: "flagd", "transport closed, ending sync session");
        }
        _ = sink.closed() => {
            log::debug!(target: "flagd", "sync session abandoned by worker");
        }
        () = stream_responses(request, decoder, &sink) => {}
    }
}

async fn stream_responses(
    request: reqwest::RequestBuilder,
    mut decoder: LineDecoder,
    sink: &SessionSink,
) {
    let mut response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            sink.on_error(err.into()).await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        sink.on_error(StreamError::Status(status.as_u16())).await;
        return;
    }
    log::debug!(target: "flagd", "sync stream established");

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let lines = match decoder.push(&chunk) {
                    Ok(lines) => lines,
                    Err(err) => {
                        sink.on_error(err).await;
                        return;
                    }
                };
                for line in lines {
                    if !forward_frame(&line, sink).await {
                        return;
                    }
                }
            }
            Ok(None) => {
                if let Some(line) = decoder.finish() {
                    if !forward_frame(&line, sink).await {
                        return;
                    }
                }
                sink.on_completed().await;
                return;
            }
            Err(err) => {
                sink.on_error(err.into()).await;
                return;
            }
        }
    }
}

/// Decode one line and pass it on. Returns `false` if the session should end.
async fn forward_frame(line: &[u8], sink: &SessionSink) -> bool {
    match decode_frame(line) {
        Ok(Frame::Result(response)) => sink.on_next(response).await,
        Ok(Frame::Error(status)) => {
            sink.on_error(StreamError::Remote {
                code: status.code,
                message: status.message,
            })
            .await;
            false
        }
        Err(err) => {
            sink.on_error(err).await;
            false
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
enum Frame {
    Result(SyncFlagsResponse),
    Error(Status),
}

#[derive(Debug, Deserialize)]
struct Status {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

fn decode_frame(line: &[u8]) -> std::result::Result<Frame, StreamError> {
    Ok(serde_json::from_slice(line)?)
}

/// Splits a chunked body into non-empty lines of at most `max_frame_size` bytes.
#[derive(Debug)]
struct LineDecoder {
    buffer: Vec<u8>,
    /// Bytes of `buffer` already known not to contain a newline.
    scanned: usize,
    max_frame_size: usize,
}

impl LineDecoder {
    fn new(max_frame_size: usize) -> LineDecoder {
        LineDecoder {
            buffer: Vec::new(),
            scanned: 0,
            max_frame_size,
        }
    }

    /// Append `chunk` and return every line completed by it.
    ///
    /// Fails once a line grows beyond the maximum frame size.
    fn push(&mut self, chunk: &[u8]) -> std::result::Result<Vec<Vec<u8>>, StreamError> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') {
            let end = self.scanned + offset;
            if end - start > self.max_frame_size {
                return Err(self.too_large());
            }
            if let Some(line) = non_blank(&self.buffer[start..end]) {
                lines.push(line.to_vec());
            }
            start = end + 1;
            self.scanned = start;
        }

        self.buffer.drain(..start);
        self.scanned = self.buffer.len();
        if self.buffer.len() > self.max_frame_size {
            return Err(self.too_large());
        }
        Ok(lines)
    }

    fn too_large(&self) -> StreamError {
        StreamError::FrameTooLarge {
            limit: self.max_frame_size,
        }
    }

    /// Return the trailing line not terminated by a newline, if any.
    fn finish(&mut self) -> Option<Vec<u8>> {
        let rest = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        non_blank(&rest).map(<[u8]>::to_vec)
    }
}

fn non_blank(line: &[u8]) -> Option<&[u8]> {
    let start = line.iter().position(|b| !b.is_ascii_whitespace())?;
    let end = line.iter().rposition(|b| !b.is_ascii_whitespace())?;
    Some(&line[start..=end])
}
