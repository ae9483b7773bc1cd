//! Background streaming fetch for speech synthesis requests.
//!
//! A fetch runs on its own worker thread, hands every received body chunk to
//! a caller-supplied sink, and reports exactly one [`FetchOutcome`] through a
//! one-shot slot that the owner polls without blocking. Cancelling a fetch
//! joins the worker, so once [`FetchHandle::cancel`] returns the sink is never
//! invoked again.

mod handle;
mod http;

use std::{fmt, time::Duration};

use thiserror::Error;

pub use handle::FetchHandle;
pub use http::HttpFetcher;
pub use tokio_util::sync::CancellationToken;

/// Terminal status of one background fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success,
    /// The provider answered with a non-2xx status.
    HttpError(u16),
    /// Connection, TLS or body read failure.
    TransportError(String),
    /// Connect or read timeout exceeded.
    TimedOut,
    /// Stopped on request, either by the owner or by a failing sink.
    Aborted,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, FetchOutcome::Aborted)
    }
}

impl fmt::Display for FetchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchOutcome::Success => f.write_str("success"),
            FetchOutcome::HttpError(code) => write!(f, "HTTP {code}"),
            FetchOutcome::TransportError(reason) => write!(f, "transport error: {reason}"),
            FetchOutcome::TimedOut => f.write_str("timed out"),
            FetchOutcome::Aborted => f.write_str("aborted"),
        }
    }
}

/// Errors raised while *starting* a fetch. Failures of a running transfer are
/// reported as a [`FetchOutcome`] instead.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to spawn fetch worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Returned by a sink to stop the transfer. The fetch then ends as
/// [`FetchOutcome::Aborted`].
#[derive(Debug, Error)]
#[error("chunk sink rejected data: {0}")]
pub struct SinkError(pub String);

/// Receives every body chunk, synchronously, on the worker thread.
pub type ChunkSink = Box<dyn FnMut(&[u8]) -> Result<(), SinkError> + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect: Duration,
    /// Longest wait for the response head or for the next body chunk.
    pub read: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(5000),
            read: Duration::from_millis(15000),
        }
    }
}

/// A streaming POST request.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub body: String,
    pub headers: Vec<(String, String)>,
    pub timeouts: Timeouts,
}

impl FetchRequest {
    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
            headers: Vec::new(),
            timeouts: Timeouts::default(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// Starts background fetches. Implemented by [`HttpFetcher`] for the real
/// provider; tests and alternative transports supply their own.
pub trait StreamingFetcher: Send + Sync {
    fn start(&self, request: FetchRequest, sink: ChunkSink) -> Result<FetchHandle, FetchError>;
}
