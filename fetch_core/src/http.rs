use std::time::Instant;

use futures_util::StreamExt;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{ChunkSink, FetchError, FetchHandle, FetchOutcome, FetchRequest, StreamingFetcher};

/// Longest provider error body echoed into the log.
const MAX_ERROR_BODY: usize = 512;

/// Streaming HTTP POST over reqwest.
///
/// Every fetch gets its own worker thread running a current-thread tokio
/// runtime, and its own client so that pooled connections never outlive the
/// runtime that drives them.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    user_agent: Option<String>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    fn build_client(&self, request: &FetchRequest) -> Result<Client, FetchError> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .connect_timeout(request.timeouts.connect);
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent.clone());
        }
        Ok(builder.build()?)
    }
}

impl StreamingFetcher for HttpFetcher {
    fn start(&self, request: FetchRequest, sink: ChunkSink) -> Result<FetchHandle, FetchError> {
        let client = self.build_client(&request)?;
        let started = Instant::now();
        info!("Starting synthesis with URL: {}", request.url);
        debug!("POST data: {}", request.body);

        FetchHandle::spawn("tts-fetch", move |token| {
            run_transfer(client, request, sink, token, started)
        })
    }
}

fn run_transfer(
    client: Client,
    request: FetchRequest,
    mut sink: ChunkSink,
    token: CancellationToken,
    started: Instant,
) -> FetchOutcome {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to build fetch runtime: {e}");
            return FetchOutcome::TransportError(e.to_string());
        }
    };

    runtime.block_on(async move {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("TTS API request was stopped");
                FetchOutcome::Aborted
            }
            outcome = transfer(&client, request, &mut sink, started) => outcome,
        }
    })
}

async fn transfer(
    client: &Client,
    request: FetchRequest,
    sink: &mut ChunkSink,
    started: Instant,
) -> FetchOutcome {
    let read_timeout = request.timeouts.read;
    let mut builder = client.post(&request.url).body(request.body);
    for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let response = match tokio::time::timeout(read_timeout, builder.send()).await {
        Err(_) => {
            error!("TTS API request timed out waiting for response after {:?}", read_timeout);
            return FetchOutcome::TimedOut;
        }
        Ok(Err(e)) => return classify(e),
        Ok(Ok(response)) => response,
    };

    let status = response.status();
    info!("TTS API response: {:?} {}", response.version(), status);
    if !status.is_success() {
        let body = tokio::time::timeout(read_timeout, response.text())
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();
        let body: String = body.chars().take(MAX_ERROR_BODY).collect();
        error!("TTS API returned HTTP {}: {}", status.as_u16(), body);
        return FetchOutcome::HttpError(status.as_u16());
    }

    let mut stream = response.bytes_stream();
    let mut first_chunk = true;
    let mut total = 0usize;
    loop {
        let next = match tokio::time::timeout(read_timeout, stream.next()).await {
            Err(_) => {
                error!("TTS API stream stalled for {:?}, giving up", read_timeout);
                return FetchOutcome::TimedOut;
            }
            Ok(next) => next,
        };
        let chunk = match next {
            None => break,
            Some(Err(e)) => return classify(e),
            Some(Ok(chunk)) => chunk,
        };
        if chunk.is_empty() {
            continue;
        }
        if first_chunk {
            first_chunk = false;
            info!("TTFB (first audio chunk): {} ms", started.elapsed().as_millis());
        }
        debug!("Received {} bytes from TTS API", chunk.len());
        total += chunk.len();
        if let Err(e) = sink(&chunk[..]) {
            warn!("Aborting transfer: {e}");
            return FetchOutcome::Aborted;
        }
    }

    info!("TTS API synthesis completed successfully ({total} bytes)");
    FetchOutcome::Success
}

fn classify(e: reqwest::Error) -> FetchOutcome {
    if e.is_timeout() {
        error!("TTS API request timed out: {e}");
        FetchOutcome::TimedOut
    } else {
        error!("TTS API request failed: {e}");
        FetchOutcome::TransportError(e.to_string())
    }
}
