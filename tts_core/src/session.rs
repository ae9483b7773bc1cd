//! One utterance at a time: fetch or replay audio into the shared buffer and
//! hand it to a real-time consumer frame by frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use fetch_core::{ChunkSink, FetchHandle, FetchOutcome, FetchRequest, SinkError, StreamingFetcher};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::buffer::ByteAccumulator;
use crate::cache::{CacheStore, CacheWriter};
use crate::config::SessionConfig;
use crate::error::TtsError;
use crate::format::OutputFormat;
use crate::ulaw;

/// Text to synthesize plus an optional voice override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<String>,
}

impl Utterance {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: None,
        }
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = Some(voice.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionCause {
    Normal,
    Error,
    Cancelled,
}

impl CompletionCause {
    pub fn from_outcome(outcome: &FetchOutcome) -> Self {
        match outcome {
            FetchOutcome::Success => CompletionCause::Normal,
            FetchOutcome::Aborted => CompletionCause::Cancelled,
            _ => CompletionCause::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingFirstByte,
    Streaming,
    Draining,
    Completed(CompletionCause),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartKind {
    CacheHit,
    Network,
}

/// What the consumer should play for the current frame period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameResult {
    Audio(Vec<u8>),
    /// No audio yet; play `len` bytes of silence. `keep_alive` is set once
    /// per keep-alive interval of consecutive silent frames.
    Silence { len: usize, keep_alive: bool },
    /// Reported once when the utterance has been fully delivered or failed.
    Completion(CompletionCause),
    /// Nothing is active.
    Idle,
}

type SharedWriter = Arc<Mutex<Option<CacheWriter>>>;

#[derive(Debug, Default)]
struct SinkFlags {
    first_byte: AtomicBool,
    failed: AtomicBool,
}

/// Bookkeeping for the utterance in flight.
struct ActiveFetch {
    handle: Option<FetchHandle>,
    outcome: Option<FetchOutcome>,
    flags: Arc<SinkFlags>,
    writer: Option<SharedWriter>,
}

impl ActiveFetch {
    fn replayed() -> Self {
        Self {
            handle: None,
            outcome: Some(FetchOutcome::Success),
            flags: Arc::new(SinkFlags::default()),
            writer: None,
        }
    }

    fn poll_outcome(&mut self) -> bool {
        if self.outcome.is_none() {
            if let Some(handle) = self.handle.as_mut() {
                self.outcome = handle.try_outcome();
            }
        }
        self.outcome.is_some()
    }
}

fn take_writer(writer: &SharedWriter) -> Option<CacheWriter> {
    writer.lock().unwrap_or_else(PoisonError::into_inner).take()
}

fn mirror_to_cache(writer: &SharedWriter, data: &[u8]) {
    let mut guard = writer.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(active) = guard.as_mut() {
        if let Err(e) = active.append(data) {
            warn!("Cache write failed, caching disabled for this request: {e}");
            if let Some(mut broken) = guard.take() {
                broken.discard();
            }
        }
    }
}

pub struct SynthesisSession {
    config: Arc<SessionConfig>,
    format: OutputFormat,
    fetcher: Arc<dyn StreamingFetcher>,
    cache: Option<CacheStore>,
    buffer: Arc<ByteAccumulator>,
    state: SessionState,
    active: Option<ActiveFetch>,
    silent_frames: u32,
    keepalive_frames: u32,
    sample_bytes: usize,
}

impl SynthesisSession {
    pub(crate) fn new(
        config: Arc<SessionConfig>,
        format: OutputFormat,
        fetcher: Arc<dyn StreamingFetcher>,
        cache: Option<CacheStore>,
    ) -> Self {
        let buffer = Arc::new(ByteAccumulator::for_frame_bytes(config.frame_bytes(&format)));
        let keepalive_frames = config.keepalive_frames();
        let sample_bytes = format.delivered_sample_bytes(config.fallback_to_pcm);
        Self {
            config,
            format,
            fetcher,
            cache,
            buffer,
            state: SessionState::Idle,
            active: None,
            silent_frames: 0,
            keepalive_frames,
            sample_bytes,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Size of one frame period of delivered audio.
    pub fn frame_bytes(&self) -> usize {
        self.config.frame_bytes(&self.format)
    }

    /// Begins `utterance`, cancelling whatever was active first.
    ///
    /// A cache hit fills the buffer before returning; otherwise a background
    /// fetch is started and this returns immediately.
    pub fn start(&mut self, utterance: Utterance) -> Result<StartKind, TtsError> {
        if utterance.text.trim().is_empty() {
            return Err(TtsError::EmptyText);
        }
        if self.is_active() {
            info!("Cancelling active utterance before starting a new one");
            self.cancel();
        }
        self.buffer.clear();
        self.silent_frames = 0;

        let voice = utterance
            .voice
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| self.config.voice_id.clone());
        let text = utterance.text;

        let key = self.cache.as_ref().map(|_| {
            CacheStore::compute_key(&voice, &self.config.model_id, self.format.as_str(), &text)
        });

        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(path) = cache.lookup(key, &self.format) {
                info!("Cache hit: {}", path.display());
                let buffer = self.buffer.clone();
                match cache.stream_playback(&path, |chunk| buffer.write(chunk)) {
                    Ok(_) => {
                        self.active = Some(ActiveFetch::replayed());
                        self.state = SessionState::Draining;
                        return Ok(StartKind::CacheHit);
                    }
                    Err(e) => {
                        warn!("Cache playback of {} failed, fetching instead: {e}", path.display());
                        self.buffer.clear();
                    }
                }
            }
        }

        self.state = SessionState::AwaitingFirstByte;

        let writer = match (&self.cache, &key) {
            (Some(cache), Some(key)) => {
                match cache.begin_write(key, &self.format, self.config.fallback_to_pcm) {
                    Ok(writer) => Some(Arc::new(Mutex::new(Some(writer)))),
                    Err(e) => {
                        warn!("Failed to open cache temp file, not caching this request: {e}");
                        None
                    }
                }
            }
            _ => None,
        };

        let flags = Arc::new(SinkFlags::default());
        let request = self.build_request(&voice, &text);
        let sink = self.build_sink(flags.clone(), writer.clone());

        match self.fetcher.start(request, sink) {
            Ok(handle) => {
                self.active = Some(ActiveFetch {
                    handle: Some(handle),
                    outcome: None,
                    flags,
                    writer,
                });
                Ok(StartKind::Network)
            }
            Err(e) => {
                error!("Failed to start synthesis: {e}");
                if let Some(mut writer) = writer.as_ref().and_then(take_writer) {
                    writer.discard();
                }
                self.state = SessionState::Completed(CompletionCause::Error);
                Err(e.into())
            }
        }
    }

    fn build_request(&self, voice: &str, text: &str) -> FetchRequest {
        let url = format!(
            "{}/{}/stream?output_format={}&optimize_streaming_latency={}",
            self.config.base_url.trim_end_matches('/'),
            voice,
            self.format,
            self.config.optimize_streaming_latency
        );
        let body = serde_json::json!({
            "text": text,
            "model_id": self.config.model_id,
        });

        FetchRequest::post(url, body.to_string())
            .header("Content-Type", "application/json")
            .header("Accept", "*/*")
            .header("xi-api-key", self.config.api_key.as_str())
            .timeouts(self.config.timeouts())
    }

    fn build_sink(&self, flags: Arc<SinkFlags>, writer: Option<SharedWriter>) -> ChunkSink {
        let buffer = self.buffer.clone();
        let decode = self.format.decodes_ulaw(self.config.fallback_to_pcm);

        Box::new(move |chunk: &[u8]| {
            flags.first_byte.store(true, Ordering::Release);

            let decoded;
            let data: &[u8] = if decode {
                decoded = ulaw::decode_buffer(chunk);
                &decoded
            } else {
                chunk
            };

            if let Err(e) = buffer.write(data) {
                error!("Audio buffer write failed: {e}");
                flags.failed.store(true, Ordering::Release);
                return Err(SinkError(e.to_string()));
            }
            if let Some(writer) = &writer {
                mirror_to_cache(writer, data);
            }
            Ok(())
        })
    }

    /// Produces the next frame for the consumer. Never blocks. A
    /// `frame_size` of zero means [`frame_bytes`](Self::frame_bytes).
    pub fn pull_frame(&mut self, frame_size: usize) -> FrameResult {
        let frame_size = match frame_size {
            0 => self.frame_bytes(),
            n => n,
        };
        let Some(active) = self.active.as_mut() else {
            return FrameResult::Idle;
        };

        // The outcome is published after the final sink call, so once it is
        // seen every byte of the utterance is already buffered.
        let terminal = active.poll_outcome();
        if self.state == SessionState::AwaitingFirstByte
            && active.flags.first_byte.load(Ordering::Acquire)
        {
            self.state = SessionState::Streaming;
        }
        if terminal
            && matches!(
                self.state,
                SessionState::AwaitingFirstByte | SessionState::Streaming
            )
        {
            self.state = SessionState::Draining;
        }

        let available = self.buffer.len();
        if available >= frame_size || (terminal && available > 0) {
            self.silent_frames = 0;
            return FrameResult::Audio(self.buffer.read_frame(frame_size));
        }

        let whole = available - available % self.sample_bytes.max(1);
        if !terminal && whole > 0 {
            self.silent_frames = 0;
            let mut frame = self.buffer.read_frame(whole);
            if self.config.pad_partial_frames {
                frame.resize(frame_size, 0);
            }
            return FrameResult::Audio(frame);
        }

        if !terminal {
            self.silent_frames += 1;
            let keep_alive = self.silent_frames >= self.keepalive_frames;
            if keep_alive {
                debug!("No audio for {} frames, sending keep-alive", self.silent_frames);
                self.silent_frames = 0;
            }
            return FrameResult::Silence {
                len: frame_size,
                keep_alive,
            };
        }

        FrameResult::Completion(self.finish())
    }

    fn finish(&mut self) -> CompletionCause {
        let Some(mut active) = self.active.take() else {
            return CompletionCause::Normal;
        };
        let outcome = active.outcome.take().unwrap_or(FetchOutcome::Aborted);
        let cause = if active.flags.failed.load(Ordering::Acquire) {
            CompletionCause::Error
        } else {
            CompletionCause::from_outcome(&outcome)
        };

        if let Some(mut writer) = active.writer.as_ref().and_then(take_writer) {
            if let Err(e) = writer.commit(cause == CompletionCause::Normal) {
                warn!("Failed to save cache entry: {e}");
            }
        }
        // The worker has already reported, so dropping the handle only reaps
        // a thread that is exiting.
        drop(active.handle.take());

        self.silent_frames = 0;
        self.state = SessionState::Completed(cause);
        info!("Synthesis completed ({outcome}), cause: {cause:?}");
        cause
    }

    /// Stops the active utterance, joining its fetch worker. Safe in any
    /// state; does nothing when idle.
    pub fn cancel(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        self.buffer.clear();
        if let Some(mut handle) = active.handle.take() {
            handle.cancel();
        }
        if let Some(mut writer) = active.writer.as_ref().and_then(take_writer) {
            writer.discard();
        }
        // Anything the worker wrote before it was joined.
        self.buffer.clear();
        self.silent_frames = 0;
        self.state = SessionState::Cancelled;
        info!("Synthesis cancelled");
    }
}

impl Drop for SynthesisSession {
    fn drop(&mut self) {
        self.cancel();
    }
}
