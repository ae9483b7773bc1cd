use thiserror::Error;

use fetch_core::FetchError;

/// Failures of the synthesis pipeline.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("failed to start fetch: {0}")]
    Fetch(#[from] FetchError),

    #[error("cache I/O error: {0}")]
    Cache(#[from] std::io::Error),

    #[error("utterance text is empty")]
    EmptyText,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    #[error("out of memory growing audio buffer to {requested} bytes")]
    OutOfMemory { requested: usize },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing API key")]
    MissingApiKey,

    #[error("missing voice id")]
    MissingVoice,

    #[error("optimize_streaming_latency must be between 0 and 4, got {0}")]
    InvalidLatency(u8),

    #[error("frame duration must be greater than zero")]
    ZeroFrameDuration,

    #[error("unparsable output format '{0}'")]
    InvalidFormat(String),

    #[error("A-law output cannot be converted to PCM; disable fallback or pick another format")]
    UnsupportedAlawFallback,
}
