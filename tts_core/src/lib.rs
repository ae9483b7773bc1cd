//! Streaming speech synthesis pipeline.
//!
//! A [`SynthesisEngine`] validates the configuration once and hands out
//! [`SynthesisSession`]s. Each session fetches one utterance at a time in the
//! background (or replays it from the on-disk cache), decodes μ-law on the
//! fly and lets a real-time consumer pull fixed-size frames with
//! [`SynthesisSession::pull_frame`].

pub mod buffer;
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod format;
pub mod session;
pub mod ulaw;

pub use buffer::ByteAccumulator;
pub use cache::{CacheStore, CacheWriter};
pub use config::SessionConfig;
pub use engine::SynthesisEngine;
pub use error::{BufferError, ConfigError, TtsError};
pub use format::{Codec, OutputFormat};
pub use session::{
    CompletionCause, FrameResult, SessionState, StartKind, SynthesisSession, Utterance,
};
