// Session configuration

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use fetch_core::Timeouts;

use crate::error::ConfigError;
use crate::format::{Codec, OutputFormat};

pub const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io/v1/text-to-speech";
pub const DEFAULT_MODEL_ID: &str = "eleven_multilingual_v2";
pub const DEFAULT_OUTPUT_FORMAT: &str = "ulaw_8000";
pub const DEFAULT_CACHE_DIR: &str = "./data/11labs";

/// Elapsed silent frame time after which a keep-alive is signalled.
pub const KEEPALIVE_INTERVAL_MS: u32 = 500;

#[derive(Clone)]
pub struct SessionConfig {
    pub api_key: String,
    pub voice_id: String,
    pub model_id: String,
    pub output_format: String,
    pub base_url: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Provider latency optimization level, 0..=4.
    pub optimize_streaming_latency: u8,
    /// Convert μ-law to PCM16 before buffering and caching.
    pub fallback_to_pcm: bool,
    pub cache_enabled: bool,
    pub cache_dir: PathBuf,
    pub frame_ms: u32,
    /// Zero-fill short frames while the fetch is still running.
    pub pad_partial_frames: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            voice_id: String::new(),
            model_id: DEFAULT_MODEL_ID.to_string(),
            output_format: DEFAULT_OUTPUT_FORMAT.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout_ms: 5000,
            read_timeout_ms: 15000,
            optimize_streaming_latency: 0,
            fallback_to_pcm: true,
            cache_enabled: false,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            frame_ms: 20,
            pad_partial_frames: true,
        }
    }
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("voice_id", &self.voice_id)
            .field("model_id", &self.model_id)
            .field("output_format", &self.output_format)
            .field("base_url", &self.base_url)
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("read_timeout_ms", &self.read_timeout_ms)
            .field("optimize_streaming_latency", &self.optimize_streaming_latency)
            .field("fallback_to_pcm", &self.fallback_to_pcm)
            .field("cache_enabled", &self.cache_enabled)
            .field("cache_dir", &self.cache_dir)
            .field("frame_ms", &self.frame_ms)
            .field("pad_partial_frames", &self.pad_partial_frames)
            .finish()
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary variable source. Unparsable values
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, default: String| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
        };
        let number = |key: &str| lookup(key).and_then(|v| v.trim().parse::<u64>().ok());
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|v| parse_bool(&v))
                .unwrap_or(default)
        };

        Self {
            api_key: text("ELEVENLABS_API_KEY", defaults.api_key),
            voice_id: text("ELEVENLABS_VOICE_ID", defaults.voice_id),
            model_id: text("ELEVENLABS_MODEL_ID", defaults.model_id),
            output_format: text("ELEVENLABS_OUTPUT_FORMAT", defaults.output_format),
            base_url: text("ELEVENLABS_BASE_URL", defaults.base_url),
            connect_timeout_ms: number("TTS_CONNECT_TIMEOUT_MS")
                .unwrap_or(defaults.connect_timeout_ms),
            read_timeout_ms: number("TTS_READ_TIMEOUT_MS").unwrap_or(defaults.read_timeout_ms),
            optimize_streaming_latency: number("TTS_OPTIMIZE_STREAMING_LATENCY")
                .and_then(|v| u8::try_from(v).ok())
                .unwrap_or(defaults.optimize_streaming_latency),
            fallback_to_pcm: flag("TTS_FALLBACK_PCM", defaults.fallback_to_pcm),
            cache_enabled: flag("TTS_CACHE_ENABLED", defaults.cache_enabled),
            cache_dir: lookup("TTS_CACHE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            frame_ms: number("TTS_FRAME_MS")
                .and_then(|v| u32::try_from(v).ok())
                .unwrap_or(defaults.frame_ms),
            pad_partial_frames: flag("TTS_PAD_PARTIAL_FRAMES", defaults.pad_partial_frames),
        }
    }

    pub fn validate(&self) -> Result<OutputFormat, ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.voice_id.trim().is_empty() {
            return Err(ConfigError::MissingVoice);
        }
        if self.optimize_streaming_latency > 4 {
            return Err(ConfigError::InvalidLatency(self.optimize_streaming_latency));
        }
        if self.frame_ms == 0 {
            return Err(ConfigError::ZeroFrameDuration);
        }
        let format = self.format()?;
        if format.codec() == Codec::Alaw && self.fallback_to_pcm {
            return Err(ConfigError::UnsupportedAlawFallback);
        }
        Ok(format)
    }

    pub fn format(&self) -> Result<OutputFormat, ConfigError> {
        OutputFormat::parse(&self.output_format)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect: Duration::from_millis(self.connect_timeout_ms),
            read: Duration::from_millis(self.read_timeout_ms),
        }
    }

    /// Bytes in one frame of delivered audio for `format`.
    pub fn frame_bytes(&self, format: &OutputFormat) -> usize {
        let samples = format.sample_rate() as usize * self.frame_ms as usize / 1000;
        samples.max(1) * format.delivered_sample_bytes(self.fallback_to_pcm)
    }

    /// Consecutive silent frames that make up one keep-alive interval.
    pub fn keepalive_frames(&self) -> u32 {
        (KEEPALIVE_INTERVAL_MS / self.frame_ms.max(1)).max(1)
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(self.frame_ms as u64)
    }
}
