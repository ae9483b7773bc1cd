use std::fmt;

use serde::Serialize;

use crate::cache::wav::WavFormat;
use crate::error::ConfigError;

pub const DEFAULT_SAMPLE_RATE: u32 = 8000;

/// Highest sample rate accepted in a format identifier.
pub const MAX_SAMPLE_RATE: u32 = 384_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Pcm,
    Ulaw,
    Alaw,
    Mp3,
    Other,
}

/// Provider output format such as `ulaw_8000` or `mp3_44100_128`.
///
/// The raw identifier is kept verbatim for the request URL and the cache
/// fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFormat {
    raw: String,
    codec: Codec,
    sample_rate: u32,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidFormat(raw.to_string()));
        }

        let mut parts = trimmed.split(|c| c == '_' || c == '@');
        let family = parts.next().unwrap_or_default().to_ascii_lowercase();
        let codec = match family.as_str() {
            "pcm" => Codec::Pcm,
            "ulaw" | "mulaw" => Codec::Ulaw,
            "alaw" => Codec::Alaw,
            "mp3" => Codec::Mp3,
            _ => Codec::Other,
        };

        let sample_rate = match parts.next() {
            None | Some("") => DEFAULT_SAMPLE_RATE,
            Some(rate) => match rate.parse::<u32>() {
                Ok(rate) if (1..=MAX_SAMPLE_RATE).contains(&rate) => rate,
                _ if codec != Codec::Other => {
                    return Err(ConfigError::InvalidFormat(raw.to_string()))
                }
                _ => DEFAULT_SAMPLE_RATE,
            },
        };

        Ok(Self {
            raw: trimmed.to_string(),
            codec,
            sample_rate,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Whether incoming chunks are converted from μ-law to PCM16.
    pub fn decodes_ulaw(&self, fallback_to_pcm: bool) -> bool {
        self.codec == Codec::Ulaw && fallback_to_pcm
    }

    /// Width of one sample as delivered to the frame consumer.
    pub fn delivered_sample_bytes(&self, fallback_to_pcm: bool) -> usize {
        match self.codec {
            Codec::Ulaw if !fallback_to_pcm => 1,
            Codec::Alaw => 1,
            _ => 2,
        }
    }

    pub fn cache_extension(&self) -> &'static str {
        match self.codec {
            Codec::Pcm | Codec::Ulaw | Codec::Alaw => ".wav",
            Codec::Mp3 => ".mp3",
            Codec::Other => ".bin",
        }
    }

    pub fn is_wav_framed(&self) -> bool {
        self.cache_extension() == ".wav"
    }

    /// Describes the payload as stored in the cache, after any conversion.
    pub fn stored_wav_format(&self, fallback_to_pcm: bool) -> Option<WavFormat> {
        let rate = self.sample_rate;
        match self.codec {
            Codec::Pcm => Some(WavFormat::pcm16(rate)),
            Codec::Ulaw | Codec::Alaw if fallback_to_pcm => Some(WavFormat::pcm16(rate)),
            Codec::Ulaw => Some(WavFormat::ulaw(rate)),
            Codec::Alaw => Some(WavFormat::alaw(rate)),
            Codec::Mp3 | Codec::Other => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
