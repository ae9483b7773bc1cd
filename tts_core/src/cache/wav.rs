/// Size of the fixed RIFF/WAVE header written in front of cached audio.
pub const WAV_HEADER_LEN: usize = 44;

pub const FORMAT_PCM: u16 = 1;
pub const FORMAT_ALAW: u16 = 6;
pub const FORMAT_ULAW: u16 = 7;

/// Mono payload description for the cache header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub audio_format: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
}

impl WavFormat {
    pub fn pcm16(sample_rate: u32) -> Self {
        Self {
            audio_format: FORMAT_PCM,
            sample_rate,
            bits_per_sample: 16,
        }
    }

    pub fn ulaw(sample_rate: u32) -> Self {
        Self {
            audio_format: FORMAT_ULAW,
            sample_rate,
            bits_per_sample: 8,
        }
    }

    pub fn alaw(sample_rate: u32) -> Self {
        Self {
            audio_format: FORMAT_ALAW,
            sample_rate,
            bits_per_sample: 8,
        }
    }
}

/// Builds the 44-byte header for `data_size` bytes of payload.
pub fn header(format: WavFormat, data_size: u32) -> [u8; WAV_HEADER_LEN] {
    let num_channels: u16 = 1;
    let bytes_per_sample = format.bits_per_sample / 8;
    let byte_rate =
        u64::from(format.sample_rate) * u64::from(num_channels) * u64::from(bytes_per_sample);
    let byte_rate = u32::try_from(byte_rate).unwrap_or(u32::MAX);
    let block_align: u16 = num_channels * bytes_per_sample;
    let riff_size = data_size.saturating_add(36);

    let mut out = Vec::<u8>::with_capacity(WAV_HEADER_LEN);

    // RIFF header
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&riff_size.to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt chunk
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&format.audio_format.to_le_bytes());
    out.extend_from_slice(&num_channels.to_le_bytes());
    out.extend_from_slice(&format.sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&format.bits_per_sample.to_le_bytes());

    // data chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_size.to_le_bytes());

    let mut header = [0u8; WAV_HEADER_LEN];
    header.copy_from_slice(&out);
    header
}
