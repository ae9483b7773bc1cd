//! G.711 μ-law to 16-bit PCM decoding.

use std::sync::OnceLock;

const BIAS: i32 = 0x84;
const CLIP: i32 = 32635;

static TABLE: OnceLock<[i16; 256]> = OnceLock::new();

fn build_table() -> [i16; 256] {
    let mut table = [0i16; 256];
    for (i, slot) in table.iter_mut().enumerate() {
        let v = !(i as u8);
        let negative = v & 0x80 != 0;
        let exponent = (v >> 4) & 0x07;
        let mut magnitude = (((v & 0x0F) as i32) << 3) + BIAS;
        if exponent != 0 {
            magnitude += 1 << (exponent + 3);
        }
        let sample = if negative { -magnitude } else { magnitude };
        *slot = sample.clamp(-CLIP, CLIP) as i16;
    }
    table
}

/// Builds the lookup table. Idempotent and safe to race from several threads.
pub fn decode_table_init() {
    table();
}

fn table() -> &'static [i16; 256] {
    TABLE.get_or_init(build_table)
}

pub fn decode_byte(byte: u8) -> i16 {
    table()[byte as usize]
}

/// Decodes to little-endian 16-bit PCM; the output is exactly twice as long.
pub fn decode_buffer(input: &[u8]) -> Vec<u8> {
    let table = table();
    let mut out = Vec::with_capacity(input.len() * 2);
    for &byte in input {
        out.extend_from_slice(&table[byte as usize].to_le_bytes());
    }
    out
}
