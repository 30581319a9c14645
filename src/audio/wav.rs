//! # WAV Framing
//!
//! Wraps raw PCM bytes in a canonical 44-byte RIFF/WAVE header so a batch can be
//! uploaded as a self-describing audio file. The payload is copied unchanged.
//!
//! ## Header layout (all numbers little-endian):
//! | Offset | Size | Field                                   |
//! |--------|------|-----------------------------------------|
//! | 0      | 4    | `RIFF`                                  |
//! | 4      | 4    | chunk size = payload length + 36        |
//! | 8      | 4    | `WAVE`                                  |
//! | 12     | 4    | `fmt `                                  |
//! | 16     | 4    | fmt chunk size = 16                     |
//! | 20     | 2    | audio format = 1 (PCM)                  |
//! | 22     | 2    | channels                                |
//! | 24     | 4    | sample rate                             |
//! | 28     | 4    | byte rate = rate × channels × bits / 8  |
//! | 32     | 2    | block align = channels × bits / 8       |
//! | 34     | 2    | bits per sample                         |
//! | 36     | 4    | `data`                                  |
//! | 40     | 4    | payload length                          |

use byteorder::{ByteOrder, LittleEndian};

/// Size of the header written by [`frame_pcm`].
pub const WAV_HEADER_LEN: usize = 44;

const PCM_FORMAT_TAG: u16 = 1;

/// PCM stream parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WavFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

impl WavFormat {
    /// The fixed format browsers stream to this service: 16 kHz, mono, 16-bit.
    pub const PCM_16K_MONO: WavFormat = WavFormat {
        sample_rate: 16000,
        channels: 1,
        bits_per_sample: 16,
    };

    pub fn byte_rate(&self) -> u32 {
        self.sample_rate * self.channels as u32 * self.bits_per_sample as u32 / 8
    }

    pub fn block_align(&self) -> u16 {
        self.channels * self.bits_per_sample / 8
    }
}

impl Default for WavFormat {
    fn default() -> Self {
        Self::PCM_16K_MONO
    }
}

/// Build a WAV container around `pcm`.
///
/// Payloads longer than `u32::MAX - 36` bytes cannot be described by a RIFF header;
/// the size fields saturate in that case. The session's buffer cap keeps batches far
/// below that limit.
pub fn frame_pcm(pcm: &[u8], format: WavFormat) -> Vec<u8> {
    let data_len = u32::try_from(pcm.len()).unwrap_or(u32::MAX);

    let mut header = [0u8; WAV_HEADER_LEN];
    header[0..4].copy_from_slice(b"RIFF");
    LittleEndian::write_u32(&mut header[4..8], data_len.saturating_add(36));
    header[8..12].copy_from_slice(b"WAVE");
    header[12..16].copy_from_slice(b"fmt ");
    LittleEndian::write_u32(&mut header[16..20], 16);
    LittleEndian::write_u16(&mut header[20..22], PCM_FORMAT_TAG);
    LittleEndian::write_u16(&mut header[22..24], format.channels);
    LittleEndian::write_u32(&mut header[24..28], format.sample_rate);
    LittleEndian::write_u32(&mut header[28..32], format.byte_rate());
    LittleEndian::write_u16(&mut header[32..34], format.block_align());
    LittleEndian::write_u16(&mut header[34..36], format.bits_per_sample);
    header[36..40].copy_from_slice(b"data");
    LittleEndian::write_u32(&mut header[40..44], data_len);

    let mut wav = Vec::with_capacity(WAV_HEADER_LEN + pcm.len());
    wav.extend_from_slice(&header);
    wav.extend_from_slice(pcm);
    wav
}

/// Payload length declared by a header produced by [`frame_pcm`].
#[cfg(test)]
pub fn declared_data_len(wav: &[u8]) -> Option<u32> {
    if wav.len() < WAV_HEADER_LEN || &wav[36..40] != b"data" {
        return None;
    }
    Some(LittleEndian::read_u32(&wav[40..44]))
}
