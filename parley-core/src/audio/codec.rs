//! Conversion between captured audio and the wire PCM format.
//!
//! Outbound: any rate / channel layout → mono 16 kHz → int16 LE → base64.
//! Inbound: base64 → int16 LE → f32 (`/ 32768.0`) → mono 24 kHz buffer.
//!
//! Quantisation rounds to the nearest int16 step after clamping to ±1.0, so
//! the encode error is at most half a step. Inputs above 32767.5/32768 have
//! no closer code than 32767 and saturate there with an error below one
//! step. Decode is the exact inverse.

use base64::prelude::*;

use super::resample::{downmix_to_mono, resample_offline};
use crate::buffering::chunk::AudioChunk;
use crate::error::{ParleyError, Result};

/// Rate the service accepts for microphone audio.
pub const OUTBOUND_SAMPLE_RATE: u32 = 16_000;

/// Rate of synthesized speech sent by the service.
pub const INBOUND_SAMPLE_RATE: u32 = 24_000;

/// MIME type carried by outbound media chunks.
pub const PCM_MIME_TYPE: &str = "audio/pcm";

/// One base64-encoded mono int16 PCM segment at a single fixed rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireAudioFrame {
    /// Base64 of the little-endian int16 samples.
    pub data: String,
    pub sample_rate: u32,
}

/// Decoded speech ready for the playback queue.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayableBuffer {
    /// Mono f32 samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl PlayableBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback length of this buffer.
    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Quantise one float sample to int16 with hard clamping.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    (s * 32768.0).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Encode a captured chunk into a wire frame at `target_rate`.
///
/// `max_bytes` bounds the encoded PCM payload.
///
/// # Errors
/// `ParleyError::AudioEncode` on an empty/invalid chunk, resampler failure or
/// when the payload would exceed `max_bytes`.
pub fn encode_outbound(
    chunk: &AudioChunk,
    target_rate: u32,
    max_bytes: usize,
) -> Result<WireAudioFrame> {
    if chunk.channels == 0 || chunk.sample_rate == 0 {
        return Err(ParleyError::AudioEncode(format!(
            "invalid chunk layout: {} Hz, {} channels",
            chunk.sample_rate, chunk.channels
        )));
    }
    if chunk.is_empty() {
        return Err(ParleyError::AudioEncode("empty audio chunk".into()));
    }

    let mono = downmix_to_mono(&chunk.samples, chunk.channels);
    let projected = (mono.len() as f64 * target_rate as f64 / chunk.sample_rate as f64) as usize;
    if projected * 2 > max_bytes {
        return Err(ParleyError::AudioEncode(format!(
            "encoded audio would be {} bytes (limit {max_bytes})",
            projected * 2
        )));
    }

    let mono = resample_offline(&mono, chunk.sample_rate, target_rate)?;

    let mut bytes = Vec::with_capacity(mono.len() * 2);
    for s in &mono {
        bytes.extend_from_slice(&f32_to_i16(*s).to_le_bytes());
    }

    Ok(WireAudioFrame {
        data: BASE64_STANDARD.encode(&bytes),
        sample_rate: target_rate,
    })
}

/// Decode a base64 int16 LE payload into a playable buffer at `sample_rate`.
///
/// # Errors
/// `ParleyError::AudioDecode` on invalid base64, an odd byte count or a
/// payload above `max_bytes`.
pub fn decode_inbound(data: &str, sample_rate: u32, max_bytes: usize) -> Result<PlayableBuffer> {
    // base64 expands 3 bytes into 4 chars; reject before allocating.
    if data.len() / 4 * 3 > max_bytes {
        return Err(ParleyError::AudioDecode(format!(
            "audio payload of {} chars exceeds limit {max_bytes} bytes",
            data.len()
        )));
    }

    let bytes = BASE64_STANDARD
        .decode(data.trim())
        .map_err(|e| ParleyError::AudioDecode(format!("base64: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(ParleyError::AudioDecode(format!(
            "pcm16 payload has odd length {}",
            bytes.len()
        )));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
        .collect();

    Ok(PlayableBuffer::new(samples, sample_rate))
}
