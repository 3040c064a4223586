//! Outbound audio chunk handed to the session by the capturing collaborator.

use std::io::Cursor;

use crate::error::{ParleyError, Result};

/// A contiguous block of interleaved PCM samples at a known rate and layout.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Interleaved f32 samples, nominally in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate in Hz (e.g. 16000, 44100, 48000).
    pub sample_rate: u32,
    /// Interleaved channel count (1 = mono).
    pub channels: u16,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Mono chunk, the common case for microphone capture.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::new(samples, sample_rate, 1)
    }

    /// Build a chunk from raw signed 16-bit little-endian PCM bytes.
    ///
    /// # Errors
    /// Returns `ParleyError::AudioEncode` on an odd byte count.
    pub fn from_pcm16_le(bytes: &[u8], sample_rate: u32, channels: u16) -> Result<Self> {
        if bytes.len() % 2 != 0 {
            return Err(ParleyError::AudioEncode(format!(
                "pcm16 payload has odd length {}",
                bytes.len()
            )));
        }
        let samples = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0)
            .collect();
        Ok(Self::new(samples, sample_rate, channels))
    }

    /// Decode a complete WAV file held in memory.
    ///
    /// Integer formats are normalised by their bit depth; float WAVs are
    /// taken as-is.
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = hound::WavReader::new(Cursor::new(bytes))
            .map_err(|e| ParleyError::AudioEncode(format!("wav header: {e}")))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| ParleyError::AudioEncode(format!("wav samples: {e}")))?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| ParleyError::AudioEncode(format!("wav samples: {e}")))?
            }
        };

        Ok(Self::new(samples, spec.sample_rate, spec.channels))
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Returns the duration of this chunk in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / self.sample_rate as f64
    }

    /// Returns true if the chunk contains no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm16_bytes_are_normalised() {
        let bytes = [0x00, 0x40, 0x00, 0xC0]; // 16384, -16384
        let chunk = AudioChunk::from_pcm16_le(&bytes, 16_000, 1).unwrap();
        assert_eq!(chunk.samples, vec![0.5, -0.5]);
    }

    #[test]
    fn pcm16_odd_length_rejected() {
        let err = AudioChunk::from_pcm16_le(&[0, 1, 2], 16_000, 1).unwrap_err();
        assert!(matches!(err, ParleyError::AudioEncode(_)));
    }

    #[test]
    fn wav_bytes_decode_with_layout() {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for s in [16384i16, -16384, 0, 32767] {
                writer.write_sample(s).unwrap();
            }
            writer.finalize().unwrap();
        }

        let chunk = AudioChunk::from_wav_bytes(cursor.get_ref()).unwrap();
        assert_eq!(chunk.sample_rate, 44_100);
        assert_eq!(chunk.channels, 2);
        assert_eq!(chunk.frames(), 2);
        assert_eq!(chunk.samples[0], 0.5);
        assert_eq!(chunk.samples[1], -0.5);
    }

    #[test]
    fn garbage_is_not_a_wav() {
        assert!(AudioChunk::from_wav_bytes(b"not a wav file").is_err());
    }
}
