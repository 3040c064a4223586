//! Whole-buffer sample-rate conversion using a rubato `FastFixedIn` resampler.
//!
//! ## Design
//!
//! Outbound speech must reach the service as 16 kHz mono; captured audio is
//! usually 44.1 or 48 kHz, sometimes stereo. Inbound speech arrives at
//! 24 kHz while output devices commonly run at 48 kHz. Both directions
//! convert one complete buffer at a time (offline rendering), so a converter
//! is created per call and flushed to exactly `len * ratio` output frames.
//!
//! When source rate == target rate the input is returned unchanged and no
//! rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};

use crate::error::{ParleyError, Result};

/// Input frames handed to rubato per process call.
const CHUNK_FRAMES: usize = 1024;

/// Average interleaved frames down to one channel.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    let ch = channels.max(1) as usize;
    if ch == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Resample a complete mono buffer from `from_rate` to `to_rate`.
///
/// The output has `round(len * to_rate / from_rate)` samples with the
/// resampler's group delay removed.
///
/// # Errors
/// Returns `ParleyError::AudioEncode` for a zero rate or a rubato failure.
pub fn resample_offline(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    if from_rate == 0 || to_rate == 0 {
        return Err(ParleyError::AudioEncode(format!(
            "invalid sample rate conversion {from_rate} -> {to_rate}"
        )));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let mut resampler = FastFixedIn::<f32>::new(
        ratio,
        1.0, // fixed ratio
        PolynomialDegree::Cubic,
        CHUNK_FRAMES,
        1, // mono
    )
    .map_err(|e| ParleyError::AudioEncode(format!("resampler init: {e}")))?;

    let expected = (samples.len() as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay + CHUNK_FRAMES);

    let mut pos = 0;
    while samples.len() - pos >= resampler.input_frames_next() {
        let n = resampler.input_frames_next();
        let input: &[&[f32]] = &[&samples[pos..pos + n]];
        let block = resampler
            .process(input, None)
            .map_err(|e| ParleyError::AudioEncode(format!("resampler process: {e}")))?;
        out.extend_from_slice(&block[0]);
        pos += n;
    }

    if pos < samples.len() {
        let tail: &[&[f32]] = &[&samples[pos..]];
        let block = resampler
            .process_partial(Some(tail), None)
            .map_err(|e| ParleyError::AudioEncode(format!("resampler tail: {e}")))?;
        out.extend_from_slice(&block[0]);
    }

    // Flush the filter's group delay.
    while out.len() < expected + delay {
        let block = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| ParleyError::AudioEncode(format!("resampler flush: {e}")))?;
        if block[0].is_empty() {
            break;
        }
        out.extend_from_slice(&block[0]);
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);

    tracing::debug!(
        from_rate,
        to_rate,
        input = samples.len(),
        output = out.len(),
        "offline resample"
    );

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        let out = resample_offline(&samples, 16_000, 16_000).unwrap();
        assert_eq!(out, samples);
    }

    #[test]
    fn ratio_48k_to_16k_exact_length() {
        let samples = vec![0.0f32; 4800];
        let out = resample_offline(&samples, 48_000, 16_000).unwrap();
        assert_eq!(out.len(), 1600);
    }

    #[test]
    fn ratio_24k_to_48k_exact_length_with_partial_tail() {
        // Not a multiple of the internal chunk size.
        let samples = vec![0.1f32; 2500];
        let out = resample_offline(&samples, 24_000, 48_000).unwrap();
        assert_eq!(out.len(), 5000);
    }

    #[test]
    fn dc_level_survives_conversion() {
        let samples = vec![0.25f32; 9600];
        let out = resample_offline(&samples, 48_000, 16_000).unwrap();
        // Away from the edges the level should be preserved.
        let mid = &out[400..1200];
        for s in mid {
            assert!((s - 0.25).abs() < 0.01, "sample={s}");
        }
    }

    #[test]
    fn zero_rate_rejected() {
        assert!(resample_offline(&[0.0; 10], 0, 16_000).is_err());
    }

    #[test]
    fn stereo_downmix_averages_frames() {
        let stereo = [0.5, -0.5, 1.0, 0.0];
        assert_eq!(downmix_to_mono(&stereo, 2), vec![0.0, 0.5]);
        assert_eq!(downmix_to_mono(&stereo, 1), stereo.to_vec());
    }
}
