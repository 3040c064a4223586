//! Audio I/O and conversion.
//!
//! - `codec`: wire PCM encode/decode
//! - `resample`: offline rate conversion and downmix
//! - `sink`: the output seam used by the playback queue
//! - `output`: cpal output device sink (`audio-cpal`)
//! - `capture`: cpal microphone capture into the ring buffer
//! - `device`: device listing and selection

pub mod capture;
pub mod codec;
pub mod device;
#[cfg(feature = "audio-cpal")]
pub mod output;
pub mod resample;
pub mod sink;

pub use capture::MicCapture;
#[cfg(feature = "audio-cpal")]
pub use output::DeviceSink;
pub use sink::{AudioSink, PacedSink, SinkHandle};
