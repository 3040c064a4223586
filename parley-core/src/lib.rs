//! # parley-core
//!
//! Real-time conversation client SDK: one WebSocket session to a live
//! generation service, text and microphone audio up, text, citations and
//! synthesized speech down.
//!
//! ## Architecture
//!
//! ```text
//! send_text / send_audio ─► ClientMessage (+ encode_outbound) ─► WebSocket
//!                                                                   │
//!                              session task (select!) ◄─────────────┘
//!                                      │
//!                         ServerMessage::parse → Dispatcher
//!                  ┌───────────────────┼───────────────────────┐
//!             text parts        audio parts               grounding
//!                  │          decode_inbound                   │
//!                  │                 │                 extract_citations
//!                  │          PlaybackQueue ─► AudioSink       │
//!                  └───────────────► broadcast::Sender<SessionEvent> ◄┘
//! ```
//!
//! The cpal callbacks never block. Encoding runs on the blocking pool; all
//! other session work happens on the session task.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod citations;
pub mod error;
pub mod events;
pub mod playback;
pub mod protocol;
pub mod session;

// Convenience re-exports for downstream crates
pub use audio::{AudioSink, MicCapture, PacedSink, SinkHandle};
pub use buffering::chunk::AudioChunk;
pub use citations::Citation;
pub use error::{ErrorKind, ParleyError};
pub use events::SessionEvent;
pub use session::{ConnectionState, LiveSession, SessionConfig};

#[cfg(feature = "audio-cpal")]
pub use audio::DeviceSink;
