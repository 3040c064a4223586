//! Inbound message handling.
//!
//! Every payload received on the transport goes through `Dispatcher::handle`:
//!
//! ```text
//! raw text ──► ServerMessage::parse
//!                ├─ SetupComplete  → Inbound::SetupComplete (state change is the caller's)
//!                ├─ ServerContent  → interrupted? clear playback
//!                │                   text parts   → TextFragment + turn accumulator
//!                │                   audio parts  → decode_inbound → PlaybackQueue
//!                │                   grounding    → Citations (only if non-empty)
//!                │                   turnComplete → TurnComplete{accumulated text}
//!                ├─ Setup / Ignorable → dropped
//!                └─ parse error    → logged and dropped
//! ```
//!
//! A single bad message or audio fragment never ends the session.

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::{
    audio::codec::decode_inbound,
    citations::extract_citations,
    error::ParleyError,
    events::SessionEvent,
    playback::PlaybackQueue,
    protocol::{ServerContent, ServerMessage},
};

/// What the connection task must act on after a payload was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound {
    Handled,
    SetupComplete,
}

pub struct Dispatcher {
    events: broadcast::Sender<SessionEvent>,
    /// Text of the model turn in progress.
    turn_text: String,
    output_sample_rate: u32,
    max_audio_bytes: usize,
    diagnostics: bool,
}

impl Dispatcher {
    pub fn new(
        events: broadcast::Sender<SessionEvent>,
        output_sample_rate: u32,
        max_audio_bytes: usize,
        diagnostics: bool,
    ) -> Self {
        Self {
            events,
            turn_text: String::new(),
            output_sample_rate,
            max_audio_bytes,
            diagnostics,
        }
    }

    pub fn handle(&mut self, raw: &str, queue: &mut PlaybackQueue) -> Inbound {
        match ServerMessage::parse(raw) {
            Ok(ServerMessage::SetupComplete) => Inbound::SetupComplete,
            Ok(ServerMessage::ServerContent(content)) => {
                self.handle_content(content, queue);
                Inbound::Handled
            }
            Ok(ServerMessage::Setup(_)) => {
                debug!("ignoring echoed setup");
                Inbound::Handled
            }
            Ok(ServerMessage::Ignorable) => {
                debug!(bytes = raw.len(), "ignoring unrecognised message");
                Inbound::Handled
            }
            Err(e) => {
                self.dropped(e);
                Inbound::Handled
            }
        }
    }

    /// Text accumulated for the current turn so far.
    #[cfg(test)]
    fn turn_text(&self) -> &str {
        &self.turn_text
    }

    fn handle_content(&mut self, content: ServerContent, queue: &mut PlaybackQueue) {
        if content.interrupted {
            info!("reply interrupted by the service; clearing playback");
            queue.clear();
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                    self.turn_text.push_str(&text);
                    let _ = self.events.send(SessionEvent::TextFragment { text });
                }

                let Some(inline) = part.inline_data else {
                    continue;
                };
                if !inline.is_pcm_audio() {
                    debug!(mime = inline.mime_type.as_str(), "skipping non-audio inline data");
                    continue;
                }
                match decode_inbound(&inline.data, self.output_sample_rate, self.max_audio_bytes) {
                    Ok(buffer) => queue.enqueue(buffer),
                    Err(e) => self.dropped(e),
                }
            }
        }

        if let Some(metadata) = content.grounding_metadata {
            let citations = extract_citations(&metadata);
            if citations.is_empty() {
                debug!("grounding metadata without usable sources");
            } else {
                debug!(count = citations.len(), "citations received");
                let _ = self.events.send(SessionEvent::Citations { citations });
            }
        }

        if content.turn_complete {
            let text = std::mem::take(&mut self.turn_text);
            debug!(chars = text.len(), "turn complete");
            let _ = self.events.send(SessionEvent::TurnComplete { text });
        }
    }

    fn dropped(&self, err: ParleyError) {
        warn!("dropping inbound data: {err}");
        if self.diagnostics {
            let _ = self.events.send(SessionEvent::error(&err));
        }
    }
}
