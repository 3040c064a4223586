//! Events published by a session.
//!
//! Consumers obtain a `tokio::sync::broadcast::Receiver<SessionEvent>` from
//! `LiveSession::subscribe()`. Every subscriber sees each event once.
//!
//! | Event | Fired when |
//! |-------|------------|
//! | `SetupComplete` | the service acknowledged the handshake; sends are now accepted |
//! | `TextFragment` | a model-turn part carried text |
//! | `Citations` | a server message carried usable grounding metadata |
//! | `TurnComplete` | the service closed the current model turn |
//! | `PlaybackStarted` | the playback queue went from idle to playing |
//! | `PlaybackComplete` | the queue drained, or was cleared |
//! | `Error` | a connect/send failed, or (with diagnostics) a message was dropped |
//! | `Disconnected` | the transport closed for any reason |

use serde::{Deserialize, Serialize};

use crate::citations::Citation;
use crate::error::{ErrorKind, ParleyError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    SetupComplete,
    TextFragment {
        text: String,
    },
    Citations {
        citations: Vec<Citation>,
    },
    TurnComplete {
        /// All text fragments of the finished turn, concatenated.
        text: String,
    },
    PlaybackStarted,
    PlaybackComplete,
    Error {
        kind: ErrorKind,
        message: String,
    },
    Disconnected {
        /// `None` for a locally requested disconnect.
        reason: Option<String>,
    },
}

impl SessionEvent {
    pub fn error(err: &ParleyError) -> Self {
        SessionEvent::Error {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}
