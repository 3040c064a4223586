use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors produced by parley-core.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("session is not ready")]
    NotConnected,

    #[error("session is already connected")]
    AlreadyConnected,

    #[error("malformed server message: {0}")]
    MessageParse(String),

    #[error("audio decode error: {0}")]
    AudioDecode(String),

    #[error("audio encode error: {0}")]
    AudioEncode(String),

    #[error("audio device error: {0}")]
    AudioDevice(String),

    #[error("audio stream error: {0}")]
    AudioStream(String),

    #[error("no default output device found")]
    NoDefaultOutputDevice,

    #[error("no default input device found")]
    NoDefaultInputDevice,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ParleyError {
    /// Coarse classification used when an error is published as an event.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ParleyError::Connection(_) => ErrorKind::Connection,
            ParleyError::NotConnected | ParleyError::AlreadyConnected => ErrorKind::NotConnected,
            ParleyError::MessageParse(_) => ErrorKind::MessageParse,
            ParleyError::AudioDecode(_) => ErrorKind::AudioDecode,
            ParleyError::AudioEncode(_) => ErrorKind::AudioEncode,
            ParleyError::AudioDevice(_)
            | ParleyError::AudioStream(_)
            | ParleyError::NoDefaultOutputDevice
            | ParleyError::NoDefaultInputDevice => ErrorKind::AudioDevice,
            ParleyError::Io(_) | ParleyError::Other(_) => ErrorKind::Internal,
        }
    }
}

/// Serializable error category carried by `SessionEvent::Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    Connection,
    NotConnected,
    MessageParse,
    AudioDecode,
    AudioEncode,
    AudioDevice,
    Internal,
}

impl From<tokio_tungstenite::tungstenite::Error> for ParleyError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ParleyError::Connection(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ParleyError>;
