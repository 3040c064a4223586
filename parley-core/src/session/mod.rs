//! `LiveSession`: top-level connection controller.
//!
//! ## Lifecycle
//!
//! ```text
//! LiveSession::new()                       state = Disconnected
//!     └─► connect()      socket open       state = Connecting
//!         │              setup sent        state = AwaitingSetupAck
//!         └─► {setupComplete} received     state = Ready   (SessionEvent::SetupComplete)
//!             └─► disconnect() / transport close / transport error
//!                                          state = Disconnected (SessionEvent::Disconnected)
//! ```
//!
//! `send_text`/`send_audio` are only accepted in `Ready`; earlier calls fail
//! fast with `ParleyError::NotConnected` and touch nothing on the wire.
//!
//! ## Threading
//!
//! One spawned task per connection owns the socket, the playback queue and
//! the turn accumulator. Everything that mutates them (inbound frames,
//! collaborator commands, playback completions) is serialised through that
//! task's `select!` loop. `LiveSession` itself only holds the command sender
//! and the shared `Control` cell, so every method takes `&self` and the
//! session can be shared behind an `Arc`.

mod connection;
pub mod dispatch;

use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::{
    audio::codec::{encode_outbound, INBOUND_SAMPLE_RATE, OUTBOUND_SAMPLE_RATE},
    audio::sink::SinkHandle,
    buffering::chunk::AudioChunk,
    error::{ParleyError, Result},
    events::SessionEvent,
    playback::PlaybackQueue,
    protocol::ClientMessage,
};

use dispatch::Dispatcher;

/// Live generation endpoint of the hosted service.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// How long `disconnect()` waits for the session task to wind down.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// No transport. Initial and terminal state.
    Disconnected,
    /// Transport is being opened.
    Connecting,
    /// Transport open and setup sent; waiting for `setupComplete`.
    AwaitingSetupAck,
    /// Handshake acknowledged; sends are accepted.
    Ready,
}

/// Configuration for `LiveSession`.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint (`ws://` or `wss://`).
    pub endpoint: String,
    /// Appended as the `key` query parameter when set.
    pub api_key: Option<String>,
    /// Model resource name sent in the setup message.
    pub model: String,
    /// System instruction text for the whole session.
    pub system_instruction: String,
    /// Prebuilt voice name for synthesized speech.
    pub voice: String,
    /// Modalities requested for replies. Default: `["AUDIO", "TEXT"]`.
    pub response_modalities: Vec<String>,
    /// Declare the grounding search tool. Default: `true`.
    pub enable_search: bool,
    /// Rate of outbound microphone audio (Hz). Default: 16000.
    pub input_sample_rate: u32,
    /// Rate of inbound synthesized speech (Hz). Default: 24000.
    pub output_sample_rate: u32,
    /// Upper bound on opening the transport. Default: 10 s.
    pub connect_timeout: Duration,
    /// Upper bound on one encoded or decoded PCM payload. Default: 8 MiB.
    pub max_audio_bytes: usize,
    /// Publish per-message drops (malformed payloads, bad audio fragments)
    /// as `SessionEvent::Error` instead of only logging them.
    pub diagnostics: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: None,
            model: "models/gemini-2.0-flash-exp".to_string(),
            system_instruction: "You are a helpful voice assistant. Keep answers short.".to_string(),
            voice: "Puck".to_string(),
            response_modalities: vec!["AUDIO".to_string(), "TEXT".to_string()],
            enable_search: true,
            input_sample_rate: OUTBOUND_SAMPLE_RATE,
            output_sample_rate: INBOUND_SAMPLE_RATE,
            connect_timeout: Duration::from_secs(10),
            max_audio_bytes: 8 * 1024 * 1024,
            diagnostics: false,
        }
    }
}

impl SessionConfig {
    /// Endpoint URL with the api key attached.
    ///
    /// # Errors
    /// `ParleyError::Connection` if the endpoint is not a valid ws/wss URL.
    pub fn request_url(&self) -> Result<String> {
        let mut url = url::Url::parse(&self.endpoint)
            .map_err(|e| ParleyError::Connection(format!("invalid endpoint: {e}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ParleyError::Connection(format!(
                "unsupported endpoint scheme '{}'",
                url.scheme()
            )));
        }
        if let Some(key) = self.api_key.as_deref().filter(|k| !k.is_empty()) {
            url.query_pairs_mut().append_pair("key", key);
        }
        Ok(url.to_string())
    }

    /// The handshake message for this configuration.
    pub fn setup_message(&self) -> ClientMessage {
        ClientMessage::setup(
            &self.model,
            &self.system_instruction,
            &self.voice,
            &self.response_modalities,
            self.enable_search,
        )
    }
}

/// Work handed from `LiveSession` to the connection task.
pub(crate) enum Command {
    Send {
        message: ClientMessage,
        ack: oneshot::Sender<Result<()>>,
    },
    StopPlayback,
    Close,
}

/// State shared between the handle and the connection task.
///
/// `epoch` increments on every `disconnect()`; a task or an in-flight
/// `connect()` only touches `state` while its epoch is still current.
pub(crate) struct Control {
    pub state: ConnectionState,
    pub epoch: u64,
    pub commands: Option<mpsc::UnboundedSender<Command>>,
    pub task: Option<JoinHandle<()>>,
}

/// The top-level session handle.
///
/// `LiveSession` is `Send + Sync`; all fields use interior mutability.
/// Wrap in `Arc<LiveSession>` to share between input forwarding and event
/// consuming tasks.
pub struct LiveSession {
    config: SessionConfig,
    sink: SinkHandle,
    control: Arc<Mutex<Control>>,
    /// Wakes an in-flight `connect()` when `disconnect()` is called.
    cancel: Notify,
    events: broadcast::Sender<SessionEvent>,
}

impl LiveSession {
    /// Create a session. Does not touch the network; call `connect()`.
    pub fn new(config: SessionConfig, sink: SinkHandle) -> Self {
        let (events, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            config,
            sink,
            control: Arc::new(Mutex::new(Control {
                state: ConnectionState::Disconnected,
                epoch: 0,
                commands: None,
                task: None,
            })),
            cancel: Notify::new(),
            events,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current connection state (snapshot).
    pub fn state(&self) -> ConnectionState {
        self.control.lock().state
    }

    /// Subscribe to session events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Open the transport and send the setup message.
    ///
    /// Resolves once the socket is open and setup has been written; readiness
    /// for `send_*` is signalled later by `SessionEvent::SetupComplete`.
    ///
    /// # Errors
    /// - `ParleyError::AlreadyConnected` unless currently `Disconnected`.
    /// - `ParleyError::Connection` if the socket cannot be opened within
    ///   `connect_timeout`, setup cannot be written, or `disconnect()` ran
    ///   meanwhile.
    pub async fn connect(&self) -> Result<()> {
        let epoch = {
            let mut control = self.control.lock();
            if control.state != ConnectionState::Disconnected {
                return Err(ParleyError::AlreadyConnected);
            }
            control.state = ConnectionState::Connecting;
            control.epoch
        };

        match self.open(epoch).await {
            Ok(()) => Ok(()),
            Err(e) => {
                let current = {
                    let mut control = self.control.lock();
                    let current = control.epoch == epoch;
                    if current {
                        control.state = ConnectionState::Disconnected;
                    }
                    current
                };
                // A cancelled connect is the caller's own doing.
                if current {
                    warn!("connect failed: {e}");
                    let _ = self.events.send(SessionEvent::error(&e));
                }
                Err(e)
            }
        }
    }

    async fn open(&self, epoch: u64) -> Result<()> {
        let url = self.config.request_url()?;
        info!(
            endpoint = self.config.endpoint.as_str(),
            model = self.config.model.as_str(),
            "opening session transport"
        );

        let timeout = self.config.connect_timeout;
        let cancelled = self.cancel.notified();
        let mut ws = tokio::select! {
            res = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url)) => match res {
                Ok(Ok((ws, _response))) => ws,
                Ok(Err(e)) => return Err(ParleyError::Connection(e.to_string())),
                Err(_) => {
                    return Err(ParleyError::Connection(format!(
                        "timed out after {} ms",
                        timeout.as_millis()
                    )))
                }
            },
            _ = cancelled => return Err(cancelled_error()),
        };

        let setup = self.config.setup_message().to_json()?;
        ws.send(Message::Text(setup)).await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let leftover = {
            let mut control = self.control.lock();
            if control.epoch == epoch {
                control.state = ConnectionState::AwaitingSetupAck;
                let ctx = connection::SessionContext {
                    commands: rx,
                    control: Arc::clone(&self.control),
                    epoch,
                    events: self.events.clone(),
                    queue: PlaybackQueue::new(self.sink.clone(), self.events.clone()),
                    dispatcher: Dispatcher::new(
                        self.events.clone(),
                        self.config.output_sample_rate,
                        self.config.max_audio_bytes,
                        self.config.diagnostics,
                    ),
                };
                control.task = Some(tokio::spawn(connection::run(ws, ctx)));
                control.commands = Some(tx);
                None
            } else {
                Some(ws)
            }
        };

        if let Some(mut ws) = leftover {
            let _ = ws.close(None).await;
            return Err(cancelled_error());
        }

        info!("setup sent, awaiting acknowledgement");
        Ok(())
    }

    /// Send one complete user text turn.
    ///
    /// # Errors
    /// - `ParleyError::NotConnected` unless `Ready`.
    /// - `ParleyError::Connection` if the socket write fails.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let commands = self.ready_sender()?;
        self.dispatch(commands, ClientMessage::user_text(text)).await
    }

    /// Encode and send one chunk of captured audio.
    ///
    /// Encoding (downmix, resample, quantise) runs on a blocking worker.
    ///
    /// # Errors
    /// - `ParleyError::NotConnected` unless `Ready`.
    /// - `ParleyError::AudioEncode` if the chunk cannot be converted; the
    ///   session stays open.
    /// - `ParleyError::Connection` if the socket write fails.
    pub async fn send_audio(&self, chunk: AudioChunk) -> Result<()> {
        let commands = self.ready_sender()?;

        let target_rate = self.config.input_sample_rate;
        let max_bytes = self.config.max_audio_bytes;
        let encoded =
            tokio::task::spawn_blocking(move || encode_outbound(&chunk, target_rate, max_bytes))
                .await
                .map_err(|e| ParleyError::AudioEncode(format!("encoder task failed: {e}")))
                .and_then(|r| r);

        let frame = match encoded {
            Ok(frame) => frame,
            Err(e) => {
                warn!("audio send rejected: {e}");
                let _ = self.events.send(SessionEvent::error(&e));
                return Err(e);
            }
        };

        self.dispatch(commands, ClientMessage::audio(&frame)).await
    }

    /// Interrupt and discard queued speech (barge-in).
    ///
    /// Idempotent. Always yields exactly one `SessionEvent::PlaybackComplete`.
    pub fn stop_audio_playback(&self) {
        let delivered = self
            .control
            .lock()
            .commands
            .as_ref()
            .map(|tx| tx.send(Command::StopPlayback).is_ok())
            .unwrap_or(false);

        if !delivered {
            let _ = self.events.send(SessionEvent::PlaybackComplete);
        }
    }

    /// Close the transport and release playback. Idempotent, never fails.
    pub async fn disconnect(&self) {
        let (commands, task) = {
            let mut control = self.control.lock();
            control.epoch += 1;
            control.state = ConnectionState::Disconnected;
            (control.commands.take(), control.task.take())
        };
        self.cancel.notify_waiters();

        if let Some(commands) = commands {
            let _ = commands.send(Command::Close);
        }

        if let Some(mut task) = task {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                warn!("session task did not stop in time; aborting");
                task.abort();
                // An aborted task never reaches its own teardown.
                if let Err(e) = task.await {
                    if e.is_cancelled() {
                        let mut sink = self.sink.0.lock();
                        sink.stop();
                        sink.release();
                        drop(sink);
                        let _ = self.events.send(SessionEvent::Disconnected { reason: None });
                    }
                }
            }
            info!("session disconnected");
        }
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn ready_sender(&self) -> Result<mpsc::UnboundedSender<Command>> {
        let result = {
            let control = self.control.lock();
            match (control.state, control.commands.as_ref()) {
                (ConnectionState::Ready, Some(tx)) => Ok(tx.clone()),
                _ => Err(ParleyError::NotConnected),
            }
        };
        if let Err(e) = &result {
            let _ = self.events.send(SessionEvent::error(e));
        }
        result
    }

    async fn dispatch(
        &self,
        commands: mpsc::UnboundedSender<Command>,
        message: ClientMessage,
    ) -> Result<()> {
        let (ack, done) = oneshot::channel();
        commands
            .send(Command::Send { message, ack })
            .map_err(|_| ParleyError::NotConnected)?;
        done.await.map_err(|_| ParleyError::NotConnected)?
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        let mut control = self.control.lock();
        control.epoch += 1;
        control.state = ConnectionState::Disconnected;
        if let Some(commands) = control.commands.take() {
            let _ = commands.send(Command::Close);
        }
    }
}

fn cancelled_error() -> ParleyError {
    ParleyError::Connection("connect cancelled".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::PacedSink;

    #[test]
    fn request_url_appends_key() {
        let config = SessionConfig {
            endpoint: "wss://example.test/ws".into(),
            api_key: Some("secret".into()),
            ..SessionConfig::default()
        };
        assert_eq!(
            config.request_url().unwrap(),
            "wss://example.test/ws?key=secret"
        );
    }

    #[test]
    fn request_url_rejects_http() {
        let config = SessionConfig {
            endpoint: "https://example.test".into(),
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.request_url(),
            Err(ParleyError::Connection(_))
        ));
    }

    #[test]
    fn default_setup_requests_audio_and_text() {
        let msg = SessionConfig::default().setup_message();
        let json: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            json["setup"]["generation_config"]["response_modalities"],
            serde_json::json!(["AUDIO", "TEXT"])
        );
        assert_eq!(json["setup"]["tools"][0]["google_search"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn sends_fail_fast_when_disconnected() {
        let session = LiveSession::new(SessionConfig::default(), SinkHandle::new(PacedSink::new()));
        assert!(matches!(
            session.send_text("hi").await,
            Err(ParleyError::NotConnected)
        ));
        let chunk = AudioChunk::mono(vec![0.0; 160], 16_000);
        assert!(matches!(
            session.send_audio(chunk).await,
            Err(ParleyError::NotConnected)
        ));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_twice_is_harmless() {
        let session = LiveSession::new(SessionConfig::default(), SinkHandle::new(PacedSink::new()));
        session.disconnect().await;
        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn stop_playback_without_connection_still_completes() {
        let session = LiveSession::new(SessionConfig::default(), SinkHandle::new(PacedSink::new()));
        let mut rx = session.subscribe();
        session.stop_audio_playback();
        assert_eq!(rx.try_recv().unwrap(), SessionEvent::PlaybackComplete);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn invalid_endpoint_fails_connect_and_resets_state() {
        let session = LiveSession::new(
            SessionConfig {
                endpoint: "not a url".into(),
                ..SessionConfig::default()
            },
            SinkHandle::new(PacedSink::new()),
        );
        let mut rx = session.subscribe();
        assert!(matches!(
            session.connect().await,
            Err(ParleyError::Connection(_))
        ));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(matches!(
            rx.try_recv().unwrap(),
            SessionEvent::Error { .. }
        ));
    }
}
