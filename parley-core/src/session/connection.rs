//! The per-connection task.
//!
//! Owns the socket halves, the playback queue and the dispatcher. Three
//! sources feed one `select!` loop: commands from `LiveSession`, frames from
//! the socket, and completion of the buffer currently on the sink.

use std::sync::Arc;

use futures_util::{Sink, SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use super::dispatch::{Dispatcher, Inbound};
use super::{Command, ConnectionState, Control};
use crate::{
    error::{ParleyError, Result},
    events::SessionEvent,
    playback::PlaybackQueue,
    protocol::ClientMessage,
};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) struct SessionContext {
    pub commands: mpsc::UnboundedReceiver<Command>,
    pub control: Arc<Mutex<Control>>,
    /// Epoch this task was spawned under.
    pub epoch: u64,
    pub events: broadcast::Sender<SessionEvent>,
    pub queue: PlaybackQueue,
    pub dispatcher: Dispatcher,
}

impl SessionContext {
    fn on_payload(&mut self, raw: &str) {
        if self.dispatcher.handle(raw, &mut self.queue) == Inbound::SetupComplete {
            self.on_setup_complete();
        }
    }

    fn on_setup_complete(&mut self) {
        let promoted = {
            let mut control = self.control.lock();
            if control.epoch != self.epoch {
                return;
            }
            match control.state {
                ConnectionState::AwaitingSetupAck => {
                    control.state = ConnectionState::Ready;
                    true
                }
                _ => false,
            }
        };
        if promoted {
            info!("setup acknowledged, session ready");
            let _ = self.events.send(SessionEvent::SetupComplete);
        } else {
            debug!("ignoring duplicate setupComplete");
        }
    }

    fn fail(&self, err: &ParleyError) -> String {
        warn!("session transport failed: {err}");
        let _ = self.events.send(SessionEvent::error(err));
        err.to_string()
    }
}

pub(crate) async fn run(ws: WsStream, mut ctx: SessionContext) {
    let (mut sink, mut stream) = ws.split();

    // `None` when the close was requested locally.
    let reason: Option<String> = loop {
        tokio::select! {
            cmd = ctx.commands.recv() => match cmd {
                Some(Command::Send { message, ack }) => {
                    match send_message(&mut sink, &message).await {
                        Ok(()) => {
                            let _ = ack.send(Ok(()));
                        }
                        Err(e) => {
                            let reason = ctx.fail(&e);
                            let _ = ack.send(Err(e));
                            break Some(reason);
                        }
                    }
                }
                Some(Command::StopPlayback) => ctx.queue.clear(),
                Some(Command::Close) | None => {
                    if let Err(e) = sink.send(Message::Close(None)).await {
                        debug!("close frame not sent: {e}");
                    }
                    break None;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => ctx.on_payload(&text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => ctx.on_payload(&text),
                    Err(e) => warn!("dropping binary frame that is not UTF-8: {e}"),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sink.send(Message::Pong(data)).await {
                        debug!("pong not sent: {e}");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = match frame {
                        Some(f) => format!("closed by server ({}): {}", u16::from(f.code), f.reason),
                        None => "closed by server".to_string(),
                    };
                    info!("{reason}");
                    break Some(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(ctx.fail(&ParleyError::from(e))),
                None => {
                    info!("transport ended");
                    break Some("transport ended".to_string());
                }
            },
            _ = ctx.queue.finished() => ctx.queue.advance(),
        }
    };

    teardown(ctx, reason);
}

fn teardown(mut ctx: SessionContext, reason: Option<String>) {
    ctx.queue.shutdown();
    ctx.commands.close();

    {
        let mut control = ctx.control.lock();
        if control.epoch == ctx.epoch {
            control.state = ConnectionState::Disconnected;
            control.commands = None;
            control.task = None;
        }
    }

    // Commands that raced the shutdown.
    while let Ok(cmd) = ctx.commands.try_recv() {
        match cmd {
            Command::Send { ack, .. } => {
                let _ = ack.send(Err(ParleyError::NotConnected));
            }
            Command::StopPlayback => ctx.queue.clear(),
            Command::Close => {}
        }
    }

    info!(played = ctx.queue.played(), "session task stopped");
    let _ = ctx.events.send(SessionEvent::Disconnected { reason });
}

async fn send_message<S>(sink: &mut S, message: &ClientMessage) -> Result<()>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    let json = message.to_json()?;
    debug!(kind = message.kind(), bytes = json.len(), "sending");
    sink.send(Message::Text(json)).await?;
    Ok(())
}
