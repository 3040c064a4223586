//! Session events → console output.

use std::io::Write;

use parley_core::SessionEvent;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

/// Where a rendered event goes.
#[derive(Debug, PartialEq, Eq)]
pub enum Line {
    /// Inline text, no newline (streamed reply fragments).
    Inline(String),
    Out(String),
    Err(String),
}

pub fn render(event: &SessionEvent) -> Option<Line> {
    match event {
        SessionEvent::SetupComplete => Some(Line::Out("[ready]".into())),
        SessionEvent::TextFragment { text } => Some(Line::Inline(text.clone())),
        SessionEvent::TurnComplete { .. } => Some(Line::Out(String::new())),
        SessionEvent::Citations { citations } => {
            let listed: Vec<String> = citations
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    format!(
                        "  [{}] {} <{}> chars {}..{}",
                        i + 1,
                        c.title,
                        c.source_uri,
                        c.start_index,
                        c.end_index
                    )
                })
                .collect();
            Some(Line::Out(format!("sources:\n{}", listed.join("\n"))))
        }
        SessionEvent::PlaybackStarted | SessionEvent::PlaybackComplete => None,
        SessionEvent::Error { kind, message } => {
            Some(Line::Err(format!("[error: {kind:?}] {message}")))
        }
        SessionEvent::Disconnected { reason: Some(reason) } => Some(Line::Err(format!(
            "[disconnected: {reason}] use /connect to start a new session"
        ))),
        SessionEvent::Disconnected { reason: None } => Some(Line::Out("[disconnected]".into())),
    }
}

/// Print events until the channel closes or a local disconnect is seen.
pub async fn print_events(mut rx: broadcast::Receiver<SessionEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                debug!(?event, "session event");
                match render(&event) {
                    Some(Line::Inline(text)) => {
                        print!("{text}");
                        let _ = std::io::stdout().flush();
                    }
                    Some(Line::Out(text)) => println!("{text}"),
                    Some(Line::Err(text)) => eprintln!("{text}"),
                    None => {}
                }
                if event == (SessionEvent::Disconnected { reason: None }) {
                    break;
                }
            }
            Err(RecvError::Lagged(n)) => warn!("event printer lagged by {n} events"),
            Err(RecvError::Closed) => break,
        }
    }
}
