//! Console input parsing.
//!
//! Lines starting with `/` are commands; anything else is sent as a user
//! text turn.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Send one user text turn.
    Say(String),
    /// Toggle microphone streaming.
    Mic,
    /// Stream a WAV (or raw 16 kHz mono `.pcm`) file as if it were spoken.
    Wav(PathBuf),
    /// Barge-in: stop speech playback.
    Stop,
    /// List audio devices.
    Devices,
    /// Print connection state.
    Status,
    /// Open a fresh session after a disconnect.
    Connect,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  <text>        send a message
  /mic          start or stop streaming the microphone
  /wav <path>   stream a WAV file (.pcm/.raw: 16 kHz mono int16)
  /stop         stop speech playback
  /devices      list audio devices
  /status       show connection state
  /connect      start a new session after a disconnect
  /help         show this help
  /quit         disconnect and exit";

/// `Ok(None)` for blank lines.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(ConsoleCommand::Say(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "mic" => ConsoleCommand::Mic,
        "wav" if arg.is_empty() => return Err("usage: /wav <path>".into()),
        "wav" => ConsoleCommand::Wav(PathBuf::from(arg)),
        "stop" => ConsoleCommand::Stop,
        "devices" => ConsoleCommand::Devices,
        "status" => ConsoleCommand::Status,
        "connect" | "reconnect" => ConsoleCommand::Connect,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" | "q" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '/{other}' (try /help)")),
    };
    Ok(Some(command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_turn() {
        assert_eq!(
            parse_line("  what's the weather?  "),
            Ok(Some(ConsoleCommand::Say("what's the weather?".into())))
        );
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert_eq!(parse_line("   "), Ok(None));
    }

    #[test]
    fn commands_are_case_insensitive() {
        assert_eq!(parse_line("/STOP"), Ok(Some(ConsoleCommand::Stop)));
        assert_eq!(parse_line("/q"), Ok(Some(ConsoleCommand::Quit)));
    }

    #[test]
    fn wav_requires_a_path() {
        assert!(parse_line("/wav").is_err());
        assert_eq!(
            parse_line("/wav  clips/hello world.wav"),
            Ok(Some(ConsoleCommand::Wav(PathBuf::from("clips/hello world.wav"))))
        );
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(parse_line("/dance").unwrap_err().contains("/dance"));
    }
}
