//! Parley console host.
//!
//! Wires one `LiveSession` to stdin/stdout, the speaker and (on `/mic`) the
//! microphone. Type to talk; `/help` lists commands.

mod commands;
mod mic;
mod render;
mod settings;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use commands::{parse_line, ConsoleCommand, HELP};
use mic::MicStream;
use parley_core::audio::device::{list_devices, Direction};
use parley_core::{AudioChunk, LiveSession, PacedSink, SinkHandle};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// Audio files are streamed in slices of this length, paced in real time.
const WAV_SLICE: Duration = Duration::from_millis(500);

/// Headerless `.pcm`/`.raw` files are taken as 16 kHz mono int16 LE.
const RAW_PCM_RATE: u32 = 16_000;

/// Live voice and text conversation from the terminal
#[derive(Parser, Debug, Default, PartialEq)]
#[command(name = "parley", version, about)]
struct CliArgs {
    /// Pace speech silently instead of opening an output device
    #[arg(long)]
    headless: bool,

    /// Write the settings file (defaults filled in) and exit
    #[arg(long)]
    init_settings: bool,

    /// Path to the settings file
    #[arg(long = "settings", value_name = "PATH")]
    settings_path: Option<PathBuf>,
}

fn build_sink(settings: &AppSettings, headless: bool) -> SinkHandle {
    let want_device = settings.speaker_output && !headless;

    #[cfg(feature = "audio-cpal")]
    if want_device {
        info!(
            device = settings.preferred_output_device.as_deref().unwrap_or("default"),
            "speech goes to the output device"
        );
        return SinkHandle::new(parley_core::DeviceSink::new(
            settings.preferred_output_device.clone(),
        ));
    }

    #[cfg(not(feature = "audio-cpal"))]
    if want_device {
        warn!("built without audio-cpal; speech will be paced silently");
    }

    SinkHandle::new(PacedSink::new())
}

fn print_devices() {
    for (label, direction) in [("input", Direction::Input), ("output", Direction::Output)] {
        let devices = list_devices(direction);
        if devices.is_empty() {
            println!("{label}: none");
            continue;
        }
        println!("{label}:");
        for device in devices {
            let marker = if device.is_default { " (default)" } else { "" };
            println!("  {}{marker}", device.name);
        }
    }
}

fn decode_clip(path: &Path, bytes: &[u8]) -> anyhow::Result<AudioChunk> {
    let is_raw = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pcm") || ext.eq_ignore_ascii_case("raw"));
    let clip = if is_raw {
        AudioChunk::from_pcm16_le(bytes, RAW_PCM_RATE, 1)?
    } else {
        AudioChunk::from_wav_bytes(bytes)?
    };
    Ok(clip)
}

async fn stream_wav(session: &LiveSession, path: &Path) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let clip = decode_clip(path, &bytes)?;

    let frames = (clip.sample_rate as f64 * WAV_SLICE.as_secs_f64()) as usize;
    let step = (frames * usize::from(clip.channels)).max(1);
    for slice in clip.samples.chunks(step) {
        session
            .send_audio(AudioChunk::new(slice.to_vec(), clip.sample_rate, clip.channels))
            .await?;
        tokio::time::sleep(WAV_SLICE).await;
    }

    info!(
        path = %path.display(),
        secs = clip.duration_secs(),
        "wav streamed"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    // Logs go to stderr so they do not interleave with streamed replies.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("parley=info,parley_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();

    // ── Settings ──────────────────────────────────────────────────────────
    let settings_path = args
        .settings_path
        .clone()
        .unwrap_or_else(default_settings_path);
    let mut app_settings = load_settings(&settings_path);

    if args.init_settings {
        save_settings(&settings_path, &app_settings)
            .with_context(|| format!("writing {}", settings_path.display()))?;
        println!("settings written to {}", settings_path.display());
        return Ok(());
    }

    app_settings.apply_env_overrides(|key| std::env::var(key).ok());
    info!(
        settings_path = ?settings_path,
        model = %app_settings.model,
        voice = %app_settings.voice,
        search = app_settings.enable_search,
        "settings loaded"
    );
    if app_settings.api_key.is_none() {
        warn!("no api key configured; set PARLEY_API_KEY or apiKey in the settings file");
    }

    // ── Session ───────────────────────────────────────────────────────────
    let sink = build_sink(&app_settings, args.headless);
    let session = Arc::new(LiveSession::new(app_settings.session_config(), sink));
    let printer = tokio::spawn(render::print_events(session.subscribe()));

    session
        .connect()
        .await
        .context("could not open the session")?;
    println!("{HELP}");

    // ── Console loop ──────────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut mic: Option<MicStream> = None;

    while let Some(line) = lines.next_line().await? {
        let command = match parse_line(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(msg) => {
                eprintln!("{msg}");
                continue;
            }
        };

        match command {
            ConsoleCommand::Say(text) => {
                if let Err(e) = session.send_text(&text).await {
                    eprintln!("not sent: {e}");
                }
            }
            ConsoleCommand::Mic => match mic.take() {
                Some(stream) => {
                    stream.stop();
                    println!("[mic off]");
                }
                None => {
                    let preferred = app_settings.preferred_input_device.clone();
                    match MicStream::start(Arc::clone(&session), preferred).await {
                        Ok(stream) => {
                            println!("[mic on: {}]", stream.device_name());
                            mic = Some(stream);
                        }
                        Err(e) => eprintln!("microphone unavailable: {e:#}"),
                    }
                }
            },
            ConsoleCommand::Wav(path) => {
                if let Err(e) = stream_wav(&session, &path).await {
                    eprintln!("wav not streamed: {e:#}");
                }
            }
            ConsoleCommand::Stop => session.stop_audio_playback(),
            ConsoleCommand::Devices => print_devices(),
            ConsoleCommand::Status => println!("[{:?}]", session.state()),
            ConsoleCommand::Connect => {
                if let Err(e) = session.connect().await {
                    eprintln!("connect failed: {e}");
                }
            }
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::Quit => break,
        }
    }

    // ── Shutdown ──────────────────────────────────────────────────────────
    if let Some(stream) = mic.take() {
        stream.stop();
    }
    session.disconnect().await;
    // No final event arrives if the transport had already dropped.
    let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;
    info!("parley exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<CliArgs, clap::Error> {
        CliArgs::try_parse_from(std::iter::once("parley").chain(list.iter().copied()))
    }

    #[test]
    fn no_flags_means_defaults() {
        assert_eq!(args(&[]).unwrap(), CliArgs::default());
    }

    #[test]
    fn flags_combine() {
        let parsed = args(&["--headless", "--settings", "/tmp/p.json"]).unwrap();
        assert!(parsed.headless);
        assert!(!parsed.init_settings);
        assert_eq!(parsed.settings_path, Some(PathBuf::from("/tmp/p.json")));
    }

    #[test]
    fn settings_flag_needs_value() {
        assert!(args(&["--settings"]).is_err());
        assert!(args(&["--verbose"]).is_err());
    }

    #[test]
    fn raw_pcm_files_skip_the_wav_header() {
        let bytes: Vec<u8> = [0i16, 16_384, -16_384, 0]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let clip = decode_clip(Path::new("take.PCM"), &bytes).unwrap();
        assert_eq!(clip.sample_rate, RAW_PCM_RATE);
        assert_eq!(clip.channels, 1);
        assert_eq!(clip.samples, vec![0.0, 0.5, -0.5, 0.0]);

        assert!(decode_clip(Path::new("take.raw"), &bytes[..3]).is_err());
        assert!(decode_clip(Path::new("take.wav"), &bytes).is_err(), "no RIFF header");
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        CliArgs::command().debug_assert();
    }
}
