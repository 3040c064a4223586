//! Persistent application settings (JSON file in the app data directory).
//!
//! `PARLEY_API_KEY`, `PARLEY_ENDPOINT`, `PARLEY_MODEL` and `PARLEY_VOICE`
//! override the file when set.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parley_core::session::{SessionConfig, DEFAULT_ENDPOINT};
use serde::{Deserialize, Serialize};

const DEFAULT_MODEL: &str = "models/gemini-2.0-flash-exp";
const DEFAULT_VOICE: &str = "Puck";
const KNOWN_VOICES: &[&str] = &["Puck", "Charon", "Kore", "Fenrir", "Aoede"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    pub api_key: Option<String>,
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub enable_search: bool,
    /// Play speech on the output device; `false` paces it silently.
    pub speaker_output: bool,
    pub preferred_output_device: Option<String>,
    pub preferred_input_device: Option<String>,
    pub connect_timeout_secs: u64,
    pub diagnostics: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        let core = SessionConfig::default();
        Self {
            api_key: None,
            endpoint: DEFAULT_ENDPOINT.into(),
            model: DEFAULT_MODEL.into(),
            voice: DEFAULT_VOICE.into(),
            system_instruction: core.system_instruction,
            enable_search: true,
            speaker_output: true,
            preferred_output_device: None,
            preferred_input_device: None,
            connect_timeout_secs: 10,
            diagnostics: false,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.api_key = trimmed(self.api_key.take());
        self.endpoint = normalize_endpoint(&self.endpoint);
        self.model = normalize_model(&self.model);
        self.voice = normalize_voice(&self.voice);
        if self.system_instruction.trim().is_empty() {
            self.system_instruction = AppSettings::default().system_instruction;
        }
        self.preferred_output_device = trimmed(self.preferred_output_device.take());
        self.preferred_input_device = trimmed(self.preferred_input_device.take());
        self.connect_timeout_secs = self.connect_timeout_secs.clamp(1, 120);
    }

    /// Apply `PARLEY_*` overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("PARLEY_API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(endpoint) = lookup("PARLEY_ENDPOINT") {
            self.endpoint = endpoint;
        }
        if let Some(model) = lookup("PARLEY_MODEL") {
            self.model = model;
        }
        if let Some(voice) = lookup("PARLEY_VOICE") {
            self.voice = voice;
        }
        self.normalize();
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            system_instruction: self.system_instruction.clone(),
            voice: self.voice.clone(),
            enable_search: self.enable_search,
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            diagnostics: self.diagnostics,
            ..SessionConfig::default()
        }
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn normalize_endpoint(raw: &str) -> String {
    let endpoint = raw.trim();
    if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
        endpoint.into()
    } else {
        DEFAULT_ENDPOINT.into()
    }
}

/// Accept bare model ids (`gemini-2.0-flash-exp`) as well as resource names.
pub fn normalize_model(raw: &str) -> String {
    let model = raw.trim();
    if model.is_empty() {
        DEFAULT_MODEL.into()
    } else if model.starts_with("models/") {
        model.into()
    } else {
        format!("models/{model}")
    }
}

pub fn normalize_voice(raw: &str) -> String {
    let voice = raw.trim();
    KNOWN_VOICES
        .iter()
        .find(|v| v.eq_ignore_ascii_case(voice))
        .map(|v| v.to_string())
        .unwrap_or_else(|| DEFAULT_VOICE.into())
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("Lattice Labs")
            .join("Parley")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("parley")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
