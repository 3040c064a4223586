//! Wire message types for the live generation endpoint.
//!
//! Every frame is one JSON object whose single top-level key names the
//! message kind.
//!
//! Client → server:
//! - `setup`: model, voice, modalities, system instruction, tools
//! - `clientContent`: a complete user text turn
//! - `realtimeInput`: base64 PCM media chunks
//!
//! Server → client:
//! - `setupComplete`: handshake acknowledged
//! - `serverContent`: model turn parts, grounding, turn/interrupt flags
//!
//! The setup body uses snake_case field names while the content messages use
//! camelCase; both are accepted by the service.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::audio::codec::{WireAudioFrame, PCM_MIME_TYPE};
use crate::citations::GroundingMetadata;
use crate::error::{ParleyError, Result};

// =============================================================================
// Outbound
// =============================================================================

/// Messages sent by the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ClientMessage {
    #[serde(rename = "setup")]
    Setup(Setup),
    #[serde(rename = "clientContent")]
    ClientContent(ClientContent),
    #[serde(rename = "realtimeInput")]
    RealtimeInput(RealtimeInput),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

/// Tool declarations; only grounding search is used.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tool {
    pub google_search: serde_json::Map<String, Value>,
}

impl Tool {
    pub fn google_search() -> Self {
        Self {
            google_search: serde_json::Map::new(),
        }
    }
}

/// Role-tagged list of parts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientContent {
    pub turns: Vec<Content>,
    pub turn_complete: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl ClientMessage {
    /// Build the handshake message.
    pub fn setup(
        model: &str,
        system_instruction: &str,
        voice: &str,
        response_modalities: &[String],
        enable_search: bool,
    ) -> Self {
        ClientMessage::Setup(Setup {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: response_modalities.to_vec(),
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                },
            },
            system_instruction: Content {
                role: None,
                parts: vec![TextPart {
                    text: system_instruction.to_string(),
                }],
            },
            tools: if enable_search {
                vec![Tool::google_search()]
            } else {
                Vec::new()
            },
        })
    }

    /// A complete single-shot user text turn.
    pub fn user_text(text: &str) -> Self {
        ClientMessage::ClientContent(ClientContent {
            turns: vec![Content {
                role: Some("user".to_string()),
                parts: vec![TextPart {
                    text: text.to_string(),
                }],
            }],
            turn_complete: true,
        })
    }

    /// One outbound audio frame as a realtime media chunk.
    pub fn audio(frame: &WireAudioFrame) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: PCM_MIME_TYPE.to_string(),
                data: frame.data.clone(),
            }],
        })
    }

    /// Serialize to the wire text format.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ParleyError::Other(e.into()))
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Setup(_) => "setup",
            ClientMessage::ClientContent(_) => "clientContent",
            ClientMessage::RealtimeInput(_) => "realtimeInput",
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Classified server payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    SetupComplete,
    ServerContent(ServerContent),
    /// A `setup` object echoed back; carries nothing actionable.
    Setup(Value),
    /// Valid JSON with no recognised top-level key.
    Ignorable,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    pub grounding_metadata: Option<GroundingMetadata>,
    pub turn_complete: bool,
    /// Set when the service cut its own reply short (user barge-in).
    pub interrupted: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelTurn {
    pub parts: Vec<Part>,
}

/// One reply fragment. A part may carry text, inline audio, or neither.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Part {
    pub text: Option<String>,
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}

impl InlineData {
    /// `audio/pcm`, optionally with parameters such as `;rate=24000`.
    pub fn is_pcm_audio(&self) -> bool {
        self.mime_type
            .split(';')
            .next()
            .map(|m| m.trim().eq_ignore_ascii_case(PCM_MIME_TYPE))
            .unwrap_or(false)
    }
}

impl ServerMessage {
    /// Classify one inbound payload by its distinguishing top-level key.
    ///
    /// # Errors
    /// `ParleyError::MessageParse` for invalid JSON, a non-object payload, or
    /// a `serverContent` body of the wrong shape.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ParleyError::MessageParse(e.to_string()))?;
        let Value::Object(mut map) = value else {
            return Err(ParleyError::MessageParse("payload is not an object".into()));
        };

        if map.contains_key("setupComplete") {
            return Ok(ServerMessage::SetupComplete);
        }
        if let Some(content) = map.remove("serverContent") {
            let content: ServerContent = serde_json::from_value(content)
                .map_err(|e| ParleyError::MessageParse(format!("serverContent: {e}")))?;
            return Ok(ServerMessage::ServerContent(content));
        }
        if let Some(setup) = map.remove("setup") {
            return Ok(ServerMessage::Setup(setup));
        }
        Ok(ServerMessage::Ignorable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn setup_serializes_with_expected_shape() {
        let modalities = vec!["AUDIO".to_string(), "TEXT".to_string()];
        let msg = ClientMessage::setup("models/test", "be brief", "Puck", &modalities, true);
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({
                "setup": {
                    "model": "models/test",
                    "generation_config": {
                        "response_modalities": ["AUDIO", "TEXT"],
                        "speech_config": {
                            "voice_config": {"prebuilt_voice_config": {"voice_name": "Puck"}}
                        }
                    },
                    "system_instruction": {"parts": [{"text": "be brief"}]},
                    "tools": [{"google_search": {}}]
                }
            })
        );
    }

    #[test]
    fn setup_without_search_omits_tools() {
        let msg = ClientMessage::setup("m", "", "Puck", &["AUDIO".to_string()], false);
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert!(value["setup"].get("tools").is_none());
    }

    #[test]
    fn user_text_is_a_complete_turn() {
        let value: Value =
            serde_json::from_str(&ClientMessage::user_text("hello").to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "clientContent": {
                    "turns": [{"role": "user", "parts": [{"text": "hello"}]}],
                    "turnComplete": true
                }
            })
        );
    }

    #[test]
    fn audio_frame_becomes_media_chunk() {
        let frame = WireAudioFrame {
            data: "AAAA".into(),
            sample_rate: 16_000,
        };
        let value: Value =
            serde_json::from_str(&ClientMessage::audio(&frame).to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"realtimeInput": {"mediaChunks": [{"mimeType": "audio/pcm", "data": "AAAA"}]}})
        );
    }

    #[test]
    fn classifies_setup_complete() {
        assert_eq!(
            ServerMessage::parse(r#"{"setupComplete":{}}"#).unwrap(),
            ServerMessage::SetupComplete
        );
    }

    #[test]
    fn classifies_server_content_with_mixed_parts() {
        let raw = r#"{"serverContent":{"modelTurn":{"parts":[
            {"text":"Hi"},
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AAAA"}}
        ]},"turnComplete":true}}"#;

        let ServerMessage::ServerContent(content) = ServerMessage::parse(raw).unwrap() else {
            panic!("expected server content");
        };
        let parts = &content.model_turn.as_ref().unwrap().parts;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].text.as_deref(), Some("Hi"));
        assert!(parts[1].inline_data.as_ref().unwrap().is_pcm_audio());
        assert!(content.turn_complete);
        assert!(!content.interrupted);
        assert!(content.grounding_metadata.is_none());
    }

    #[test]
    fn unknown_shapes_are_ignorable() {
        assert_eq!(
            ServerMessage::parse(r#"{"unexpected":true}"#).unwrap(),
            ServerMessage::Ignorable
        );
    }

    #[test]
    fn setup_echo_is_classified() {
        assert!(matches!(
            ServerMessage::parse(r#"{"setup":{"model":"m"}}"#).unwrap(),
            ServerMessage::Setup(_)
        ));
    }

    #[test]
    fn malformed_payloads_are_parse_errors() {
        for raw in ["not json", "[1,2]", r#"{"serverContent":{"turnComplete":"yes"}}"#] {
            assert!(
                matches!(ServerMessage::parse(raw), Err(ParleyError::MessageParse(_))),
                "raw={raw}"
            );
        }
    }

    #[test]
    fn non_pcm_inline_data_is_not_audio() {
        let data = InlineData {
            mime_type: "image/png".into(),
            data: String::new(),
        };
        assert!(!data.is_pcm_audio());
    }
}
