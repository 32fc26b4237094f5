// Wire messages for the Gemini Live BidiGenerateContent protocol
//
// Client -> server: one `setup` message, then `realtimeInput` media chunks.
// Server -> client: `setupComplete`, then `serverContent` carrying model audio.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::transport::{InboundAudio, LiveConfig, LiveEvent};

/// First message on a new channel
#[derive(Debug, Serialize, Deserialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    pub parts: Vec<TextPart>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TextPart {
    pub text: String,
}

impl SetupMessage {
    pub fn new(config: &LiveConfig) -> Self {
        let model = if config.model.starts_with("models/") {
            config.model.clone()
        } else {
            format!("models/{}", config.model)
        };

        let system_instruction = if config.system_instruction.is_empty() {
            None
        } else {
            Some(Content {
                parts: vec![TextPart {
                    text: config.system_instruction.clone(),
                }],
            })
        };

        Self {
            setup: Setup {
                model,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: Some(SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: config.voice.clone(),
                            },
                        },
                    }),
                },
                system_instruction,
            },
        }
    }
}

/// Outbound media message
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<MediaChunk>,
}

/// Base64 payload tagged with its MIME type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

impl RealtimeInputMessage {
    pub fn media(mime_type: impl Into<String>, data: String) -> Self {
        Self {
            realtime_input: RealtimeInput {
                media_chunks: vec![MediaChunk {
                    mime_type: mime_type.into(),
                    data,
                }],
            },
        }
    }
}

/// Any message from the server; unknown fields are ignored
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<serde_json::Value>,
    pub server_content: Option<ServerContent>,
    pub go_away: Option<serde_json::Value>,
    pub error: Option<ServerError>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub model_turn: Option<ModelTurn>,
    #[serde(default)]
    pub turn_complete: bool,
    #[serde(default)]
    pub interrupted: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ModelTurn {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    pub inline_data: Option<InlineData>,
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    #[serde(default)]
    pub mime_type: Option<String>,
    pub data: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerError {
    pub message: Option<String>,
}

impl ServerMessage {
    /// Flatten into channel events, in the order they should be handled
    pub fn into_events(self) -> Vec<LiveEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(LiveEvent::Open);
        }

        if let Some(content) = self.server_content {
            if content.interrupted {
                events.push(LiveEvent::Interrupted);
            }

            let parts = content.model_turn.map(|turn| turn.parts).unwrap_or_default();
            for part in parts {
                if let Some(inline) = part.inline_data {
                    let is_audio = inline
                        .mime_type
                        .as_deref()
                        .map_or(true, |mime| mime.starts_with("audio/"));
                    if is_audio && !inline.data.is_empty() {
                        events.push(LiveEvent::Audio(InboundAudio {
                            data: inline.data,
                            mime_type: inline.mime_type,
                        }));
                    }
                }
            }

            if content.turn_complete {
                events.push(LiveEvent::TurnComplete);
            }
        }

        if let Some(go_away) = &self.go_away {
            warn!("Server will close the session soon: {}", go_away);
        }

        if let Some(err) = self.error {
            events.push(LiveEvent::Error(
                err.message.unwrap_or_else(|| "unknown server error".to_string()),
            ));
        }

        events
    }
}

/// Parse one JSON frame from the server
pub fn parse_server_message(text: &str) -> Result<Vec<LiveEvent>, serde_json::Error> {
    let message: ServerMessage = serde_json::from_str(text)?;
    Ok(message.into_events())
}
