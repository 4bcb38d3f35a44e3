use serde::{Deserialize, Serialize};

use crate::audio::TransportPacket;

/// Message sent to the realtime voice service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    /// One-time session configuration, first message on the socket
    Setup(SessionSetup),
    /// Captured microphone audio
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    pub fn audio_input(packet: TransportPacket) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![packet],
        })
    }

    pub fn is_audio_input(&self) -> bool {
        matches!(self, ClientMessage::RealtimeInput(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

impl SessionSetup {
    /// Audio-only responses in the given prebuilt voice
    pub fn new(model: &str, voice: &str, system_prompt: &str) -> Self {
        let system_instruction = if system_prompt.trim().is_empty() {
            None
        } else {
            Some(Content {
                parts: vec![Part::text(system_prompt)],
            })
        };

        Self {
            model: model.to_string(),
            generation_config: GenerationConfig {
                response_modalities: vec!["AUDIO".to_string()],
                speech_config: Some(SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: voice.to_string(),
                        },
                    },
                }),
            },
            system_instruction,
        }
    }

    pub fn voice_name(&self) -> Option<&str> {
        self.generation_config
            .speech_config
            .as_ref()
            .map(|s| s.voice_config.prebuilt_voice_config.voice_name.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<TransportPacket>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<TransportPacket>,
}

impl Part {
    pub fn text(text: &str) -> Self {
        Self {
            text: Some(text.to_string()),
            inline_data: None,
        }
    }
}

/// Message received from the realtime voice service
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default)]
    pub setup_complete: Option<serde_json::Value>,
    #[serde(default)]
    pub server_content: Option<ServerContent>,
    #[serde(default)]
    pub go_away: Option<GoAway>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default)]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// Protocol-independent inbound event
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    /// Remote side accepted the setup; the session may open
    SetupComplete,
    /// One synthesized audio frame
    ModelAudio(TransportPacket),
    /// User speech detected over model output; flush playback
    Interrupted,
    /// Model finished its turn
    TurnComplete,
    /// Server will close the connection soon
    GoAway { time_left: Option<String> },
}

impl ServerMessage {
    /// Flatten into events, in the order they must be applied
    pub fn into_events(self) -> Vec<InboundEvent> {
        let mut events = Vec::new();

        if self.setup_complete.is_some() {
            events.push(InboundEvent::SetupComplete);
        }

        if let Some(content) = self.server_content {
            // Interruption discards everything before it, so it goes first
            if content.interrupted {
                events.push(InboundEvent::Interrupted);
            }

            if let Some(turn) = content.model_turn {
                events.extend(
                    turn.parts
                        .into_iter()
                        .filter_map(|part| part.inline_data)
                        .map(InboundEvent::ModelAudio),
                );
            }

            if content.turn_complete {
                events.push(InboundEvent::TurnComplete);
            }
        }

        if let Some(go_away) = self.go_away {
            events.push(InboundEvent::GoAway {
                time_left: go_away.time_left,
            });
        }

        events
    }
}

/// Parse a raw text or binary frame into inbound events
pub fn parse_server_message(payload: &[u8]) -> serde_json::Result<Vec<InboundEvent>> {
    let message: ServerMessage = serde_json::from_slice(payload)?;
    Ok(message.into_events())
}
