use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::{AudioBackendConfig, DeviceSelection, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
use crate::protocol::SessionSetup;

/// Configuration for a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Unique session identifier (e.g., "voice-4f0c...")
    pub session_id: String,

    /// Realtime service WebSocket endpoint (without credentials)
    pub endpoint: String,

    /// API key appended to the endpoint as `?key=`; never serialized
    #[serde(skip_serializing, default)]
    pub api_key: Option<String>,

    /// Model identifier sent in the setup message
    pub model: String,

    /// Prebuilt synthetic voice
    pub voice: String,

    /// Behavioral instructions for the model
    pub system_prompt: String,

    /// Capture/output device identifiers (None = default device)
    pub devices: DeviceSelection,

    /// Capture sample rate (the service expects 16kHz)
    pub capture_sample_rate: u32,

    /// Capture frame length in milliseconds
    pub capture_buffer_ms: u64,

    /// Rate assumed for inbound audio without a rate tag (24kHz)
    pub playback_sample_rate: u32,

    /// How long `Connecting` may last before the session fails
    pub connect_timeout: Duration,

    /// How long `Closing` waits for the remote side to acknowledge
    pub close_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_id: format!("voice-{}", uuid::Uuid::new_v4()),
            endpoint: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".to_string(),
            api_key: None,
            model: "models/gemini-2.0-flash-exp".to_string(),
            voice: "Zephyr".to_string(),
            system_prompt: String::new(),
            devices: DeviceSelection::default(),
            capture_sample_rate: CAPTURE_SAMPLE_RATE,
            capture_buffer_ms: 256,
            playback_sample_rate: PLAYBACK_SAMPLE_RATE,
            connect_timeout: Duration::from_secs(10),
            close_grace: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    /// Endpoint including credentials, for the transport only
    pub fn connect_url(&self) -> String {
        match &self.api_key {
            Some(key) if !key.is_empty() => {
                let separator = if self.endpoint.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", self.endpoint, separator, key)
            }
            _ => self.endpoint.clone(),
        }
    }

    pub fn capture_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            target_sample_rate: self.capture_sample_rate,
            target_channels: 1,
            buffer_duration_ms: self.capture_buffer_ms,
        }
    }

    /// One-time setup message for this session
    pub fn setup_message(&self) -> SessionSetup {
        SessionSetup::new(&self.model, &self.voice, &self.system_prompt)
    }
}
