use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::DeviceSelection;
use crate::session::SessionConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub voice: VoiceConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoiceConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    #[serde(default)]
    pub system_prompt: String,
    /// Usually supplied through `VOICE_COPILOT__VOICE__API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_close_grace_ms")]
    pub close_grace_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    #[serde(default)]
    pub input_device: Option<String>,
    #[serde(default)]
    pub output_device: Option<String>,
    #[serde(default = "default_capture_sample_rate")]
    pub capture_sample_rate: u32,
    #[serde(default = "default_playback_sample_rate")]
    pub playback_sample_rate: u32,
    #[serde(default = "default_capture_buffer_ms")]
    pub capture_buffer_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            capture_sample_rate: default_capture_sample_rate(),
            playback_sample_rate: default_playback_sample_rate(),
            capture_buffer_ms: default_capture_buffer_ms(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_close_grace_ms() -> u64 {
    2_000
}

fn default_capture_sample_rate() -> u32 {
    16_000
}

fn default_playback_sample_rate() -> u32 {
    24_000
}

fn default_capture_buffer_ms() -> u64 {
    256
}

impl Config {
    /// Load `path` (extension optional) with `VOICE_COPILOT__*` overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("VOICE_COPILOT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to read config from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid voice-copilot configuration")
    }

    /// Session defaults derived from this configuration
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.voice.endpoint.clone(),
            api_key: self.voice.api_key.clone().filter(|key| !key.is_empty()),
            model: self.voice.model.clone(),
            voice: self.voice.voice.clone(),
            system_prompt: self.voice.system_prompt.clone(),
            devices: DeviceSelection {
                input: self.audio.input_device.clone(),
                output: self.audio.output_device.clone(),
            },
            capture_sample_rate: self.audio.capture_sample_rate,
            capture_buffer_ms: self.audio.capture_buffer_ms,
            playback_sample_rate: self.audio.playback_sample_rate,
            connect_timeout: Duration::from_millis(self.voice.connect_timeout_ms),
            close_grace: Duration::from_millis(self.voice.close_grace_ms),
            ..SessionConfig::default()
        }
    }
}
