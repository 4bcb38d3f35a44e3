use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the voice session core
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio device unavailable [{device}]: {reason}")]
    DeviceUnavailable { device: String, reason: String },

    #[error("Failed to connect: {0}")]
    Connect(String),

    #[error("Connection not ready after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Failed to release {resource}: {reason}")]
    Teardown { resource: String, reason: String },

    #[error("Voice session {0} is still active")]
    SessionActive(String),
}

impl VoiceError {
    pub fn device(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::DeviceUnavailable {
            device: device.into(),
            reason: reason.into(),
        }
    }

    pub fn teardown(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Teardown {
            resource: resource.into(),
            reason: reason.into(),
        }
    }

    /// Coarse classification exposed to callers on `Failed`
    pub fn kind(&self) -> ErrorKind {
        match self {
            VoiceError::DeviceUnavailable { .. } => ErrorKind::DeviceUnavailable,
            VoiceError::Connect(_) | VoiceError::ConnectTimeout(_) => ErrorKind::Connect,
            VoiceError::Transport(_) => ErrorKind::Transport,
            VoiceError::MalformedPacket(_) => ErrorKind::MalformedPacket,
            VoiceError::Teardown { .. } => ErrorKind::Teardown,
            VoiceError::SessionActive(_) => ErrorKind::SessionActive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DeviceUnavailable,
    Connect,
    Transport,
    MalformedPacket,
    Teardown,
    SessionActive,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::DeviceUnavailable => "device_unavailable",
            ErrorKind::Connect => "connect",
            ErrorKind::Transport => "transport",
            ErrorKind::MalformedPacket => "malformed_packet",
            ErrorKind::Teardown => "teardown",
            ErrorKind::SessionActive => "session_active",
        };
        f.write_str(name)
    }
}

pub type Result<T> = std::result::Result<T, VoiceError>;
