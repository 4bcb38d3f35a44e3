use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, VoiceError};

/// Why a session ended in `Failed`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&VoiceError> for SessionFailure {
    fn from(err: &VoiceError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Lifecycle of a voice session
///
/// ```text
/// Idle -> Connecting -> Open -> Closing -> Closed
///            |           |        |
///            +-----------+--------+---> Failed
/// ```
/// `Connecting` may also go straight to `Closing` when the caller gives up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Failed(SessionFailure),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed(_))
    }

    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Failed(_) => "failed",
        }
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        match self {
            SessionState::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }

        match (self, next) {
            (_, Failed(_)) => true,
            (Idle, Connecting) => true,
            (Connecting, Open) | (Connecting, Closing) => true,
            (Open, Closing) => true,
            (Closing, Closed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Failed(failure) => write!(f, "failed ({})", failure.kind),
            other => f.write_str(other.name()),
        }
    }
}
