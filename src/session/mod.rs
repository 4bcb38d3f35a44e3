//! Voice session management
//!
//! This module provides the `VoiceSession` abstraction that manages:
//! - The session state machine (Idle, Connecting, Open, Closing, Closed, Failed)
//! - Transport connection and setup handshake
//! - Device acquisition and exactly-once teardown
//! - Routing microphone frames out and model audio into the playback scheduler
//! - Session statistics

mod client;
mod config;
mod resources;
mod session;
mod state;
mod stats;

pub use client::VoiceClient;
pub use config::SessionConfig;
pub use resources::{GraphEvent, ProcessingGraph, ResourceKind, SessionResources};
pub use session::VoiceSession;
pub use state::{SessionFailure, SessionState};
pub use stats::{SessionCounters, SessionStats};
