use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

use super::state::SessionState;

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Session identifier
    pub session_id: String,

    /// Current lifecycle state
    pub state: SessionState,

    /// When the session was opened
    pub started_at: DateTime<Utc>,

    /// Time since the session was opened, in seconds
    pub duration_secs: f64,

    /// Microphone frames encoded
    pub frames_captured: u64,

    /// Microphone frames handed to the transport
    pub frames_sent: u64,

    /// Microphone frames replaced by a newer one before they could be sent
    pub frames_superseded: u64,

    /// Model audio segments placed on the output timeline
    pub segments_scheduled: u64,

    /// Segments that played to the end
    pub segments_completed: u64,

    /// Inbound packets dropped because they failed to decode
    pub packets_malformed: u64,

    /// Barge-in flushes
    pub interruptions: u64,

    /// Times the resource teardown routine ran (0 or 1)
    pub teardown_runs: u64,
}

/// Live counters shared between the session task and its handle
#[derive(Debug, Default)]
pub struct SessionCounters {
    pub frames_captured: AtomicU64,
    pub frames_sent: AtomicU64,
    pub frames_superseded: AtomicU64,
    pub segments_scheduled: AtomicU64,
    pub segments_completed: AtomicU64,
    pub packets_malformed: AtomicU64,
    pub interruptions: AtomicU64,
    pub teardown_runs: AtomicU64,
}

impl SessionCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(
        &self,
        session_id: &str,
        state: SessionState,
        started_at: DateTime<Utc>,
    ) -> SessionStats {
        let duration = Utc::now().signed_duration_since(started_at);

        SessionStats {
            session_id: session_id.to_string(),
            state,
            started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_superseded: self.frames_superseded.load(Ordering::Relaxed),
            segments_scheduled: self.segments_scheduled.load(Ordering::Relaxed),
            segments_completed: self.segments_completed.load(Ordering::Relaxed),
            packets_malformed: self.packets_malformed.load(Ordering::Relaxed),
            interruptions: self.interruptions.load(Ordering::Relaxed),
            teardown_runs: self.teardown_runs.load(Ordering::Relaxed),
        }
    }
}
