use crate::session::{SessionConfig, VoiceClient, VoiceSession};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<VoiceClient>,

    /// Most recently started session (kept after it ends for status queries)
    pub session: Arc<RwLock<Option<Arc<VoiceSession>>>>,

    /// Template for new sessions; each start gets a fresh id
    pub defaults: SessionConfig,
}

impl AppState {
    pub fn new(client: Arc<VoiceClient>, defaults: SessionConfig) -> Self {
        Self {
            client,
            session: Arc::new(RwLock::new(None)),
            defaults,
        }
    }
}
