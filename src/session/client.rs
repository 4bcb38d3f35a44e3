use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use super::config::SessionConfig;
use super::session::VoiceSession;
use super::state::SessionState;
use crate::audio::DeviceProvider;
use crate::error::{Result, VoiceError};
use crate::transport::Transport;

struct ActiveSession {
    session_id: String,
    state: watch::Receiver<SessionState>,
}

/// Entry point for opening voice sessions
///
/// Holds the transport and device provider, and allows at most one session
/// that has not reached a terminal state.
pub struct VoiceClient {
    transport: Arc<dyn Transport>,
    devices: Arc<dyn DeviceProvider>,
    active: Mutex<Option<ActiveSession>>,
}

impl VoiceClient {
    pub fn new(transport: Arc<dyn Transport>, devices: Arc<dyn DeviceProvider>) -> Self {
        Self {
            transport,
            devices,
            active: Mutex::new(None),
        }
    }

    /// Open a session. Returns as soon as connecting has started.
    ///
    /// Fails immediately, without touching the network, when another session
    /// is still live or a configured device does not exist.
    pub fn open_session(&self, config: SessionConfig) -> Result<VoiceSession> {
        Self::ensure_idle(&self.active.lock())?;

        // Device enumeration can be slow; keep it outside the lock
        self.devices.check_available(&config.devices)?;

        let mut active = self.active.lock();
        Self::ensure_idle(&active)?;

        let session = VoiceSession::open(
            config,
            Arc::clone(&self.transport),
            Arc::clone(&self.devices),
        );

        info!("Session {} registered as active", session.id());
        *active = Some(ActiveSession {
            session_id: session.id().to_string(),
            state: session.subscribe(),
        });

        Ok(session)
    }

    fn ensure_idle(active: &Option<ActiveSession>) -> Result<()> {
        if let Some(current) = active {
            let state = current.state.borrow().clone();
            if !state.is_terminal() {
                warn!(
                    "Refusing to open a session while {} is {}",
                    current.session_id, state
                );
                return Err(VoiceError::SessionActive(current.session_id.clone()));
            }
        }
        Ok(())
    }

    /// Request closure of `session`. Idempotent.
    pub fn close_session(&self, session: &VoiceSession) {
        session.close();
    }

    /// Id and state of the most recent session, if any
    pub fn active_session(&self) -> Option<(String, SessionState)> {
        self.active
            .lock()
            .as_ref()
            .map(|active| (active.session_id.clone(), active.state.borrow().clone()))
    }

    pub fn devices(&self) -> &Arc<dyn DeviceProvider> {
        &self.devices
    }
}
