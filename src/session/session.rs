use super::config::SessionConfig;
use super::resources::{GraphEvent, ProcessingGraph, SessionResources};
use super::state::{SessionFailure, SessionState};
use super::stats::{SessionCounters, SessionStats};
use crate::audio::DeviceProvider;
use crate::error::VoiceError;
use crate::protocol::{ClientMessage, InboundEvent};
use crate::transport::{redact_endpoint, Transport, TransportEvent, TransportLink};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
enum SessionCommand {
    Close,
}

/// State visible to both the handle and the session task
struct SessionShared {
    session_id: String,
    started_at: DateTime<Utc>,
    state_tx: watch::Sender<SessionState>,
    history: Mutex<Vec<SessionState>>,
    counters: Arc<SessionCounters>,
}

impl SessionShared {
    fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Apply a transition if the state machine allows it
    fn transition(&self, next: SessionState) -> bool {
        // History lock serializes transitions
        let mut history = self.history.lock();
        let current = self.state();

        if !current.can_transition_to(&next) {
            warn!(
                session_id = %self.session_id,
                from = %current,
                to = %next,
                "Ignoring illegal session transition"
            );
            return false;
        }

        info!(
            session_id = %self.session_id,
            from = %current,
            to = %next,
            "Session state changed"
        );

        history.push(next.clone());
        self.state_tx.send_replace(next);
        true
    }
}

/// Handle to one realtime voice session
///
/// Opening returns immediately in `Connecting`; progress is reported through
/// state changes. Dropping the handle closes the session.
pub struct VoiceSession {
    shared: Arc<SessionShared>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    close_requested: AtomicBool,
}

impl VoiceSession {
    /// Start a session on the current tokio runtime
    pub(crate) fn open(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        devices: Arc<dyn DeviceProvider>,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        let counters = Arc::new(SessionCounters::default());

        let shared = Arc::new(SessionShared {
            session_id: config.session_id.clone(),
            started_at: Utc::now(),
            state_tx,
            history: Mutex::new(vec![SessionState::Idle]),
            counters: Arc::clone(&counters),
        });

        info!("Opening voice session: {}", config.session_id);
        shared.transition(SessionState::Connecting);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let runner = SessionRunner {
            resources: SessionResources::empty(&config.session_id, counters),
            config,
            transport,
            devices,
            commands: commands_rx,
            shared: Arc::clone(&shared),
            next_sequence: 0,
        };

        tokio::spawn(runner.run());

        Self {
            shared,
            commands: commands_tx,
            close_requested: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.session_id
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Every state this session has been in, oldest first
    pub fn history(&self) -> Vec<SessionState> {
        self.shared.history.lock().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Terminal error, if the session failed
    pub fn failure(&self) -> Option<SessionFailure> {
        self.state().failure().cloned()
    }

    /// Ask the session to close. Returns immediately; safe to call repeatedly.
    pub fn close(&self) {
        if self.close_requested.swap(true, Ordering::AcqRel) {
            debug!("Close already requested for session {}", self.id());
            return;
        }
        if self.state().is_terminal() {
            return;
        }

        info!("Close requested for session {}", self.id());
        // Task already gone means the session is finishing on its own
        let _ = self.commands.send(SessionCommand::Close);
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_until<F>(&self, mut predicate: F) -> SessionState
    where
        F: FnMut(&SessionState) -> bool,
    {
        let mut rx = self.subscribe();
        let result = rx.wait_for(|state| predicate(state)).await.map(|s| s.clone());
        match result {
            Ok(state) => state,
            Err(_) => self.state(),
        }
    }

    /// Wait for `Closed` or `Failed`
    pub async fn wait_terminal(&self) -> SessionState {
        self.wait_until(SessionState::is_terminal).await
    }

    /// Get current session statistics
    pub fn stats(&self) -> SessionStats {
        self.shared.counters.snapshot(
            &self.shared.session_id,
            self.state(),
            self.shared.started_at,
        )
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.close();
    }
}

enum LoopExit {
    CloseRequested,
    RemoteClosed,
    Failed(VoiceError),
}

enum Connected {
    Ready(TransportLink),
    /// Close requested before the session opened
    Cancelled(Option<TransportLink>),
    Failed(VoiceError),
}

/// Event loop owning everything a session holds
struct SessionRunner {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    devices: Arc<dyn DeviceProvider>,
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    shared: Arc<SessionShared>,
    resources: SessionResources,
    /// Sequence number expected for the next outbound frame
    next_sequence: u64,
}

async fn next_graph_event(graph: Option<&mut ProcessingGraph>, frame_pending: bool) -> GraphEvent {
    match graph {
        Some(graph) => graph.next_event(frame_pending).await,
        None => std::future::pending().await,
    }
}

impl SessionRunner {
    async fn run(mut self) {
        let link = match self.connect().await {
            Connected::Ready(link) => link,
            Connected::Cancelled(link) => {
                self.close(link).await;
                return;
            }
            Connected::Failed(err) => {
                self.fail(err);
                return;
            }
        };

        if let Err(e) = self.resources.acquire(self.devices.as_ref(), &self.config) {
            self.fail(e);
            return;
        }

        if !self.shared.transition(SessionState::Open) {
            self.release();
            return;
        }

        info!("Voice session {} is live", self.config.session_id);
        self.run_open(link).await;
    }

    /// Connect, send setup, and wait for the remote side to accept it
    async fn connect(&mut self) -> Connected {
        let timeout = self.config.connect_timeout;
        let deadline = Instant::now() + timeout;
        let url = self.config.connect_url();

        info!(
            "Connecting session {} via {} to {}",
            self.config.session_id,
            self.transport.name(),
            redact_endpoint(&self.config.endpoint)
        );

        let mut link = tokio::select! {
            _ = self.commands.recv() => return Connected::Cancelled(None),
            result = tokio::time::timeout_at(deadline, self.transport.connect(&url)) => match result {
                Ok(Ok(link)) => link,
                Ok(Err(e)) => return Connected::Failed(e),
                Err(_) => return Connected::Failed(VoiceError::ConnectTimeout(timeout)),
            },
        };

        let setup = self.config.setup_message();
        info!(
            "Sending session setup (model={}, voice={:?})",
            setup.model,
            setup.voice_name()
        );

        tokio::select! {
            _ = self.commands.recv() => return Connected::Cancelled(Some(link)),
            sent = tokio::time::timeout_at(deadline, link.outbound.send(ClientMessage::Setup(setup))) => match sent {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {
                    return Connected::Failed(VoiceError::Connect(
                        "connection closed before setup was sent".to_string(),
                    ))
                }
                Err(_) => return Connected::Failed(VoiceError::ConnectTimeout(timeout)),
            },
        }

        loop {
            tokio::select! {
                _ = self.commands.recv() => return Connected::Cancelled(Some(link)),
                _ = tokio::time::sleep_until(deadline) => {
                    return Connected::Failed(VoiceError::ConnectTimeout(timeout))
                }
                event = link.inbound.recv() => match event {
                    Some(TransportEvent::Inbound(InboundEvent::SetupComplete)) => {
                        info!("Remote accepted setup for session {}", self.config.session_id);
                        return Connected::Ready(link);
                    }
                    Some(TransportEvent::Inbound(other)) => {
                        debug!("Ignoring {:?} received before setup completed", other);
                    }
                    Some(TransportEvent::Error(msg)) => {
                        return Connected::Failed(VoiceError::Connect(msg))
                    }
                    Some(TransportEvent::Closed { reason }) => {
                        return Connected::Failed(VoiceError::Connect(format!(
                            "connection closed before setup completed ({})",
                            reason.unwrap_or_else(|| "no reason".to_string())
                        )))
                    }
                    None => {
                        return Connected::Failed(VoiceError::Connect(
                            "connection dropped before setup completed".to_string(),
                        ))
                    }
                },
            }
        }
    }

    /// Steady state: forward microphone frames out, model audio in
    async fn run_open(&mut self, mut link: TransportLink) {
        let mut frame_pending = false;

        let exit = loop {
            let exit = tokio::select! {
                biased;

                _ = self.commands.recv() => Some(LoopExit::CloseRequested),

                event = link.inbound.recv() => match event {
                    Some(TransportEvent::Inbound(event)) => {
                        self.on_inbound(event).err().map(LoopExit::Failed)
                    }
                    Some(TransportEvent::Error(msg)) => {
                        Some(LoopExit::Failed(VoiceError::Transport(msg)))
                    }
                    Some(TransportEvent::Closed { reason }) => {
                        info!(
                            "Remote closed session {} ({})",
                            self.config.session_id,
                            reason.unwrap_or_else(|| "no reason".to_string())
                        );
                        Some(LoopExit::RemoteClosed)
                    }
                    None => {
                        info!("Transport for session {} went away", self.config.session_id);
                        Some(LoopExit::RemoteClosed)
                    }
                },

                permit = link.outbound.reserve(), if frame_pending => match permit {
                    Ok(permit) => {
                        frame_pending = false;
                        if let Some(message) = self.next_outbound_frame() {
                            permit.send(message);
                            SessionCounters::bump(&self.shared.counters.frames_sent);
                        }
                        None
                    }
                    Err(_) => Some(LoopExit::Failed(VoiceError::Transport(
                        "outbound channel closed".to_string(),
                    ))),
                },

                event = next_graph_event(self.resources.graph_mut(), frame_pending) => {
                    self.on_graph_event(event, &mut frame_pending)
                        .err()
                        .map(LoopExit::Failed)
                }
            };

            if let Some(exit) = exit {
                break exit;
            }
        };

        match exit {
            LoopExit::CloseRequested => self.close(Some(link)).await,
            LoopExit::RemoteClosed => self.close(None).await,
            LoopExit::Failed(err) => self.fail(err),
        }
    }

    fn on_inbound(&mut self, event: InboundEvent) -> Result<(), VoiceError> {
        match event {
            InboundEvent::ModelAudio(packet) => {
                if let Some(playback) = self.resources.playback_mut() {
                    playback.enqueue(&packet)?;
                }
            }
            InboundEvent::Interrupted => {
                if let Some(playback) = self.resources.playback_mut() {
                    playback.interrupt();
                }
            }
            InboundEvent::TurnComplete => {
                debug!("Model turn complete for session {}", self.config.session_id);
            }
            InboundEvent::SetupComplete => {
                debug!("Duplicate setup confirmation ignored");
            }
            InboundEvent::GoAway { time_left } => {
                warn!(
                    "Service will close session {} soon (time left: {:?})",
                    self.config.session_id, time_left
                );
            }
        }

        self.sync_playback_stats();
        Ok(())
    }

    fn on_graph_event(
        &mut self,
        event: GraphEvent,
        frame_pending: &mut bool,
    ) -> Result<(), VoiceError> {
        match event {
            GraphEvent::FrameReady => *frame_pending = true,
            GraphEvent::SegmentFinished(id) => {
                if let Some(playback) = self.resources.playback_mut() {
                    playback.on_segment_finished(id);
                }
                self.sync_playback_stats();
            }
            GraphEvent::CaptureEnded => {
                return Err(VoiceError::device("input", "capture stream ended"));
            }
            GraphEvent::OutputEnded => {
                return Err(VoiceError::device("output", "output stream ended"));
            }
        }
        Ok(())
    }

    /// Newest captured frame as a wire message; counts frames it replaced
    fn next_outbound_frame(&mut self) -> Option<ClientMessage> {
        let frame = self.resources.graph_mut()?.take_frame()?;
        let counters = &self.shared.counters;

        if frame.sequence > self.next_sequence {
            let skipped = frame.sequence - self.next_sequence;
            counters.frames_superseded.fetch_add(skipped, Ordering::Relaxed);
            debug!("{} capture frames superseded before send", skipped);
        }
        self.next_sequence = frame.sequence + 1;
        counters
            .frames_captured
            .store(self.resources.frames_captured(), Ordering::Relaxed);

        Some(ClientMessage::audio_input(frame.packet))
    }

    fn sync_playback_stats(&self) {
        let Some(playback) = self.resources.playback() else {
            return;
        };
        let stats = playback.stats();
        let counters = &self.shared.counters;
        counters
            .segments_scheduled
            .store(stats.segments_scheduled, Ordering::Relaxed);
        counters
            .segments_completed
            .store(stats.segments_completed, Ordering::Relaxed);
        counters
            .packets_malformed
            .store(stats.packets_malformed, Ordering::Relaxed);
        counters
            .interruptions
            .store(stats.interruptions, Ordering::Relaxed);
    }

    fn release(&mut self) {
        self.sync_playback_stats();
        // Failures are logged by the resource manager and go no further
        let _ = self.resources.teardown();
    }

    /// Orderly shutdown: Closing, release, wait for the remote side, Closed
    async fn close(&mut self, link: Option<TransportLink>) {
        self.shared.transition(SessionState::Closing);
        self.release();

        if let Some(TransportLink { outbound, mut inbound }) = link {
            drop(outbound);

            let grace = self.config.close_grace;
            let acknowledged = tokio::time::timeout(grace, async {
                while let Some(event) = inbound.recv().await {
                    if matches!(event, TransportEvent::Closed { .. } | TransportEvent::Error(_)) {
                        break;
                    }
                }
            })
            .await;

            if acknowledged.is_err() {
                warn!(
                    "Remote did not acknowledge close of session {} within {:?}",
                    self.config.session_id, grace
                );
            }
        }

        self.shared.transition(SessionState::Closed);
        info!("Voice session {} closed", self.config.session_id);
    }

    /// Publish `Failed` before releasing, so `Open` is never observed
    /// without its devices
    fn fail(&mut self, err: VoiceError) {
        error!("Voice session {} failed: {}", self.config.session_id, err);
        self.shared
            .transition(SessionState::Failed(SessionFailure::from(&err)));
        self.release();
    }
}
