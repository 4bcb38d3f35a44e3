// Shared fixtures for session tests: a scripted transport and polling helpers

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use voice_copilot::audio::{
    encode, AudioBackendConfig, AudioFrame, CaptureDevice, DeviceProvider, DeviceSelection,
    OutputSink, SegmentId, TransportPacket, VirtualDevices,
};
use voice_copilot::error::{Result, VoiceError};
use voice_copilot::protocol::{ClientMessage, InboundEvent};
use voice_copilot::session::{SessionConfig, SessionState};
use voice_copilot::transport::{Transport, TransportEvent, TransportLink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Accept the setup and confirm it
    Ready,
    /// Accept the connection but never confirm the setup
    Silent,
    /// Never finish connecting
    Hang,
    /// Refuse the connection outright
    Refuse,
}

#[derive(Default)]
struct MockState {
    sent: Vec<ClientMessage>,
    inbound: Option<mpsc::Sender<TransportEvent>>,
    connects: usize,
    outbound_closed: bool,
}

/// In-process stand-in for the realtime service
#[derive(Clone)]
pub struct MockTransport {
    behavior: Behavior,
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Deliver an event as if the service sent it
    pub async fn push(&self, event: TransportEvent) {
        let inbound = self.state.lock().inbound.clone();
        if let Some(inbound) = inbound {
            let _ = inbound.send(event).await;
        }
    }

    pub async fn push_audio(&self, samples: &[f32], sample_rate: u32) {
        self.push(TransportEvent::Inbound(InboundEvent::ModelAudio(encode(
            samples,
            sample_rate,
        ))))
        .await;
    }

    pub async fn push_packet(&self, packet: TransportPacket) {
        self.push(TransportEvent::Inbound(InboundEvent::ModelAudio(packet)))
            .await;
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.state.lock().sent.clone()
    }

    pub fn audio_frames_sent(&self) -> usize {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|m| m.is_audio_input())
            .count()
    }

    pub fn connects(&self) -> usize {
        self.state.lock().connects
    }

    /// Whether the session dropped its outbound half
    pub fn outbound_closed(&self) -> bool {
        self.state.lock().outbound_closed
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _endpoint: &str) -> Result<TransportLink> {
        self.state.lock().connects += 1;

        match self.behavior {
            Behavior::Refuse => {
                return Err(VoiceError::Connect("connection refused".to_string()))
            }
            Behavior::Hang => std::future::pending::<()>().await,
            Behavior::Ready | Behavior::Silent => {}
        }

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(4);
        let (inbound_tx, inbound_rx) = mpsc::channel(256);
        self.state.lock().inbound = Some(inbound_tx.clone());

        let state = Arc::clone(&self.state);
        let confirm = self.behavior == Behavior::Ready;
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let is_setup = matches!(message, ClientMessage::Setup(_));
                state.lock().sent.push(message);
                if is_setup && confirm {
                    let _ = inbound_tx
                        .send(TransportEvent::Inbound(InboundEvent::SetupComplete))
                        .await;
                }
            }

            state.lock().outbound_closed = true;
            let _ = inbound_tx
                .send(TransportEvent::Closed {
                    reason: Some("client closed".to_string()),
                })
                .await;
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn test_config() -> SessionConfig {
    SessionConfig {
        endpoint: "ws://mock/live".to_string(),
        connect_timeout: Duration::from_millis(300),
        close_grace: Duration::from_millis(200),
        ..Default::default()
    }
}

/// Poll `check` until it holds or two seconds pass
pub async fn eventually<F>(what: &str, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !check() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

type CheckHook = Box<dyn Fn() + Send + Sync>;

/// Virtual devices that report what the session looked like from the outside
/// at the moment its output was released
#[derive(Clone)]
pub struct ObservedDevices {
    pub inner: VirtualDevices,
    session_state: Arc<Mutex<Option<watch::Receiver<SessionState>>>>,
    states_at_release: Arc<Mutex<Vec<SessionState>>>,
    on_check: Arc<Mutex<Option<CheckHook>>>,
}

impl ObservedDevices {
    pub fn new() -> Self {
        Self {
            inner: VirtualDevices::new(),
            session_state: Arc::new(Mutex::new(None)),
            states_at_release: Arc::new(Mutex::new(Vec::new())),
            on_check: Arc::new(Mutex::new(None)),
        }
    }

    /// Session whose state is sampled when the output closes
    pub fn watch_session(&self, states: watch::Receiver<SessionState>) {
        *self.session_state.lock() = Some(states);
    }

    pub fn states_at_release(&self) -> Vec<SessionState> {
        self.states_at_release.lock().clone()
    }

    /// Run `hook` inside every availability check
    pub fn on_check<F: Fn() + Send + Sync + 'static>(&self, hook: F) {
        *self.on_check.lock() = Some(Box::new(hook));
    }
}

impl DeviceProvider for ObservedDevices {
    fn check_available(&self, selection: &DeviceSelection) -> Result<()> {
        if let Some(hook) = self.on_check.lock().as_ref() {
            hook();
        }
        self.inner.check_available(selection)
    }

    fn open_input(
        &self,
        device: Option<&str>,
        config: &AudioBackendConfig,
    ) -> Result<Box<dyn CaptureDevice>> {
        self.inner.open_input(device, config)
    }

    fn open_output(
        &self,
        device: Option<&str>,
        sample_rate: u32,
        completions: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Box<dyn OutputSink>> {
        let sink = self.inner.open_output(device, sample_rate, completions)?;
        Ok(Box::new(ObservedSink {
            inner: sink,
            devices: self.clone(),
        }))
    }
}

struct ObservedSink {
    inner: Box<dyn OutputSink>,
    devices: ObservedDevices,
}

impl OutputSink for ObservedSink {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn now(&self) -> Duration {
        self.inner.now()
    }

    fn schedule(&mut self, segment: AudioFrame, start_at: Duration) -> Result<SegmentId> {
        self.inner.schedule(segment, start_at)
    }

    fn stop_segment(&mut self, id: SegmentId) -> Result<()> {
        self.inner.stop_segment(id)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(states) = self.devices.session_state.lock().as_ref() {
            let state = states.borrow().clone();
            self.devices.states_at_release.lock().push(state);
        }
        self.inner.close()
    }
}
