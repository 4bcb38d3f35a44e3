// Ownership of the hardware a session holds while `Open`
//
// Three resources are acquired together on the way into `Open`:
//   - the output sink (inside the playback scheduler)
//   - the input device (inside the capture handle)
//   - the processing graph: the frame slot and completion channel that route
//     device callbacks into the session loop
// `teardown` releases all three exactly once, whatever triggered it.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::stats::SessionCounters;
use crate::audio::{
    CaptureHandle, CapturedPacket, DeviceProvider, FrameSlot, PlaybackScheduler, SegmentId,
};
use crate::error::{Result, VoiceError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    InputDevice,
    OutputSink,
    ProcessingGraph,
}

impl ResourceKind {
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::InputDevice => "input device",
            ResourceKind::OutputSink => "output sink",
            ResourceKind::ProcessingGraph => "processing graph",
        }
    }
}

/// Event produced by the processing graph
#[derive(Debug)]
pub enum GraphEvent {
    /// A new microphone frame is waiting in the slot
    FrameReady,
    /// The capture callback went away
    CaptureEnded,
    /// An output segment finished playing
    SegmentFinished(SegmentId),
    /// The output sink dropped its completion channel
    OutputEnded,
}

/// Routing between device callbacks and the session loop
pub struct ProcessingGraph {
    frames: FrameSlot,
    completions: mpsc::UnboundedReceiver<SegmentId>,
    capture_live: bool,
    output_live: bool,
}

impl ProcessingGraph {
    /// Wait for the next device event.
    ///
    /// While `frame_pending` is set the slot is not watched: the unsent frame
    /// stays in the slot and newer frames overwrite it.
    pub async fn next_event(&mut self, frame_pending: bool) -> GraphEvent {
        let watch_frames = self.capture_live && !frame_pending;

        tokio::select! {
            changed = self.frames.changed(), if watch_frames => match changed {
                Ok(()) => GraphEvent::FrameReady,
                Err(_) => {
                    self.capture_live = false;
                    GraphEvent::CaptureEnded
                }
            },
            finished = self.completions.recv(), if self.output_live => match finished {
                Some(id) => GraphEvent::SegmentFinished(id),
                None => {
                    self.output_live = false;
                    GraphEvent::OutputEnded
                }
            },
            else => std::future::pending().await,
        }
    }

    /// Take the newest frame, marking it seen
    pub fn take_frame(&mut self) -> Option<CapturedPacket> {
        self.frames.borrow_and_update().clone()
    }
}

/// Resources owned by one session
pub struct SessionResources {
    session_id: String,
    capture: Option<CaptureHandle>,
    playback: Option<PlaybackScheduler>,
    graph: Option<ProcessingGraph>,
    counters: Arc<SessionCounters>,
    torn_down: bool,
}

impl SessionResources {
    /// Nothing held yet
    pub fn empty(session_id: &str, counters: Arc<SessionCounters>) -> Self {
        Self {
            session_id: session_id.to_string(),
            capture: None,
            playback: None,
            graph: None,
            counters,
            torn_down: false,
        }
    }

    /// Acquire output, input and the graph between them.
    ///
    /// On failure everything acquired so far is released before returning.
    pub fn acquire(&mut self, devices: &dyn DeviceProvider, config: &SessionConfig) -> Result<()> {
        if self.torn_down {
            return Err(VoiceError::device(
                "session",
                "resources already released for this session",
            ));
        }

        info!("Acquiring audio devices for session {}", self.session_id);

        let (completions_tx, completions_rx) = mpsc::unbounded_channel();

        let sink = devices.open_output(
            config.devices.output.as_deref(),
            config.playback_sample_rate,
            completions_tx,
        )?;
        let playback = PlaybackScheduler::new(sink, config.playback_sample_rate);

        let capture_config = config.capture_config();
        let capture = match devices
            .open_input(config.devices.input.as_deref(), &capture_config)
            .and_then(|device| CaptureHandle::start(device, &capture_config))
        {
            Ok(capture) => capture,
            Err(e) => {
                // Scheduler drop closes the sink
                drop(playback);
                return Err(e);
            }
        };

        self.graph = Some(ProcessingGraph {
            frames: capture.frames(),
            completions: completions_rx,
            capture_live: true,
            output_live: true,
        });
        self.capture = Some(capture);
        self.playback = Some(playback);

        info!("Audio devices acquired for session {}", self.session_id);
        Ok(())
    }

    pub fn is_acquired(&self) -> bool {
        self.playback.is_some() && self.capture.is_some() && self.graph.is_some()
    }

    pub fn playback_mut(&mut self) -> Option<&mut PlaybackScheduler> {
        self.playback.as_mut()
    }

    pub fn playback(&self) -> Option<&PlaybackScheduler> {
        self.playback.as_ref()
    }

    pub fn graph_mut(&mut self) -> Option<&mut ProcessingGraph> {
        self.graph.as_mut()
    }

    pub fn frames_captured(&self) -> u64 {
        self.capture.as_ref().map(|c| c.frames_produced()).unwrap_or(0)
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Release every resource. Runs once; later calls return immediately.
    ///
    /// Each release is attempted even if an earlier one failed. Failures are
    /// logged and returned for inspection, never raised.
    pub fn teardown(&mut self) -> Vec<(ResourceKind, VoiceError)> {
        if self.torn_down {
            debug!("Resources for session {} already released", self.session_id);
            return Vec::new();
        }
        self.torn_down = true;
        SessionCounters::bump(&self.counters.teardown_runs);

        info!("Releasing resources for session {}", self.session_id);
        let mut failures = Vec::new();

        // Input first so no new frames enter a half-dismantled graph
        if let Some(mut capture) = self.capture.take() {
            self.counters
                .frames_captured
                .store(capture.frames_produced(), Ordering::Relaxed);
            if let Err(e) = capture.stop() {
                failures.push((ResourceKind::InputDevice, e));
            }
        }

        if let Some(mut playback) = self.playback.take() {
            if let Err(e) = playback.close() {
                failures.push((ResourceKind::OutputSink, e));
            }
        }

        // Dropping the graph detaches both callback channels
        self.graph.take();

        for (kind, err) in &failures {
            warn!(
                "Teardown of {} for session {} failed: {}",
                kind.label(),
                self.session_id,
                err
            );
        }

        info!("Resources released for session {}", self.session_id);
        failures
    }
}

impl Drop for SessionResources {
    fn drop(&mut self) {
        self.teardown();
    }
}
