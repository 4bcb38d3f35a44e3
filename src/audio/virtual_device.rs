// In-memory audio devices
//
// A microphone the caller speaks into and an output sink driven by a manual
// clock. Used for headless runs and tests; every handle is counted so a
// caller can verify nothing leaked after a session ends.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::backend::{
    AudioBackendConfig, AudioFrame, CaptureCallback, CaptureDevice, DeviceProvider,
    DeviceSelection, OutputSink, SegmentId, StreamFormat,
};
use crate::error::{Result, VoiceError};

const DEFAULT_INPUT: &str = "virtual-microphone";
const DEFAULT_OUTPUT: &str = "virtual-speaker";

/// Record of one segment handed to the virtual sink
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRecord {
    pub id: SegmentId,
    pub start_at: Duration,
    pub duration: Duration,
    pub sample_rate: u32,
    pub sample_count: usize,
}

impl ScheduledRecord {
    pub fn end(&self) -> Duration {
        self.start_at + self.duration
    }
}

struct VirtualState {
    clock: Duration,
    input_format: StreamFormat,
    input_available: bool,
    output_available: bool,
    open_inputs: usize,
    open_outputs: usize,
    mic_started: bool,
    scheduled: Vec<ScheduledRecord>,
    /// Segment id -> end time, for segments still playing
    playing: BTreeMap<SegmentId, Duration>,
    stopped: Vec<SegmentId>,
    completions: Option<mpsc::UnboundedSender<SegmentId>>,
    next_segment: SegmentId,
}

/// Shared handle to a set of virtual devices
#[derive(Clone)]
pub struct VirtualDevices {
    state: Arc<Mutex<VirtualState>>,
    mic_callback: Arc<Mutex<Option<CaptureCallback>>>,
}

impl VirtualDevices {
    pub fn new() -> Self {
        Self::with_input_format(StreamFormat {
            sample_rate: 16000,
            channels: 1,
        })
    }

    /// Virtual microphone reporting a different native format
    pub fn with_input_format(input_format: StreamFormat) -> Self {
        Self {
            state: Arc::new(Mutex::new(VirtualState {
                clock: Duration::ZERO,
                input_format,
                input_available: true,
                output_available: true,
                open_inputs: 0,
                open_outputs: 0,
                mic_started: false,
                scheduled: Vec::new(),
                playing: BTreeMap::new(),
                stopped: Vec::new(),
                completions: None,
                next_segment: 0,
            })),
            mic_callback: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_input_available(&self, available: bool) {
        self.state.lock().input_available = available;
    }

    pub fn set_output_available(&self, available: bool) {
        self.state.lock().output_available = available;
    }

    /// Deliver one interleaved buffer through the microphone callback.
    ///
    /// Returns false when no capture is running.
    pub fn speak(&self, samples: &[f32]) -> bool {
        if !self.state.lock().mic_started {
            return false;
        }

        let mut callback = self.mic_callback.lock();
        match callback.as_mut() {
            Some(callback) => {
                callback(samples);
                true
            }
            None => false,
        }
    }

    pub fn now(&self) -> Duration {
        self.state.lock().clock
    }

    /// Move the output clock forward, completing every segment that ends
    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.clock += by;
        let clock = state.clock;

        let finished: Vec<SegmentId> = state
            .playing
            .iter()
            .filter(|(_, end)| **end <= clock)
            .map(|(id, _)| *id)
            .collect();

        for id in finished {
            state.playing.remove(&id);
            if let Some(tx) = &state.completions {
                // Receiver gone means the session already tore down
                let _ = tx.send(id);
            }
        }
    }

    /// Every segment ever scheduled, in scheduling order
    pub fn scheduled(&self) -> Vec<ScheduledRecord> {
        self.state.lock().scheduled.clone()
    }

    /// Segments scheduled and neither finished nor stopped
    pub fn playing(&self) -> usize {
        self.state.lock().playing.len()
    }

    pub fn stopped(&self) -> Vec<SegmentId> {
        self.state.lock().stopped.clone()
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().mic_started
    }

    /// Input and output handles currently held by sessions
    pub fn open_handles(&self) -> usize {
        let state = self.state.lock();
        state.open_inputs + state.open_outputs
    }
}

impl Default for VirtualDevices {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceProvider for VirtualDevices {
    fn check_available(&self, selection: &DeviceSelection) -> Result<()> {
        let state = self.state.lock();
        if !state.input_available {
            return Err(VoiceError::device(
                selection.input.as_deref().unwrap_or(DEFAULT_INPUT),
                "no input device",
            ));
        }
        if !state.output_available {
            return Err(VoiceError::device(
                selection.output.as_deref().unwrap_or(DEFAULT_OUTPUT),
                "no output device",
            ));
        }
        Ok(())
    }

    fn open_input(
        &self,
        device: Option<&str>,
        _config: &AudioBackendConfig,
    ) -> Result<Box<dyn CaptureDevice>> {
        let name = device.unwrap_or(DEFAULT_INPUT).to_string();
        let mut state = self.state.lock();

        if !state.input_available {
            return Err(VoiceError::device(name, "permission denied"));
        }
        if state.open_inputs > 0 {
            return Err(VoiceError::device(name, "device busy"));
        }

        state.open_inputs += 1;
        let format = state.input_format;
        debug!("Opened virtual input {}", name);

        Ok(Box::new(VirtualMicrophone {
            name,
            format,
            devices: self.clone(),
            open: true,
        }))
    }

    fn open_output(
        &self,
        device: Option<&str>,
        _sample_rate: u32,
        completions: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Box<dyn OutputSink>> {
        let name = device.unwrap_or(DEFAULT_OUTPUT).to_string();
        let mut state = self.state.lock();

        if !state.output_available {
            return Err(VoiceError::device(name, "no output device"));
        }

        state.open_outputs += 1;
        state.completions = Some(completions);
        debug!("Opened virtual output {}", name);

        Ok(Box::new(VirtualSpeaker {
            name,
            devices: self.clone(),
            open: true,
        }))
    }
}

/// Microphone half of [`VirtualDevices`]
pub struct VirtualMicrophone {
    name: String,
    format: StreamFormat,
    devices: VirtualDevices,
    open: bool,
}

impl CaptureDevice for VirtualMicrophone {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn start(&mut self, callback: CaptureCallback) -> Result<()> {
        if !self.open {
            return Err(VoiceError::device(self.name.clone(), "device released"));
        }
        *self.devices.mic_callback.lock() = Some(callback);
        self.devices.state.lock().mic_started = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        self.devices.mic_callback.lock().take();
        let mut state = self.devices.state.lock();
        state.mic_started = false;
        state.open_inputs = state.open_inputs.saturating_sub(1);
        debug!("Released virtual input {}", self.name);
        Ok(())
    }
}

impl Drop for VirtualMicrophone {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Output half of [`VirtualDevices`]
pub struct VirtualSpeaker {
    name: String,
    devices: VirtualDevices,
    open: bool,
}

impl OutputSink for VirtualSpeaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn now(&self) -> Duration {
        self.devices.now()
    }

    fn schedule(&mut self, segment: AudioFrame, start_at: Duration) -> Result<SegmentId> {
        if !self.open {
            return Err(VoiceError::device(self.name.clone(), "device released"));
        }

        let mut state = self.devices.state.lock();
        let id = state.next_segment;
        state.next_segment += 1;

        let duration = segment.duration();
        state.scheduled.push(ScheduledRecord {
            id,
            start_at,
            duration,
            sample_rate: segment.sample_rate,
            sample_count: segment.samples.len(),
        });
        state.playing.insert(id, start_at + duration);

        Ok(id)
    }

    fn stop_segment(&mut self, id: SegmentId) -> Result<()> {
        let mut state = self.devices.state.lock();
        if state.playing.remove(&id).is_some() {
            state.stopped.push(id);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.open = false;

        let mut state = self.devices.state.lock();
        let playing: Vec<SegmentId> = state.playing.keys().copied().collect();
        for id in playing {
            state.playing.remove(&id);
            state.stopped.push(id);
        }
        state.completions = None;
        state.open_outputs = state.open_outputs.saturating_sub(1);
        debug!("Released virtual output {}", self.name);
        Ok(())
    }
}

impl Drop for VirtualSpeaker {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
