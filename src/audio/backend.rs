use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;

/// Capture-domain sample rate expected by the remote voice model
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Playback-domain sample rate produced by the remote voice model
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Pipeline stage a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioDomain {
    /// Microphone audio on its way to the remote side (16kHz mono)
    Capture,
    /// Synthesized audio on its way to the speaker (24kHz mono)
    Playback,
}

/// Audio sample data (32-bit float, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples (f32 in [-1.0, 1.0], interleaved)
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since the stream started
    pub timestamp_ms: u64,
    /// Pipeline stage
    pub domain: AudioDomain,
}

impl AudioFrame {
    pub fn mono(samples: Vec<f32>, sample_rate: u32, domain: AudioDomain) -> Self {
        Self {
            samples,
            sample_rate,
            channels: 1,
            timestamp_ms: 0,
            domain,
        }
    }

    /// Number of sample frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Playback length of this frame
    pub fn duration(&self) -> Duration {
        samples_to_duration(self.frame_count() as u64, self.sample_rate)
    }
}

/// Exact duration of `frames` sample frames at `sample_rate`
pub fn samples_to_duration(frames: u64, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let nanos = frames as u128 * 1_000_000_000 / sample_rate as u128;
    Duration::from_nanos(nanos as u64)
}

/// Native format of a device stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Configuration for the capture side
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Target sample rate (will resample if needed)
    pub target_sample_rate: u32,
    /// Target channel count (1 = mono)
    pub target_channels: u16,
    /// Buffer size in milliseconds (one frame per buffer period)
    pub buffer_duration_ms: u64,
}

impl AudioBackendConfig {
    /// Number of target-rate samples in one frame
    pub fn frame_samples(&self) -> usize {
        let samples = self.target_sample_rate as u64 * self.buffer_duration_ms / 1000;
        samples.max(1) as usize * self.target_channels.max(1) as usize
    }
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            target_sample_rate: CAPTURE_SAMPLE_RATE,
            target_channels: 1,       // Mono
            buffer_duration_ms: 256,  // 4096 samples at 16kHz
        }
    }
}

/// Devices requested for a session (`None` = platform default)
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DeviceSelection {
    pub input: Option<String>,
    pub output: Option<String>,
}

/// Callback invoked once per hardware buffer with interleaved samples
pub type CaptureCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Identifier of a segment scheduled on an output sink
pub type SegmentId = u64;

/// Microphone handle
///
/// Implementations:
/// - `VirtualMicrophone`: in-memory, driven by the caller
/// - `CpalCapture`: native input stream (feature `cpal`)
pub trait CaptureDevice: Send {
    /// Device name for logging
    fn name(&self) -> &str;

    /// Native stream format delivered to the callback
    fn format(&self) -> StreamFormat;

    /// Begin delivering buffers to `callback`
    fn start(&mut self, callback: CaptureCallback) -> Result<()>;

    /// Stop delivery and release the device. Must be idempotent.
    fn stop(&mut self) -> Result<()>;
}

/// Output device with its own clock
///
/// Time values are offsets from when the sink was opened.
pub trait OutputSink: Send {
    /// Device name for logging
    fn name(&self) -> &str;

    /// Current position of the device clock
    fn now(&self) -> Duration;

    /// Schedule a mono segment to start at `start_at` on the device clock.
    ///
    /// The sink reports the returned id on its completion channel when the
    /// segment has finished playing (but not when it was stopped).
    fn schedule(&mut self, segment: AudioFrame, start_at: Duration) -> Result<SegmentId>;

    /// Stop a scheduled or playing segment immediately
    fn stop_segment(&mut self, id: SegmentId) -> Result<()>;

    /// Release the device. Must be idempotent.
    fn close(&mut self) -> Result<()>;
}

/// Opens audio devices for a session
///
/// Injected into the client so no device handle is process-wide state.
pub trait DeviceProvider: Send + Sync {
    /// Cheap availability check run before a session is opened
    fn check_available(&self, selection: &DeviceSelection) -> Result<()>;

    /// Acquire exclusive read access to an input device
    fn open_input(
        &self,
        device: Option<&str>,
        config: &AudioBackendConfig,
    ) -> Result<Box<dyn CaptureDevice>>;

    /// Acquire an output sink; finished segment ids are sent on `completions`
    fn open_output(
        &self,
        device: Option<&str>,
        sample_rate: u32,
        completions: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Box<dyn OutputSink>>;
}
