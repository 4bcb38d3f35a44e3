// Native audio devices through cpal
//
// `cpal::Stream` is not `Send` on every platform, so each stream lives on a
// dedicated thread that builds it, plays it, and drops it when told to stop.
// The session only holds the thread handle.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::backend::{
    samples_to_duration, AudioBackendConfig, AudioFrame, CaptureCallback, CaptureDevice,
    DeviceProvider, DeviceSelection, OutputSink, SegmentId, StreamFormat,
};
use super::processing::LinearResampler;
use crate::error::{Result, VoiceError};

/// Device provider backed by the platform's default cpal host
#[derive(Debug, Default, Clone)]
pub struct CpalDevices;

impl CpalDevices {
    pub fn new() -> Self {
        Self
    }
}

fn find_input(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or_else(|| VoiceError::device("default input", "no input device available")),
        Some(name) => host
            .input_devices()
            .map_err(|e| VoiceError::device(name, e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| VoiceError::device(name, "input device not found")),
    }
}

fn find_output(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or_else(|| VoiceError::device("default output", "no output device available")),
        Some(name) => host
            .output_devices()
            .map_err(|e| VoiceError::device(name, e.to_string()))?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| VoiceError::device(name, "output device not found")),
    }
}

/// Pick an f32 output config at `preferred_rate` if the device supports it
fn select_output_config(
    device: &cpal::Device,
    label: &str,
    preferred_rate: u32,
) -> Result<cpal::SupportedStreamConfig> {
    let ranges = device
        .supported_output_configs()
        .map_err(|e| VoiceError::device(label, e.to_string()))?;

    for range in ranges {
        if range.sample_format() == cpal::SampleFormat::F32
            && range.min_sample_rate().0 <= preferred_rate
            && range.max_sample_rate().0 >= preferred_rate
        {
            return Ok(range.with_sample_rate(cpal::SampleRate(preferred_rate)));
        }
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| VoiceError::device(label, e.to_string()))?;
    if fallback.sample_format() != cpal::SampleFormat::F32 {
        return Err(VoiceError::device(
            label,
            format!("unsupported output sample format {:?}", fallback.sample_format()),
        ));
    }
    Ok(fallback)
}

/// Thread owning one running cpal stream
struct StreamWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl StreamWorker {
    fn spawn<F>(label: String, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let thread_label = label.clone();

        let thread = std::thread::Builder::new()
            .name(format!("audio-{}", label))
            .spawn(move || {
                let stream = match build() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(VoiceError::device(thread_label, e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Park until stop() or the worker is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| VoiceError::device(label.clone(), e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop_tx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(VoiceError::device(label, "audio thread exited during start"))
            }
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        let _ = self.stop_tx.send(());
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| VoiceError::teardown("audio stream thread", "thread panicked")),
            None => Ok(()),
        }
    }
}

impl DeviceProvider for CpalDevices {
    fn check_available(&self, selection: &DeviceSelection) -> Result<()> {
        find_input(selection.input.as_deref())?;
        find_output(selection.output.as_deref())?;
        Ok(())
    }

    fn open_input(
        &self,
        device: Option<&str>,
        _config: &AudioBackendConfig,
    ) -> Result<Box<dyn CaptureDevice>> {
        let input = find_input(device)?;
        let name = input.name().unwrap_or_else(|_| "unknown input".to_string());
        let supported = input
            .default_input_config()
            .map_err(|e| VoiceError::device(name.clone(), e.to_string()))?;

        info!(
            "Audio input device: {} ({}Hz, {} ch, {:?})",
            name,
            supported.sample_rate().0,
            supported.channels(),
            supported.sample_format()
        );

        Ok(Box::new(CpalCapture {
            requested: device.map(str::to_string),
            name,
            format: StreamFormat {
                sample_rate: supported.sample_rate().0,
                channels: supported.channels(),
            },
            sample_format: supported.sample_format(),
            config: supported.config(),
            worker: None,
        }))
    }

    fn open_output(
        &self,
        device: Option<&str>,
        sample_rate: u32,
        completions: mpsc::UnboundedSender<SegmentId>,
    ) -> Result<Box<dyn OutputSink>> {
        let output = find_output(device)?;
        let name = output.name().unwrap_or_else(|_| "unknown output".to_string());
        let supported = select_output_config(&output, &name, sample_rate)?;
        let config = supported.config();
        let device_rate = config.sample_rate.0;
        let channels = config.channels.max(1) as usize;

        info!(
            "Audio output device: {} ({}Hz, {} ch)",
            name, device_rate, channels
        );

        let timeline = Arc::new(Mutex::new(Timeline {
            position: 0,
            segments: BTreeMap::new(),
            completions,
        }));

        let render_timeline = Arc::clone(&timeline);
        let requested = device.map(str::to_string);
        let worker = StreamWorker::spawn(name.clone(), move || {
            let output = find_output(requested.as_deref())?;
            output
                .build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        render_timeline.lock().render(data, channels);
                    },
                    |err| error!("Audio output stream error: {}", err),
                    None,
                )
                .map_err(|e| VoiceError::device("output stream", e.to_string()))
        })?;

        Ok(Box::new(CpalSpeaker {
            name,
            device_rate,
            timeline,
            worker: Some(worker),
            next_segment: 0,
        }))
    }
}

/// Microphone stream
pub struct CpalCapture {
    requested: Option<String>,
    name: String,
    format: StreamFormat,
    sample_format: cpal::SampleFormat,
    config: cpal::StreamConfig,
    worker: Option<StreamWorker>,
}

impl CaptureDevice for CpalCapture {
    fn name(&self) -> &str {
        &self.name
    }

    fn format(&self) -> StreamFormat {
        self.format
    }

    fn start(&mut self, mut callback: CaptureCallback) -> Result<()> {
        if self.worker.is_some() {
            return Err(VoiceError::device(self.name.clone(), "already capturing"));
        }

        let requested = self.requested.clone();
        let config = self.config.clone();
        let sample_format = self.sample_format;

        let worker = StreamWorker::spawn(self.name.clone(), move || {
            let input = find_input(requested.as_deref())?;
            let err_fn = |err| error!("Audio input stream error: {}", err);

            let stream = match sample_format {
                cpal::SampleFormat::F32 => input.build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| callback(data),
                    err_fn,
                    None,
                ),
                cpal::SampleFormat::I16 => {
                    let mut scratch = Vec::new();
                    input.build_input_stream(
                        &config,
                        move |data: &[i16], _: &cpal::InputCallbackInfo| {
                            scratch.clear();
                            scratch.extend(data.iter().map(|&s| s as f32 / 32768.0));
                            callback(scratch.as_slice());
                        },
                        err_fn,
                        None,
                    )
                }
                other => {
                    return Err(VoiceError::device(
                        "input stream",
                        format!("unsupported sample format {:?}", other),
                    ))
                }
            };

            stream.map_err(|e| VoiceError::device("input stream", e.to_string()))
        })?;

        self.worker = Some(worker);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        match self.worker.take() {
            Some(mut worker) => {
                info!("Releasing audio input {}", self.name);
                worker.shutdown()
            }
            None => Ok(()),
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to release audio input on drop: {}", e);
        }
    }
}

struct TimelineSegment {
    start: u64,
    samples: Vec<f32>,
}

impl TimelineSegment {
    /// Resample `segment` to the device rate and fit it to the frames its
    /// scheduled span covers, so back-to-back segments meet exactly.
    fn place(segment: &AudioFrame, start_at: Duration, device_rate: u32) -> Self {
        let start = frames_at(start_at, device_rate);
        let end = frames_at(start_at + segment.duration(), device_rate);
        let span = end.saturating_sub(start) as usize;

        let mut samples = if segment.sample_rate == device_rate {
            segment.samples.clone()
        } else {
            LinearResampler::new(segment.sample_rate, device_rate).process(&segment.samples)
        };

        // Linear interpolation stops one frame short of the span
        let last = samples.last().copied().unwrap_or(0.0);
        samples.resize(span, last);

        Self { start, samples }
    }

    fn end(&self) -> u64 {
        self.start + self.samples.len() as u64
    }
}

/// Nearest device frame for a point on the output clock
fn frames_at(at: Duration, device_rate: u32) -> u64 {
    ((at.as_nanos() * device_rate as u128 + 500_000_000) / 1_000_000_000) as u64
}

/// Mixed output timeline shared with the render callback
struct Timeline {
    /// Frames rendered since the stream started
    position: u64,
    segments: BTreeMap<SegmentId, TimelineSegment>,
    completions: mpsc::UnboundedSender<SegmentId>,
}

impl Timeline {
    fn render(&mut self, data: &mut [f32], channels: usize) {
        let base = self.position;
        let mut frames = 0u64;

        for (offset, frame) in data.chunks_mut(channels).enumerate() {
            let pos = base + offset as u64;
            let mixed: f32 = self
                .segments
                .values()
                .filter(|seg| pos >= seg.start)
                .filter_map(|seg| seg.samples.get((pos - seg.start) as usize))
                .sum();
            let value = mixed.clamp(-1.0, 1.0);
            for sample in frame.iter_mut() {
                *sample = value;
            }
            frames += 1;
        }

        self.position += frames;
        let end = self.position;

        let finished: Vec<SegmentId> = self
            .segments
            .iter()
            .filter(|(_, seg)| seg.end() <= end)
            .map(|(id, _)| *id)
            .collect();

        for id in finished {
            self.segments.remove(&id);
            let _ = self.completions.send(id);
        }
    }
}

/// Speaker stream with a frame-accurate clock
pub struct CpalSpeaker {
    name: String,
    device_rate: u32,
    timeline: Arc<Mutex<Timeline>>,
    worker: Option<StreamWorker>,
    next_segment: SegmentId,
}

impl OutputSink for CpalSpeaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn now(&self) -> Duration {
        samples_to_duration(self.timeline.lock().position, self.device_rate)
    }

    fn schedule(&mut self, segment: AudioFrame, start_at: Duration) -> Result<SegmentId> {
        if self.worker.is_none() {
            return Err(VoiceError::device(self.name.clone(), "output released"));
        }

        let placed = TimelineSegment::place(&segment, start_at, self.device_rate);

        let id = self.next_segment;
        self.next_segment += 1;

        self.timeline.lock().segments.insert(id, placed);

        Ok(id)
    }

    fn stop_segment(&mut self, id: SegmentId) -> Result<()> {
        self.timeline.lock().segments.remove(&id);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };

        info!("Releasing audio output {}", self.name);
        self.timeline.lock().segments.clear();
        worker.shutdown()
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to release audio output on drop: {}", e);
        }
    }
}
