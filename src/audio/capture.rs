use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::backend::{AudioBackendConfig, CaptureDevice};
use super::codec::{self, TransportPacket};
use super::processing::Reframer;
use crate::error::Result;

/// One encoded microphone frame, numbered in capture order
#[derive(Debug, Clone)]
pub struct CapturedPacket {
    pub sequence: u64,
    /// Milliseconds since capture started
    pub timestamp_ms: u64,
    pub packet: TransportPacket,
}

/// Single-slot frame link between the capture callback and its consumer.
///
/// The slot only ever holds the newest frame: when the consumer is slower
/// than the hardware, an unread frame is replaced by the next one.
pub type FrameSlot = watch::Receiver<Option<CapturedPacket>>;

/// Running microphone capture
///
/// Owns the input device from `start` until `stop` (or drop).
pub struct CaptureHandle {
    device: Option<Box<dyn CaptureDevice>>,
    device_name: String,
    active: Arc<AtomicBool>,
    produced: Arc<AtomicU64>,
    frames: FrameSlot,
}

impl CaptureHandle {
    /// Start delivering encoded frames from `device`
    pub fn start(mut device: Box<dyn CaptureDevice>, config: &AudioBackendConfig) -> Result<Self> {
        let native = device.format();
        let device_name = device.name().to_string();
        let frame_len = config.frame_samples();
        let target_rate = config.target_sample_rate;

        info!(
            "Starting capture on {} ({}Hz, {} ch -> {}Hz mono, {} samples/frame)",
            device_name, native.sample_rate, native.channels, target_rate, frame_len
        );

        let (slot_tx, frames) = watch::channel(None);
        let active = Arc::new(AtomicBool::new(true));
        let produced = Arc::new(AtomicU64::new(0));

        let mut reframer = Reframer::new(native, target_rate, frame_len);
        let started = Instant::now();
        let callback_active = Arc::clone(&active);
        let callback_produced = Arc::clone(&produced);

        let callback = Box::new(move |interleaved: &[f32]| {
            // Buffers racing with teardown are discarded
            if !callback_active.load(Ordering::Acquire) {
                return;
            }

            for frame in reframer.push(interleaved) {
                let sequence = callback_produced.fetch_add(1, Ordering::AcqRel);
                let packet = CapturedPacket {
                    sequence,
                    timestamp_ms: started.elapsed().as_millis() as u64,
                    packet: codec::encode(&frame, target_rate),
                };
                slot_tx.send_replace(Some(packet));
            }
        });

        if let Err(e) = device.start(callback) {
            active.store(false, Ordering::Release);
            if let Err(stop_err) = device.stop() {
                debug!("Ignoring stop error after failed start: {}", stop_err);
            }
            return Err(e);
        }

        info!("Capture started on {}", device_name);

        Ok(Self {
            device: Some(device),
            device_name,
            active,
            produced,
            frames,
        })
    }

    /// Receiver for the newest encoded frame
    pub fn frames(&self) -> FrameSlot {
        self.frames.clone()
    }

    /// Frames encoded since start
    pub fn frames_produced(&self) -> u64 {
        self.produced.load(Ordering::Acquire)
    }

    pub fn is_capturing(&self) -> bool {
        self.device.is_some()
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Stop capture and release the device; later calls are no-ops
    pub fn stop(&mut self) -> Result<()> {
        self.active.store(false, Ordering::Release);

        let Some(mut device) = self.device.take() else {
            return Ok(());
        };

        info!("Stopping capture on {}", self.device_name);
        device.stop()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop capture on drop: {}", e);
        }
    }
}
