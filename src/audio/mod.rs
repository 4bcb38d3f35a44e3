pub mod backend;
pub mod capture;
pub mod codec;
pub mod playback;
pub mod processing;
pub mod virtual_device;

#[cfg(feature = "cpal")]
pub mod cpal_backend;

pub use backend::{
    AudioBackendConfig, AudioDomain, AudioFrame, CaptureCallback, CaptureDevice, DeviceProvider,
    DeviceSelection, OutputSink, SegmentId, StreamFormat, CAPTURE_SAMPLE_RATE,
    PLAYBACK_SAMPLE_RATE,
};
pub use capture::{CaptureHandle, CapturedPacket, FrameSlot};
pub use codec::{decode, encode, TransportPacket};
pub use playback::{PlaybackScheduler, PlaybackStats, ScheduledSegment};
pub use processing::{LinearResampler, Reframer};
pub use virtual_device::{ScheduledRecord, VirtualDevices};

#[cfg(feature = "cpal")]
pub use cpal_backend::CpalDevices;
