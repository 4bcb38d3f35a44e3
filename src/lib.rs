pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod protocol;
pub mod session;
pub mod transport;

pub use audio::{
    AudioBackendConfig, AudioFrame, CaptureDevice, DeviceProvider, DeviceSelection, OutputSink,
    PlaybackScheduler, TransportPacket, VirtualDevices,
};
pub use config::Config;
pub use error::{ErrorKind, Result, VoiceError};
pub use http::{create_router, AppState};
pub use protocol::{ClientMessage, InboundEvent};
pub use session::{
    SessionConfig, SessionFailure, SessionState, SessionStats, VoiceClient, VoiceSession,
};
pub use transport::{Transport, TransportEvent, TransportLink, WebSocketTransport};
