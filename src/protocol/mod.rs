//! Realtime voice service wire format (JSON over WebSocket)

pub mod messages;

pub use messages::{
    parse_server_message, ClientMessage, InboundEvent, RealtimeInput, ServerMessage, SessionSetup,
};
