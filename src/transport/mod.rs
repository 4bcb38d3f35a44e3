//! Duplex message channel to the realtime voice service

pub mod websocket;

use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::{ClientMessage, InboundEvent};

pub use websocket::WebSocketTransport;

/// Something that happened on the connection
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Inbound(InboundEvent),
    /// The connection failed; no further events follow
    Error(String),
    /// The connection closed; no further events follow
    Closed { reason: Option<String> },
}

/// Both directions of an established connection
///
/// Dropping `outbound` asks the transport to close the connection; the
/// transport then reports `Closed` on `inbound`.
pub struct TransportLink {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens duplex connections
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Establish a connection to `endpoint`
    async fn connect(&self, endpoint: &str) -> Result<TransportLink>;

    /// Transport name for logging
    fn name(&self) -> &str;
}

/// Endpoint with its query string removed, safe to log
pub fn redact_endpoint(endpoint: &str) -> &str {
    endpoint.split('?').next().unwrap_or(endpoint)
}
