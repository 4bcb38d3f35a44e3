use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::{redact_endpoint, Transport, TransportEvent, TransportLink};
use crate::error::{Result, VoiceError};
use crate::protocol::{parse_server_message, ClientMessage};

/// JSON-over-WebSocket transport
pub struct WebSocketTransport {
    /// Outbound queue depth; capture frames beyond it are superseded upstream
    outbound_capacity: usize,
    inbound_capacity: usize,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            outbound_capacity: 4,
            inbound_capacity: 256,
        }
    }

    pub fn with_capacity(outbound_capacity: usize, inbound_capacity: usize) -> Self {
        Self {
            outbound_capacity: outbound_capacity.max(1),
            inbound_capacity: inbound_capacity.max(1),
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, endpoint: &str) -> Result<TransportLink> {
        let endpoint_shown = redact_endpoint(endpoint).to_string();
        info!("Connecting to realtime voice service at {}", endpoint_shown);

        let (ws_stream, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| VoiceError::Connect(format!("{}: {}", endpoint_shown, e)))?;

        info!("Connected to {}", endpoint_shown);

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<ClientMessage>(self.outbound_capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(self.inbound_capacity);

        // Writer: serialize client messages; close the socket once the session drops its sender
        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let payload = match serde_json::to_string(&message) {
                    Ok(payload) => payload,
                    Err(e) => {
                        error!("Failed to serialize client message: {}", e);
                        continue;
                    }
                };

                if let Err(e) = ws_tx.send(Message::Text(payload)).await {
                    warn!("WebSocket send failed: {}", e);
                    return;
                }
            }

            debug!("Outbound channel closed, sending close frame");
            if let Err(e) = ws_tx.send(Message::Close(None)).await {
                debug!("Close frame not sent: {}", e);
            }
        });

        // Reader: decode server messages into ordered events
        tokio::spawn(async move {
            let mut close_reason = None;

            while let Some(frame) = ws_rx.next().await {
                let payload = match frame {
                    Ok(Message::Text(text)) => text.into_bytes(),
                    Ok(Message::Binary(data)) => data,
                    Ok(Message::Close(frame)) => {
                        close_reason = frame.map(|f| format!("{} {}", f.code, f.reason));
                        break;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = inbound_tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                };

                match parse_server_message(&payload) {
                    Ok(events) => {
                        for event in events {
                            if inbound_tx.send(TransportEvent::Inbound(event)).await.is_err() {
                                debug!("Session stopped listening, reader exiting");
                                return;
                            }
                        }
                    }
                    Err(e) => warn!("Dropping unparseable server message: {}", e),
                }
            }

            info!("Realtime voice connection closed ({:?})", close_reason);
            let _ = inbound_tx
                .send(TransportEvent::Closed {
                    reason: close_reason,
                })
                .await;
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn name(&self) -> &str {
        "websocket"
    }
}
