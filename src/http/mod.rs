//! HTTP API server for external control
//!
//! This module provides a REST API for controlling the voice session:
//! - POST /voice/session/start - Open a session (409 if one is live)
//! - POST /voice/session/stop - Close the session and return its stats
//! - GET /voice/session/status - Current session statistics
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use handlers::{ErrorResponse, StartSessionRequest, StartSessionResponse};
pub use routes::create_router;
pub use state::AppState;
