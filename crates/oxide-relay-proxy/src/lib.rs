#![deny(missing_docs)]
//! Oxide Relay HTTP proxy.
//!
//! Exposes the core router as a small HTTP service: a liveness probe, the
//! model listing and a chunked plain-text stream endpoint.

/// HTTP error responses.
pub mod error;
/// axum application and server loop.
pub mod server;
/// Stream request validation.
pub mod validation;

pub use error::ProxyError;
pub use server::{app, serve, AppState};
pub use validation::{validate_stream_request, StreamRequest};
