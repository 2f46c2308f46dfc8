#![deny(missing_docs)]
//! Oxide Relay core library.
//!
//! Provider routing with fallback, streaming completions, segment reassembly
//! and rate-limited incremental presentation of model output.

/// Configuration management.
pub mod config;
/// Media group deduplication.
pub mod dedup;
/// LLM registry, router and streaming clients.
pub mod llm;
/// Logging setup with secret redaction.
pub mod logging;
/// Storage collaborator for chat history and user profiles.
pub mod storage;
/// Segment reassembly and incremental presentation.
pub mod stream;
/// Utility functions.
pub mod utils;

#[cfg(test)]
pub mod testing;
