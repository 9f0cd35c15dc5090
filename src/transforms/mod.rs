//! Payload translation between the two chat-completion wire formats.
//!
//! This module provides:
//! - `reconcile`: repair of malformed tool-call/tool-result pairings
//! - `request`: request body translation plus endpoint rewriting
//! - `response`: buffered response body translation
//! - `streaming`: per-line SSE event translation

pub mod reconcile;
pub mod request;
pub mod response;
pub mod streaming;

// Re-export commonly used items
pub use request::{map_request, target_endpoint};
pub use response::map_response;
pub use streaming::map_streaming_chunk;
