//! HTTP+SSE client for the per-squad opencode backend.

mod client;
mod stream;

pub use client::OpencodeClient;
pub use stream::{SessionEventStream, StreamConfig};
