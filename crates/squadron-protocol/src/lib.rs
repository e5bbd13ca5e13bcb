//! Wire protocol types for the opencode coding backend.
//!
//! A squad's backend is an `opencode serve` process exposing a small HTTP
//! API plus a Server-Sent Events stream. This crate holds the request and
//! response bodies for that API and the typed view of the SSE payloads.
//! Everything here is plain data; the HTTP client and the event ingester
//! live in the `squadron` crate.
//!
//! The backend's JSON uses camelCase keys and grows new fields and part
//! types without notice, so payload structs default aggressively and the
//! [`Part`] sum type preserves unrecognized parts verbatim.

mod events;
mod parts;
mod requests;

pub use events::{
    BackendEvent, MessageUpdatedPayload, PartUpdatedPayload, PromptAppendPayload,
    SessionStatusPayload,
};
pub use parts::{MessageInfo, Part, Role, ToolState, Usage};
pub use requests::{
    AbortResponse, CommandRequest, CreateSessionRequest, CreateSessionResponse, PromptRequest,
    ServerInfo, SessionMode, ShellRequest,
};
