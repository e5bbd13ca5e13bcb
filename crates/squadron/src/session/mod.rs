//! Sessions: one conversation with a squad backend, owning a transcript.
//!
//! The orchestrator enforces the turn-at-a-time contract and translates
//! operator intents (prompt, command, shell, abort, stop) into backend
//! calls; the repository owns persistence; the transcript is an
//! append-only sequenced log.

mod models;
mod orchestrator;
pub(crate) mod repository;
mod transcript;

pub use models::{Session, SessionStatus, StartSessionRequest};
pub use orchestrator::{AbortOutcome, OrchestratorConfig, SessionOrchestrator};
pub use repository::SessionRepository;
pub use transcript::{TranscriptEntry, TranscriptRepository};
