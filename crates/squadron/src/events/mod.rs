//! Append-only event log: domain event records and their persistence.

mod models;
mod repository;

pub use models::{kind, normalize_kind, EventRecord};
pub use repository::EventRepository;
