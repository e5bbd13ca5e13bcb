//! Squads: named groups of agents sharing one opencode backend process.
//!
//! The data model lives in `models`/`repository`; the supervised backend
//! child is owned by [`runtime::SquadRuntime`], one per squad, registered
//! with the [`supervisor::SquadSupervisor`].

mod mcp_config;
mod models;
mod repository;
mod runtime;
mod supervisor;

pub use mcp_config::write_mcp_config;
pub use models::{CreateSquadRequest, OpencodeStatus, Squad, SquadMessage};
pub use repository::SquadRepository;
pub use runtime::{RuntimeConfig, SquadRuntime};
pub use supervisor::SquadSupervisor;
