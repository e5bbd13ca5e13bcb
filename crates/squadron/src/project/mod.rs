//! Projects: a filesystem path plus configuration. Projects own squads,
//! cards, events and MCP servers; deleting a project cascades.

mod browse;
mod models;
mod repository;

pub use browse::{browse_directory, DirectoryEntry};
pub use models::{CreateProjectRequest, Project};
pub use repository::ProjectRepository;
