//! External node registry: other opencode instances discovered on this
//! host or registered by URL, browsed in read-only proxy mode.

mod models;
mod registry;
mod repository;

pub use models::{ExternalNode, NodeSource};
pub use registry::{NodeRegistry, NodeRegistryConfig};
pub use repository::ExternalNodeRepository;
