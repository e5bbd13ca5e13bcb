//! MCP tool servers: external tool providers the backend can call.
//! Resolved from the `docker mcp` catalog or from custom specs, persisted
//! per squad, and materialized into the squad's `mcp.toml` on reconcile.

mod catalog;
mod cli;
mod models;
mod repository;

pub use catalog::{CatalogEntry, CatalogQuery, McpCatalog};
pub use cli::{DockerMcpCli, McpCliStatus};
pub use models::{CreateMcpServerRequest, McpServer, McpSource, McpType, UpdateMcpServerRequest};
pub use repository::McpServerRepository;
