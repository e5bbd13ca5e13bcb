//! Agents: role-configured personas that drive sessions. Each agent
//! belongs to exactly one squad; `(squad_id, slug)` is unique.

mod models;
mod repository;
mod roles;

pub use models::{Agent, AgentLevel, AgentStatus, CreateAgentRequest, UpdateAgentRequest};
pub use repository::AgentRepository;
pub use roles::{default_system_instruction, RolesConfig, KNOWN_ROLES};
