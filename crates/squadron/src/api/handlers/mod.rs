//! Request handlers, grouped per resource.

mod agents;
mod board;
mod mcp;
mod misc;
mod nodes;
mod projects;
mod sessions;
mod squads;

pub use agents::*;
pub use board::*;
pub use mcp::*;
pub use misc::*;
pub use nodes::*;
pub use projects::*;
pub use sessions::*;
pub use squads::*;
