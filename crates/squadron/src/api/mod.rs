//! HTTP API surface: a thin request/response adapter over the supervisor,
//! orchestrator, board engine and node registry, plus SSE fan-out of the
//! event bus to UI subscribers.

mod error;
mod handlers;
mod routes;
mod sse;
mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
