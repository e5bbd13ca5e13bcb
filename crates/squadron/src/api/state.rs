//! Shared application state for API handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::agent::AgentRepository;
use crate::board::{BoardEngine, BoardEngineConfig, CardRepository, LaneAssignmentRepository};
use crate::bus::EventBus;
use crate::db::Database;
use crate::events::EventRepository;
use crate::mcp::McpServerRepository;
use crate::nodes::{ExternalNodeRepository, NodeRegistry, NodeRegistryConfig};
use crate::project::ProjectRepository;
use crate::session::{
    OrchestratorConfig, SessionOrchestrator, SessionRepository, TranscriptRepository,
};
use crate::settings::Settings;
use crate::squad::{SquadRepository, SquadSupervisor};

/// Everything the handlers reach for.
#[derive(Clone)]
pub struct AppState {
    pub projects: ProjectRepository,
    pub squads: SquadRepository,
    pub agents: AgentRepository,
    pub sessions: SessionRepository,
    pub transcripts: TranscriptRepository,
    pub events: EventRepository,
    pub mcp_servers: McpServerRepository,
    pub cards: CardRepository,
    pub lanes: LaneAssignmentRepository,
    pub bus: EventBus,
    pub supervisor: Arc<SquadSupervisor>,
    pub orchestrator: Arc<SessionOrchestrator>,
    pub engine: Arc<BoardEngine>,
    pub registry: Arc<NodeRegistry>,
}

impl AppState {
    /// Wire the full service graph over one database.
    pub fn build(db: &Database, settings: &Settings) -> Self {
        let pool = db.pool().clone();
        let bus = EventBus::new();

        let projects = ProjectRepository::new(pool.clone());
        let squads = SquadRepository::new(pool.clone());
        let agents = AgentRepository::new(pool.clone());
        let sessions = SessionRepository::new(pool.clone());
        let transcripts = TranscriptRepository::new(pool.clone());
        let events = EventRepository::new(pool.clone());
        let mcp_servers = McpServerRepository::new(pool.clone());
        let cards = CardRepository::new(pool.clone());
        let lanes = LaneAssignmentRepository::new(pool.clone());

        let supervisor = SquadSupervisor::new(
            settings.opencode.clone(),
            settings.storage.state_dir.clone(),
            squads.clone(),
            projects.clone(),
            mcp_servers.clone(),
            bus.clone(),
        );

        let orchestrator = SessionOrchestrator::new(
            OrchestratorConfig {
                turn_timeout: Duration::from_secs(settings.session.turn_timeout_secs),
            },
            sessions.clone(),
            transcripts.clone(),
            events.clone(),
            agents.clone(),
            squads.clone(),
            Arc::clone(&supervisor),
            bus.clone(),
        );

        let engine = BoardEngine::new(
            BoardEngineConfig::default(),
            cards.clone(),
            lanes.clone(),
            agents.clone(),
            squads.clone(),
            sessions.clone(),
            transcripts.clone(),
            projects.clone(),
            events.clone(),
            Arc::clone(&orchestrator),
            bus.clone(),
        );

        let registry = NodeRegistry::new(
            NodeRegistryConfig {
                scan_enabled: settings.nodes.scan_enabled,
                interval: Duration::from_secs(settings.nodes.scan_interval_secs),
            },
            ExternalNodeRepository::new(pool.clone()),
            events.clone(),
            bus.clone(),
        );

        Self {
            projects,
            squads,
            agents,
            sessions,
            transcripts,
            events,
            mcp_servers,
            cards,
            lanes,
            bus,
            supervisor,
            orchestrator,
            engine,
            registry,
        }
    }
}
