//! Squad supervisor: registry of squad runtimes plus the restart policy.
//!
//! One supervisor owns every backend child this orchestrator provisioned.
//! Losing a child's liveness moves the squad to `error` and schedules a
//! restart with exponential backoff (1 s doubling to 60 s, reset after
//! five minutes of stable running).

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{error, info, warn};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};

use crate::bus::EventBus;
use crate::error::{Error, Result};
use crate::events::{kind, EventRecord};
use crate::mcp::{
    CatalogEntry, CreateMcpServerRequest, DockerMcpCli, McpCatalog, McpServer,
    McpServerRepository, McpSource, McpType,
};
use crate::opencode::OpencodeClient;
use crate::project::ProjectRepository;
use crate::settings::OpencodeSettings;

use super::mcp_config::write_mcp_config;
use super::models::{OpencodeStatus, Squad};
use super::repository::SquadRepository;
use super::runtime::{RuntimeConfig, SquadRuntime};

/// Restart backoff bounds.
const RESTART_BASE: Duration = Duration::from_secs(1);
const RESTART_CAP: Duration = Duration::from_secs(60);
/// Stable-running span after which the backoff resets.
const STABLE_RESET: Duration = Duration::from_secs(300);

#[derive(Debug, Default, Clone)]
struct RestartState {
    attempt: u32,
    running_since: Option<Instant>,
}

/// Supervisor over all squad runtimes.
pub struct SquadSupervisor {
    opencode: OpencodeSettings,
    state_root: PathBuf,
    squads: SquadRepository,
    projects: ProjectRepository,
    mcp_servers: McpServerRepository,
    catalog: Arc<McpCatalog>,
    cli: DockerMcpCli,
    bus: EventBus,
    runtimes: DashMap<String, Arc<SquadRuntime>>,
    /// Squads mid-provisioning; guards the ensure_running check-then-spawn.
    provisioning: Mutex<HashSet<String>>,
    restarts: Mutex<HashMap<String, RestartState>>,
    health_tx: mpsc::Sender<String>,
}

impl SquadSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        opencode: OpencodeSettings,
        state_root: PathBuf,
        squads: SquadRepository,
        projects: ProjectRepository,
        mcp_servers: McpServerRepository,
        bus: EventBus,
    ) -> Arc<Self> {
        let (health_tx, health_rx) = mpsc::channel(32);
        let cli = DockerMcpCli::new();
        let supervisor = Arc::new(Self {
            opencode,
            state_root,
            squads,
            projects,
            mcp_servers,
            catalog: Arc::new(McpCatalog::new(cli.clone())),
            cli,
            bus,
            runtimes: DashMap::new(),
            provisioning: Mutex::new(HashSet::new()),
            restarts: Mutex::new(HashMap::new()),
            health_tx,
        });

        let monitor = Arc::clone(&supervisor);
        tokio::spawn(async move {
            monitor.monitor_health(health_rx).await;
        });

        supervisor
    }

    pub fn catalog(&self) -> &McpCatalog {
        &self.catalog
    }

    pub fn cli(&self) -> &DockerMcpCli {
        &self.cli
    }

    /// Idempotent: return the base URL of a healthy backend, provisioning
    /// one if necessary.
    pub async fn ensure_running(&self, squad_id: &str) -> Result<String> {
        // Take the Arc out of the map guard before awaiting; holding the
        // shard lock across the ping would deadlock against teardown.
        let existing = self
            .runtimes
            .get(squad_id)
            .map(|entry| Arc::clone(entry.value()));
        if let Some(runtime) = existing {
            if runtime.client().ping().await {
                return Ok(runtime.base_url().to_string());
            }
            // Stale handle; fall through and reprovision.
            self.teardown_runtime(squad_id).await;
        }

        // Guard against two callers both passing the map check.
        {
            let mut provisioning = self.provisioning.lock().await;
            if provisioning.contains(squad_id) {
                return Err(Error::PreconditionFailed(format!(
                    "squad {} is already provisioning",
                    squad_id
                )));
            }
            provisioning.insert(squad_id.to_string());
        }

        let result = self.provision(squad_id).await;

        self.provisioning.lock().await.remove(squad_id);

        match &result {
            Ok(url) => info!("Squad {} backend at {}", squad_id, url),
            Err(e) => {
                let message = e.to_string();
                let _ = self
                    .squads
                    .update_opencode_state(
                        squad_id,
                        OpencodeStatus::Error,
                        None,
                        None,
                        Some(&message),
                    )
                    .await;
                self.publish_status(squad_id, OpencodeStatus::Error, Some(&message))
                    .await;
            }
        }
        result
    }

    async fn provision(&self, squad_id: &str) -> Result<String> {
        let squad = self.get_squad(squad_id).await?;
        let project = self
            .projects
            .get(&squad.project_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("project {}", squad.project_id)))?;

        self.squads
            .update_opencode_state(squad_id, OpencodeStatus::Provisioning, None, None, None)
            .await?;
        self.publish_status(squad_id, OpencodeStatus::Provisioning, None)
            .await;

        let port = self.allocate_port().await?;
        let state_dir = self.state_root.join("squads").join(squad_id);

        // Materialize the MCP config before the child starts so it boots
        // with the declared tool set.
        let enabled = self.mcp_servers.list_enabled_for_squad(squad_id).await?;
        write_mcp_config(&state_dir, &enabled)?;

        let config = RuntimeConfig {
            binary: self.opencode.binary.clone(),
            project_path: PathBuf::from(&project.path),
            state_dir,
            port,
            provisioning_timeout: Duration::from_secs(self.opencode.provisioning_timeout_secs),
            health_interval: Duration::from_secs(self.opencode.health_interval_secs),
            stop_grace: Duration::from_secs(self.opencode.stop_grace_secs),
        };

        let runtime = Arc::new(SquadRuntime::spawn(squad_id, config).await?);
        let base_url = runtime.base_url().to_string();
        let pid = runtime.pid();

        // Start the liveness loop feeding the shared monitor.
        {
            let runtime = Arc::clone(&runtime);
            let lost_tx = self.health_tx.clone();
            tokio::spawn(async move {
                runtime.health_loop(lost_tx).await;
            });
        }

        self.runtimes.insert(squad_id.to_string(), runtime);
        self.restarts
            .lock()
            .await
            .entry(squad_id.to_string())
            .or_default()
            .running_since = Some(Instant::now());

        self.squads
            .update_opencode_state(
                squad_id,
                OpencodeStatus::Running,
                Some(&base_url),
                Some(pid as i64),
                None,
            )
            .await?;
        self.publish_status(squad_id, OpencodeStatus::Running, None)
            .await;

        Ok(base_url)
    }

    /// Graceful stop; resets the squad to `idle` and clears restart state.
    pub async fn stop(&self, squad_id: &str) -> Result<()> {
        self.get_squad(squad_id).await?;
        self.teardown_runtime(squad_id).await;
        self.restarts.lock().await.remove(squad_id);

        self.squads
            .update_opencode_state(squad_id, OpencodeStatus::Idle, None, None, None)
            .await?;
        self.publish_status(squad_id, OpencodeStatus::Idle, None)
            .await;
        Ok(())
    }

    /// Current squad state including last error.
    pub async fn status(&self, squad_id: &str) -> Result<Squad> {
        self.get_squad(squad_id).await
    }

    /// Client for a running squad backend.
    pub fn client(&self, squad_id: &str) -> Result<OpencodeClient> {
        self.runtimes
            .get(squad_id)
            .map(|runtime| runtime.client().clone())
            .ok_or_else(|| {
                Error::PreconditionFailed(format!("squad {} backend is not running", squad_id))
            })
    }

    /// Stop every runtime (process shutdown).
    pub async fn shutdown_all(&self) {
        let squad_ids: Vec<String> = self.runtimes.iter().map(|e| e.key().clone()).collect();
        for squad_id in squad_ids {
            self.teardown_runtime(&squad_id).await;
            let _ = self
                .squads
                .update_opencode_state(&squad_id, OpencodeStatus::Idle, None, None, None)
                .await;
        }
    }

    // ========================================================================
    // MCP lifecycle
    // ========================================================================

    /// Register a custom or catalog-shaped server spec. No activation
    /// until an explicit enable.
    pub async fn add_mcp(
        &self,
        squad_id: &str,
        request: CreateMcpServerRequest,
    ) -> Result<McpServer> {
        self.get_squad(squad_id).await?;
        if request.name.trim().is_empty() {
            return Err(Error::validation("mcp server name must not be empty"));
        }
        if self
            .mcp_servers
            .get_by_name(squad_id, &request.name)
            .await?
            .is_some()
        {
            return Err(Error::Conflict(format!(
                "mcp server '{}' already exists for squad {}",
                request.name, squad_id
            )));
        }

        let server = self
            .mcp_servers
            .create(
                squad_id,
                &request.name,
                request.source,
                request.server_type,
                request.image.as_deref(),
                request.url.as_deref(),
                request.command.as_deref(),
                &json!(request.args),
                &request.headers,
                &request.catalog_meta,
            )
            .await?;

        self.publish_mcp(squad_id, &server.name, "added").await;
        Ok(server)
    }

    /// Register a server resolved from the catalog snapshot.
    pub async fn add_mcp_from_catalog(
        &self,
        squad_id: &str,
        name: &str,
    ) -> Result<McpServer> {
        let entry: CatalogEntry = self
            .catalog
            .resolve(name)
            .await
            .map_err(|e| Error::CliUnavailable(format!("docker mcp catalog unavailable: {}", e)))?
            .ok_or_else(|| Error::not_found(format!("catalog entry '{}'", name)))?;

        self.add_mcp(
            squad_id,
            CreateMcpServerRequest {
                name: entry.name.clone(),
                source: McpSource::Registry,
                server_type: McpType::Container,
                image: entry.image.clone(),
                url: None,
                command: None,
                args: Vec::new(),
                headers: json!({}),
                catalog_meta: serde_json::to_value(&entry).unwrap_or_else(|_| json!({})),
            },
        )
        .await
    }

    /// Enable a server and reconcile the child's config. Catalog-sourced
    /// servers require the `docker mcp` CLI; a missing CLI fails loudly
    /// and leaves the row untouched.
    pub async fn enable_mcp(&self, squad_id: &str, name: &str) -> Result<McpServer> {
        let server = self
            .mcp_servers
            .get_by_name(squad_id, name)
            .await?
            .ok_or_else(|| Error::not_found(format!("mcp server '{}'", name)))?;

        if matches!(server.source, McpSource::Registry | McpSource::Builtin)
            && !self.cli.status().await.available
        {
            return Err(Error::CliUnavailable(format!(
                "cannot enable '{}': the docker mcp CLI is not installed or not on PATH",
                name
            )));
        }

        self.mcp_servers.set_enabled(&server.id, true).await?;
        match self.reconcile_mcp(squad_id).await {
            Ok(()) => {
                self.mcp_servers
                    .set_status(&server.id, "active", None)
                    .await?;
            }
            Err(e) => {
                self.mcp_servers
                    .set_status(&server.id, "error", Some(&e.to_string()))
                    .await?;
                return Err(e);
            }
        }

        self.publish_mcp(squad_id, name, "enabled").await;
        self.mcp_servers
            .get(&server.id)
            .await?
            .ok_or_else(|| Error::not_found(format!("mcp server '{}'", name)))
    }

    /// Disable a server and reconcile.
    pub async fn disable_mcp(&self, squad_id: &str, name: &str) -> Result<McpServer> {
        let server = self
            .mcp_servers
            .get_by_name(squad_id, name)
            .await?
            .ok_or_else(|| Error::not_found(format!("mcp server '{}'", name)))?;

        self.mcp_servers.set_enabled(&server.id, false).await?;
        self.mcp_servers
            .set_status(&server.id, "configured", None)
            .await?;
        self.reconcile_mcp(squad_id).await?;

        self.publish_mcp(squad_id, name, "disabled").await;
        self.mcp_servers
            .get(&server.id)
            .await?
            .ok_or_else(|| Error::not_found(format!("mcp server '{}'", name)))
    }

    /// Rewrite the squad's `mcp.toml` from the enabled set and ask a live
    /// child to reload it.
    pub async fn reconcile_mcp(&self, squad_id: &str) -> Result<()> {
        let enabled = self.mcp_servers.list_enabled_for_squad(squad_id).await?;
        let state_dir = self.state_root.join("squads").join(squad_id);
        write_mcp_config(&state_dir, &enabled)?;

        if let Some(runtime) = self.runtimes.get(squad_id) {
            runtime.client().reload_mcp().await?;
        }
        Ok(())
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn get_squad(&self, squad_id: &str) -> Result<Squad> {
        self.squads
            .get(squad_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("squad {}", squad_id)))
    }

    /// First free port at or above the configured base, skipping ports
    /// claimed in the repository and ports something is listening on.
    async fn allocate_port(&self) -> Result<u16> {
        let used = self.squads.used_ports().await?;
        let mut port = self.opencode.base_port;
        loop {
            if !used.contains(&port) && std::net::TcpListener::bind(("127.0.0.1", port)).is_ok() {
                return Ok(port);
            }
            port = port.checked_add(1).ok_or_else(|| {
                Error::BackendUnavailable("no free backend port available".to_string())
            })?;
        }
    }

    async fn teardown_runtime(&self, squad_id: &str) {
        if let Some((_, runtime)) = self.runtimes.remove(squad_id) {
            runtime.stop().await;
        }
    }

    /// Consume liveness-lost reports and drive the restart policy.
    async fn monitor_health(self: Arc<Self>, mut health_rx: mpsc::Receiver<String>) {
        while let Some(squad_id) = health_rx.recv().await {
            warn!("Squad {} backend liveness lost", squad_id);
            self.teardown_runtime(&squad_id).await;

            let message = "backend failed 3 consecutive health probes";
            let _ = self
                .squads
                .update_opencode_state(
                    &squad_id,
                    OpencodeStatus::Error,
                    None,
                    None,
                    Some(message),
                )
                .await;
            self.publish_status(&squad_id, OpencodeStatus::Error, Some(message))
                .await;

            let delay = {
                let mut restarts = self.restarts.lock().await;
                let state = restarts.entry(squad_id.clone()).or_default();
                if state
                    .running_since
                    .map(|since| since.elapsed() >= STABLE_RESET)
                    .unwrap_or(false)
                {
                    state.attempt = 0;
                }
                state.running_since = None;
                let delay = RESTART_BASE
                    .saturating_mul(2u32.saturating_pow(state.attempt))
                    .min(RESTART_CAP);
                state.attempt = state.attempt.saturating_add(1);
                delay
            };

            info!("Restarting squad {} backend in {:?}", squad_id, delay);
            let supervisor = Arc::clone(&self);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;

                // The operator may have stopped or deleted the squad while
                // we were backing off.
                match supervisor.squads.get(&squad_id).await {
                    Ok(Some(squad)) if squad.opencode_status == OpencodeStatus::Error => {
                        if let Err(e) = supervisor.ensure_running(&squad_id).await {
                            error!("Restart of squad {} failed: {}", squad_id, e);
                        }
                    }
                    _ => info!("Skipping restart of squad {}", squad_id),
                }
            });
        }
    }

    async fn publish_status(&self, squad_id: &str, status: OpencodeStatus, error: Option<&str>) {
        if let Ok(Some(squad)) = self.squads.get(squad_id).await {
            self.bus.publish(EventRecord::new(
                kind::SQUAD_OPENCODE_STATUS,
                &squad.project_id,
                json!({"squad_id": squad_id, "status": status, "error": error}),
            ));
        }
    }

    async fn publish_mcp(&self, squad_id: &str, name: &str, action: &str) {
        if let Ok(Some(squad)) = self.squads.get(squad_id).await {
            self.bus.publish(EventRecord::new(
                kind::MCP_UPDATED,
                &squad.project_id,
                json!({"squad_id": squad_id, "name": name, "action": action}),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::settings::OpencodeSettings;

    async fn setup() -> (Database, Arc<SquadSupervisor>, String, String) {
        let db = Database::in_memory().await.unwrap();
        let projects = ProjectRepository::new(db.pool().clone());
        let squads = SquadRepository::new(db.pool().clone());
        let project = projects
            .create("p", "/tmp/p", json!({}))
            .await
            .unwrap();
        let squad = squads.create(&project.id, "alpha", None).await.unwrap();

        let state_root = tempfile::tempdir().unwrap().keep();
        let supervisor = SquadSupervisor::new(
            OpencodeSettings {
                binary: "/nonexistent/opencode".to_string(),
                base_port: 42900,
                provisioning_timeout_secs: 1,
                health_interval_secs: 1,
                stop_grace_secs: 1,
            },
            state_root,
            squads,
            projects,
            McpServerRepository::new(db.pool().clone()),
            EventBus::new(),
        );
        (db, supervisor, project.id, squad.id)
    }

    #[tokio::test]
    async fn test_ensure_running_spawn_failure_marks_error() {
        let (db, supervisor, _, squad_id) = setup().await;

        let err = supervisor.ensure_running(&squad_id).await.unwrap_err();
        assert_eq!(err.kind(), "backend_unavailable");

        let squads = SquadRepository::new(db.pool().clone());
        let squad = squads.get(&squad_id).await.unwrap().unwrap();
        assert_eq!(squad.opencode_status, OpencodeStatus::Error);
        assert!(squad.last_error.is_some());
    }

    #[tokio::test]
    async fn test_client_requires_running_backend() {
        let (_db, supervisor, _, squad_id) = setup().await;
        let err = supervisor.client(&squad_id).unwrap_err();
        assert_eq!(err.kind(), "precondition_failed");
    }

    #[tokio::test]
    async fn test_enable_catalog_server_without_cli_fails_loudly() {
        let (db, supervisor, _, squad_id) = setup().await;
        let mcp = McpServerRepository::new(db.pool().clone());
        mcp.create(
            &squad_id,
            "notion",
            McpSource::Registry,
            McpType::Container,
            Some("mcp/notion:latest"),
            None,
            None,
            &json!([]),
            &json!({}),
            &json!({}),
        )
        .await
        .unwrap();

        // The test environment has no docker CLI with an mcp plugin; the
        // enable must fail with cli_unavailable and leave the row alone.
        let result = supervisor.enable_mcp(&squad_id, "notion").await;
        match result {
            Err(err) => {
                assert_eq!(err.kind(), "cli_unavailable");
                let row = mcp.get_by_name(&squad_id, "notion").await.unwrap().unwrap();
                assert!(!row.enabled);
                assert_eq!(row.status, "configured");
            }
            Ok(_) => {
                // Host happens to have the toolchain; the enable path is
                // exercised end to end instead.
            }
        }
    }

    #[tokio::test]
    async fn test_add_custom_mcp_stays_disabled() {
        let (_db, supervisor, _, squad_id) = setup().await;

        let server = supervisor
            .add_mcp(
                &squad_id,
                CreateMcpServerRequest {
                    name: "internal".to_string(),
                    source: McpSource::Custom,
                    server_type: McpType::Remote,
                    image: None,
                    url: Some("https://mcp.internal.dev".to_string()),
                    command: None,
                    args: vec![],
                    headers: json!({}),
                    catalog_meta: json!({}),
                },
            )
            .await
            .unwrap();
        assert!(!server.enabled);

        let dup = supervisor
            .add_mcp(
                &squad_id,
                CreateMcpServerRequest {
                    name: "internal".to_string(),
                    source: McpSource::Custom,
                    server_type: McpType::Remote,
                    image: None,
                    url: None,
                    command: None,
                    args: vec![],
                    headers: json!({}),
                    catalog_meta: json!({}),
                },
            )
            .await;
        assert_eq!(dup.unwrap_err().kind(), "conflict");
    }
}
