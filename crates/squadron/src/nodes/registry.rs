//! External node discovery and liveness.
//!
//! Two discovery sources: a periodic scan of local listening TCP sockets
//! owned by `opencode` processes, and operator-submitted URLs. Known nodes
//! are re-probed on the same cadence; three consecutive misses mark a node
//! unhealthy but keep it listed until explicit removal.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::json;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use squadron_protocol::ServerInfo;

use crate::bus::EventBus;
use crate::error::{Error, Result};
use crate::events::{kind, EventRecord, EventRepository};

use super::models::{ExternalNode, NodeSource};
use super::repository::ExternalNodeRepository;

/// Node events are host-global; they carry this sentinel project key.
const SYSTEM_PROJECT: &str = "system";

/// Deadline for `/info` probes.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Registry timers.
#[derive(Debug, Clone)]
pub struct NodeRegistryConfig {
    pub scan_enabled: bool,
    pub interval: Duration,
}

impl Default for NodeRegistryConfig {
    fn default() -> Self {
        Self {
            scan_enabled: true,
            interval: Duration::from_secs(30),
        }
    }
}

/// The registry.
pub struct NodeRegistry {
    config: NodeRegistryConfig,
    nodes: ExternalNodeRepository,
    events: EventRepository,
    bus: EventBus,
    http: reqwest::Client,
}

impl NodeRegistry {
    pub fn new(
        config: NodeRegistryConfig,
        nodes: ExternalNodeRepository,
        events: EventRepository,
        bus: EventBus,
    ) -> Arc<Self> {
        let http = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .unwrap_or_default();
        Arc::new(Self {
            config,
            nodes,
            events,
            bus,
            http,
        })
    }

    /// Run the scan + re-probe loop until cancelled.
    pub fn spawn(self: &Arc<Self>, shutdown: CancellationToken) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(registry.config.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if registry.config.scan_enabled {
                    registry.scan_local().await;
                }
                registry.reprobe_known().await;
            }
        });
    }

    /// All known nodes.
    pub async fn list(&self) -> Result<Vec<ExternalNode>> {
        Ok(self.nodes.list().await?)
    }

    /// Operator-submitted probe: persist on success.
    pub async fn probe(&self, base_url: &str) -> Result<ExternalNode> {
        let base_url = normalize_base_url(base_url)?;
        let info = self.fetch_info(&base_url).await.ok_or_else(|| {
            Error::BackendUnavailable(format!("{} did not answer /info", base_url))
        })?;

        let known = self.nodes.get(&base_url).await?.is_some();
        let node = self
            .nodes
            .record_seen(&base_url, info.version.as_deref(), NodeSource::Manual)
            .await?;
        if !known {
            self.emit_node(kind::NODE_DISCOVERED, &node).await;
        }
        Ok(node)
    }

    /// Remove a node from the registry.
    pub async fn remove(&self, base_url: &str) -> Result<()> {
        self.nodes
            .get(base_url)
            .await?
            .ok_or_else(|| Error::not_found(format!("node {}", base_url)))?;
        Ok(self.nodes.delete(base_url).await?)
    }

    /// Enumerate local listeners owned by opencode processes and probe
    /// each one.
    async fn scan_local(&self) {
        let output = match Command::new("lsof")
            .args(["-nP", "-iTCP", "-sTCP:LISTEN"])
            .output()
            .await
        {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).into_owned(),
            Ok(out) => {
                debug!("lsof exited with {}", out.status);
                return;
            }
            Err(e) => {
                debug!("lsof not invocable: {}", e);
                return;
            }
        };

        for port in parse_opencode_listen_ports(&output) {
            let base_url = format!("http://127.0.0.1:{}", port);
            let Some(info) = self.fetch_info(&base_url).await else {
                continue;
            };

            let known = self.nodes.get(&base_url).await.ok().flatten().is_some();
            match self
                .nodes
                .record_seen(&base_url, info.version.as_deref(), NodeSource::LocalLsof)
                .await
            {
                Ok(node) => {
                    if !known {
                        info!("Discovered local opencode node at {}", base_url);
                        self.emit_node(kind::NODE_DISCOVERED, &node).await;
                    }
                }
                Err(e) => warn!("Recording node {}: {:#}", base_url, e),
            }
        }
    }

    /// Re-probe every known node; misses accumulate toward unhealthy.
    async fn reprobe_known(&self) {
        let nodes = match self.nodes.list().await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("Listing nodes for re-probe: {:#}", e);
                return;
            }
        };

        for node in nodes {
            if self.fetch_info(&node.base_url).await.is_some() {
                let _ = self
                    .nodes
                    .record_seen(&node.base_url, None, node.source)
                    .await;
                continue;
            }

            let was_healthy = node.healthy;
            match self.nodes.record_miss(&node.base_url).await {
                Ok(Some(updated)) if was_healthy && !updated.healthy => {
                    warn!("Node {} went unhealthy", node.base_url);
                    self.emit_node(kind::NODE_LOST, &updated).await;
                }
                Ok(_) => {}
                Err(e) => warn!("Recording miss for {}: {:#}", node.base_url, e),
            }
        }
    }

    async fn fetch_info(&self, base_url: &str) -> Option<ServerInfo> {
        let url = format!("{}/info", base_url);
        let response = self.http.get(&url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }

    async fn emit_node(&self, kind: &str, node: &ExternalNode) {
        let record = EventRecord::new(
            kind,
            SYSTEM_PROJECT,
            json!({"base_url": node.base_url, "healthy": node.healthy, "source": node.source}),
        );
        if let Err(e) = self.events.insert(&record).await {
            warn!("Failed to persist node event: {:#}", e);
        }
        self.bus.publish(record);
    }
}

/// Validate and canonicalize an operator-submitted base URL.
fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
        return Err(Error::validation(format!(
            "node URL must be http(s): {}",
            raw
        )));
    }
    if trimmed.len() <= "http://".len() {
        return Err(Error::validation("node URL is missing a host"));
    }
    Ok(trimmed.to_string())
}

/// Ports of loopback/wildcard listeners owned by processes whose command
/// name starts with `opencode`.
fn parse_opencode_listen_ports(lsof_output: &str) -> Vec<u16> {
    let mut ports = HashSet::new();

    for line in lsof_output.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 9 {
            continue;
        }
        let command = fields[0];
        if !command.to_lowercase().starts_with("opencode") {
            continue;
        }

        // NAME looks like `127.0.0.1:4096` or `*:4096`.
        let name = fields[8];
        let Some((host, port)) = name.rsplit_once(':') else {
            continue;
        };
        if host != "127.0.0.1" && host != "localhost" && host != "*" {
            continue;
        }
        if let Ok(port) = port.parse::<u16>() {
            ports.insert(port);
        }
    }

    let mut ports: Vec<u16> = ports.into_iter().collect();
    ports.sort_unstable();
    ports
}
