//! Per-squad backend process ownership.
//!
//! A runtime owns exactly one `opencode serve` child: it spawns it, waits
//! for `/info` to come up, runs the liveness probe loop, and tears the
//! process down with SIGTERM-then-SIGKILL. Restart policy lives one level
//! up in the supervisor; the runtime only reports that liveness was lost.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context as AnyhowContext;
use log::{debug, info, warn};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::opencode::OpencodeClient;

/// Consecutive probe failures before liveness is considered lost.
const HEALTH_FAILURE_THRESHOLD: u32 = 3;

/// Interval between readiness polls during provisioning.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Everything a runtime needs to own its child.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Path or name of the opencode binary.
    pub binary: String,
    /// Working directory for the backend (the project root).
    pub project_path: PathBuf,
    /// Squad state directory (pid file, mcp.toml).
    pub state_dir: PathBuf,
    /// Port the backend listens on.
    pub port: u16,
    /// Upper bound on spawn-to-ready.
    pub provisioning_timeout: Duration,
    /// Interval between liveness probes.
    pub health_interval: Duration,
    /// Grace period between SIGTERM and SIGKILL.
    pub stop_grace: Duration,
}

/// One supervised backend child.
#[derive(Debug)]
pub struct SquadRuntime {
    squad_id: String,
    config: RuntimeConfig,
    client: OpencodeClient,
    pid: u32,
    child: Mutex<Option<Child>>,
    shutdown: CancellationToken,
}

impl SquadRuntime {
    /// Spawn the backend and wait until `/info` answers. Fails with
    /// `spawn_failed` when the process cannot start and
    /// `provisioning_timeout` when it never becomes ready in time.
    pub async fn spawn(squad_id: &str, config: RuntimeConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.state_dir)
            .with_context(|| format!("creating state dir {}", config.state_dir.display()))?;

        let base_url = format!("http://127.0.0.1:{}", config.port);
        info!(
            "Spawning opencode for squad {} on port {} (cwd {})",
            squad_id,
            config.port,
            config.project_path.display()
        );

        let mut cmd = Command::new(&config.binary);
        cmd.arg("serve")
            .arg("--port")
            .arg(config.port.to_string())
            .arg("--hostname")
            .arg("127.0.0.1")
            .current_dir(&config.project_path)
            .env("OPENCODE_CONFIG_DIR", &config.state_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::BackendUnavailable(format!("spawn failed: {}: {}", config.binary, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| Error::BackendUnavailable("spawn failed: no pid".to_string()))?;

        // Forward backend stderr into our log at debug level.
        if let Some(stderr) = child.stderr.take() {
            let squad_id = squad_id.to_string();
            tokio::spawn(async move {
                use tokio::io::{AsyncBufReadExt, BufReader};
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[opencode {}] {}", squad_id, line);
                }
            });
        }

        let pid_file = config.state_dir.join("opencode.pid");
        if let Err(e) = std::fs::write(&pid_file, pid.to_string()) {
            warn!("Failed to write pid file {}: {}", pid_file.display(), e);
        }

        let client = OpencodeClient::new(&base_url)?;
        let runtime = Self {
            squad_id: squad_id.to_string(),
            config,
            client,
            pid,
            child: Mutex::new(Some(child)),
            shutdown: CancellationToken::new(),
        };

        runtime.wait_ready().await?;
        info!(
            "Backend for squad {} ready at {} (pid {})",
            runtime.squad_id, base_url, pid
        );
        Ok(runtime)
    }

    /// Poll `/info` until it answers or the provisioning timeout elapses.
    async fn wait_ready(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.provisioning_timeout;

        loop {
            // A child that already exited will never become ready.
            if let Some(status) = self.try_wait().await {
                self.kill().await;
                return Err(Error::BackendUnavailable(format!(
                    "spawn failed: backend exited during provisioning ({})",
                    status
                )));
            }

            if self.client.ping().await {
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                self.kill().await;
                return Err(Error::BackendUnavailable(format!(
                    "provisioning timeout after {:?} for squad {}",
                    self.config.provisioning_timeout, self.squad_id
                )));
            }

            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    pub fn client(&self) -> &OpencodeClient {
        &self.client
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn state_dir(&self) -> &PathBuf {
        &self.config.state_dir
    }

    /// Run the liveness loop until shutdown. Three consecutive failed
    /// probes send the squad id on `lost_tx` and end the loop.
    pub async fn health_loop(&self, lost_tx: mpsc::Sender<String>) {
        let mut failures = 0u32;
        let mut ticker = tokio::time::interval(self.config.health_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }

            if self.client.ping().await {
                failures = 0;
                continue;
            }

            failures += 1;
            warn!(
                "Health probe failed for squad {} ({}/{})",
                self.squad_id, failures, HEALTH_FAILURE_THRESHOLD
            );
            if failures >= HEALTH_FAILURE_THRESHOLD {
                let _ = lost_tx.send(self.squad_id.clone()).await;
                return;
            }
        }
    }

    /// Graceful shutdown: SIGTERM, wait out the grace period, SIGKILL.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return;
        };

        if let Some(pid) = child.id() {
            send_sigterm(pid);
            match tokio::time::timeout(self.config.stop_grace, child.wait()).await {
                Ok(Ok(status)) => {
                    info!("Backend for squad {} exited: {}", self.squad_id, status);
                    return;
                }
                Ok(Err(e)) => warn!("Waiting for backend of squad {}: {}", self.squad_id, e),
                Err(_) => warn!(
                    "Backend for squad {} ignored SIGTERM for {:?}, killing",
                    self.squad_id, self.config.stop_grace
                ),
            }
        }

        if let Err(e) = child.kill().await {
            warn!("Failed to kill backend for squad {}: {}", self.squad_id, e);
        }
        let _ = child.wait().await;
    }

    /// The child's exit status if it has already terminated.
    async fn try_wait(&self) -> Option<std::process::ExitStatus> {
        let mut guard = self.child.lock().await;
        guard.as_mut().and_then(|child| child.try_wait().ok().flatten())
    }

    /// Immediate SIGKILL (provisioning failures).
    async fn kill(&self) {
        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }
}

fn send_sigterm(pid: u32) {
    use rustix::process::{kill_process, Pid, Signal};
    match Pid::from_raw(pid as i32) {
        Some(pid) => {
            if let Err(e) = kill_process(pid, Signal::TERM) {
                debug!("SIGTERM to {:?} failed: {}", pid, e);
            }
        }
        None => debug!("Invalid pid {}", pid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path, binary: &str) -> RuntimeConfig {
        RuntimeConfig {
            binary: binary.to_string(),
            project_path: dir.to_path_buf(),
            state_dir: dir.join("state"),
            port: 0,
            provisioning_timeout: Duration::from_millis(500),
            health_interval: Duration::from_millis(50),
            stop_grace: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_spawn_failure_is_backend_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), "/nonexistent/opencode-test-binary");
        let err = SquadRuntime::spawn("sq1", config).await.unwrap_err();
        assert_eq!(err.kind(), "backend_unavailable");
        assert_eq!(err.code(), Some("spawn_failed"));
    }

    #[tokio::test]
    async fn test_exiting_child_fails_provisioning() {
        let dir = tempfile::tempdir().unwrap();
        // `true` accepts the serve arguments and exits immediately.
        let config = test_config(dir.path(), "true");
        let err = SquadRuntime::spawn("sq1", config).await.unwrap_err();
        assert_eq!(err.kind(), "backend_unavailable");
    }

    #[tokio::test]
    async fn test_never_ready_child_hits_provisioning_timeout() {
        let dir = tempfile::tempdir().unwrap();
        // `sleep` never opens the port; expect the timeout path. Use a
        // binary that outlives the 500 ms provisioning window.
        let mut config = test_config(dir.path(), "sleep");
        config.binary = "sleep".to_string();
        // sleep interprets "serve" as an invalid duration and may exit
        // immediately; either exit-during-provisioning or timeout is a
        // backend_unavailable.
        let err = SquadRuntime::spawn("sq1", config).await.unwrap_err();
        assert_eq!(err.kind(), "backend_unavailable");
    }
}
