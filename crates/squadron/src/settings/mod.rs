//! Layered runtime configuration.
//!
//! Resolution order: built-in defaults, then an optional TOML file
//! (explicit `--config` path or `$XDG_CONFIG_HOME/squadron/config.toml`),
//! then `SQUADRON_*` environment overrides with `__` as the section
//! separator (e.g. `SQUADRON_SERVER__PORT=9000`).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4400,
        }
    }
}

/// On-disk locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory holding the SQLite database.
    pub data_dir: PathBuf,
    /// Scratch directory for squad runtime state (pid files, MCP configs).
    pub state_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("squadron");
        let state_dir = dirs::state_dir()
            .or_else(dirs::data_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("squadron");
        Self {
            data_dir,
            state_dir,
        }
    }
}

/// Backend process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpencodeSettings {
    /// Path or name of the opencode binary.
    pub binary: String,
    /// First port tried when allocating a backend listener.
    pub base_port: u16,
    /// Upper bound on `ensure_running` (seconds).
    pub provisioning_timeout_secs: u64,
    /// Interval between health probes (seconds).
    pub health_interval_secs: u64,
    /// Grace period between SIGTERM and SIGKILL on stop (seconds).
    pub stop_grace_secs: u64,
}

impl Default for OpencodeSettings {
    fn default() -> Self {
        Self {
            binary: "opencode".to_string(),
            base_port: 41900,
            provisioning_timeout_secs: 60,
            health_interval_secs: 10,
            stop_grace_secs: 10,
        }
    }
}

/// Session turn timers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Deadline for short backend calls (seconds).
    pub request_timeout_secs: u64,
    /// Deadline for prompt turns; an unanswered turn fails with
    /// `backend_silent` after this long (seconds).
    pub turn_timeout_secs: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 30,
            turn_timeout_secs: 600,
        }
    }
}

/// External node discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    /// Enable the periodic local process scan.
    pub scan_enabled: bool,
    /// Scan and re-probe interval (seconds).
    pub scan_interval_secs: u64,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            scan_enabled: true,
            scan_interval_secs: 30,
        }
    }
}

/// Resolved application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerSettings,
    pub storage: StorageSettings,
    pub opencode: OpencodeSettings,
    pub session: SessionSettings,
    pub nodes: NodeSettings,
}

impl Settings {
    /// Load settings from defaults, optional file, and environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        let file = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path().filter(|p| p.exists()),
        };
        if let Some(path) = file {
            let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
            builder = builder.add_source(File::new(&expanded, FileFormat::Toml));
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix("SQUADRON")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;

        Ok(settings)
    }

    /// Path of the SQLite database file.
    pub fn db_path(&self) -> PathBuf {
        self.storage.data_dir.join("squadron.db")
    }

    /// Per-squad runtime state directory.
    pub fn squad_state_dir(&self, squad_id: &str) -> PathBuf {
        self.storage.state_dir.join("squads").join(squad_id)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("squadron").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 4400);
        assert_eq!(settings.opencode.provisioning_timeout_secs, 60);
        assert_eq!(settings.session.turn_timeout_secs, 600);
        assert!(settings.db_path().ends_with("squadron.db"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\nhost = \"0.0.0.0\"\nport = 9000\n\n[opencode]\nbinary = \"/usr/local/bin/opencode\"\nbase_port = 50000\nprovisioning_timeout_secs = 30\nhealth_interval_secs = 5\nstop_grace_secs = 3\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.opencode.base_port, 50000);
        // Unspecified sections keep their defaults.
        assert_eq!(settings.session.request_timeout_secs, 30);
    }
}
