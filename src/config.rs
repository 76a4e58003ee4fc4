//! Host configuration.
//!
//! Loads host-wide settings and the list of supervised servers from
//! `~/.warden/host.toml`. Every section is optional and falls back to the
//! defaults in [`crate::constants`].
//!
//! # Example Configuration
//!
//! ```toml
//! [host]
//! log_dir = "/srv/game/Saved/Logs"
//! watchdog_interval_ms = 1000
//!
//! [relay]
//! rcon_marker = "LogRcon"
//! max_retries = 50
//!
//! [[servers]]
//! name = "alpha"
//! game_port = 7777
//! query_port = 27015
//! rcon_port = 25575
//! rcon_password = "hunter2"
//! command = ["./GameServer", "-Port={game_port}", "-QueryPort={query_port}"]
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::relay::RetryPolicy;

/// Host configuration loaded from `~/.warden/host.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Host-wide supervision settings.
    pub host: HostSettings,
    /// Log relay settings shared by every instance.
    pub relay: RelaySettings,
    /// Supervised servers.
    pub servers: Vec<ServerConfig>,
}

/// Host-wide supervision settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Directory the game writes its log files to.
    pub log_dir: PathBuf,
    /// Log file name assumed when the directory holds no candidate yet.
    pub fallback_log_name: String,
    /// Paths containing this marker are never tailed.
    pub backup_marker: String,
    /// Interval between two watchdog polls.
    pub watchdog_interval_ms: u64,
    /// Delay before the health monitor starts probing.
    pub health_initial_delay_secs: u64,
    /// Interval between two health probes.
    pub health_poll_interval_secs: u64,
    /// Interval between checks while `start` waits for pid and log file.
    pub start_poll_ms: u64,
    /// Time a stopping server gets before a new start kills it.
    pub stop_grace_secs: u64,
}

/// Log relay settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    /// Token opening an RCON block.
    pub rcon_marker: String,
    /// Regex matching the start of a new timestamped entry.
    pub entry_pattern: String,
    /// Regex matching the start of a generic log record.
    pub record_pattern: String,
    /// Interval between reads once the tail reaches end of file.
    pub tail_poll_ms: u64,
    /// Interval between checks for a freshly written log file.
    pub rotation_poll_ms: u64,
    /// Fixed delay before retrying after an I/O error.
    pub retry_delay_ms: u64,
    /// Maximum consecutive tail failures; unlimited when absent.
    pub max_retries: Option<u32>,
}

/// Configuration of one supervised server.
///
/// The lifecycle controller keeps the latest version of this struct and
/// freezes a clone of it every time the server is started.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unique instance name.
    pub name: String,
    /// Address used for RCON and health probes.
    pub host: String,
    /// Port players connect to. Keys the instance in the registry.
    pub game_port: u16,
    /// Server-browser query port.
    pub query_port: u16,
    /// RCON port.
    pub rcon_port: u16,
    /// RCON password.
    pub rcon_password: String,
    /// Argument template; see [`crate::collab::TemplateConfigHandler`].
    pub command: Vec<String>,
    /// Working directory for the server process.
    pub working_dir: Option<PathBuf>,
    /// Keep console output across restarts.
    pub persistent_output: bool,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("logs"),
            fallback_log_name: constants::FALLBACK_LOG_NAME.to_string(),
            backup_marker: constants::BACKUP_MARKER.to_string(),
            watchdog_interval_ms: constants::WATCHDOG_INTERVAL_MS,
            health_initial_delay_secs: constants::HEALTH_INITIAL_DELAY_SECS,
            health_poll_interval_secs: constants::HEALTH_POLL_INTERVAL_SECS,
            start_poll_ms: constants::START_POLL_MS,
            stop_grace_secs: constants::STOP_GRACE_SECS,
        }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            rcon_marker: constants::RCON_MARKER.to_string(),
            entry_pattern: constants::ENTRY_PATTERN.to_string(),
            record_pattern: constants::RECORD_PATTERN.to_string(),
            tail_poll_ms: constants::TAIL_POLL_MS,
            rotation_poll_ms: constants::ROTATION_POLL_MS,
            retry_delay_ms: constants::TAIL_RETRY_DELAY_MS,
            max_retries: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            host: "127.0.0.1".to_string(),
            game_port: 7777,
            query_port: 27015,
            rcon_port: 25575,
            rcon_password: String::new(),
            command: Vec::new(),
            working_dir: None,
            persistent_output: false,
        }
    }
}

impl HostSettings {
    pub const fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub const fn health_initial_delay(&self) -> Duration {
        Duration::from_secs(self.health_initial_delay_secs)
    }

    pub const fn health_poll_interval(&self) -> Duration {
        Duration::from_secs(self.health_poll_interval_secs)
    }

    pub const fn start_poll(&self) -> Duration {
        Duration::from_millis(self.start_poll_ms)
    }

    pub const fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }
}

impl RelaySettings {
    pub const fn tail_poll(&self) -> Duration {
        Duration::from_millis(self.tail_poll_ms)
    }

    pub const fn rotation_poll(&self) -> Duration {
        Duration::from_millis(self.rotation_poll_ms)
    }

    /// Retry policy for the tail loop.
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            delay: Duration::from_millis(self.retry_delay_ms),
            max_retries: self.max_retries,
        }
    }
}

impl HostConfig {
    /// Load host configuration from `path`.
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid, returns an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(
                path = %path.display(),
                "Host config not found, using defaults"
            );
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read host config from {}", path.display()))?;

        let config: HostConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse host config from {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid host config in {}", path.display()))?;

        tracing::info!(
            path = %path.display(),
            servers = config.servers.len(),
            log_dir = %config.host.log_dir.display(),
            "Loaded host configuration"
        );

        Ok(config)
    }

    /// Get the path to the host configuration file.
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home.join(".warden").join("host.toml"))
    }

    /// Check cross-server invariants that serde cannot express.
    pub fn validate(&self) -> crate::Result<()> {
        let mut names = HashSet::new();
        let mut ports = HashSet::new();

        for server in &self.servers {
            if server.name.trim().is_empty() {
                return Err(crate::Error::Config("server name must not be empty".into()));
            }
            if !names.insert(server.name.as_str()) {
                return Err(crate::Error::Config(format!(
                    "duplicate server name '{}'",
                    server.name
                )));
            }
            if !ports.insert(server.game_port) {
                return Err(crate::Error::Config(format!(
                    "game port {} is assigned to more than one server",
                    server.game_port
                )));
            }
        }

        let intervals = [
            ("host.watchdog_interval_ms", self.host.watchdog_interval_ms),
            ("host.start_poll_ms", self.host.start_poll_ms),
            ("relay.tail_poll_ms", self.relay.tail_poll_ms),
            ("relay.rotation_poll_ms", self.relay.rotation_poll_ms),
        ];
        if let Some((key, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(crate::Error::Config(format!("{key} must be greater than zero")));
        }

        for pattern in [&self.relay.entry_pattern, &self.relay.record_pattern] {
            regex::Regex::new(pattern).map_err(|e| {
                crate::Error::Config(format!("invalid relay pattern '{pattern}': {e}"))
            })?;
        }

        Ok(())
    }
}
