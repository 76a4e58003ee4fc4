//! Collaborators the supervisor drives but does not implement.
//!
//! The RCON wire protocol, the periodic health probe and the game's own
//! configuration files are owned by other components. The lifecycle
//! controller only sees them through these traits.

use std::fmt;
use std::time::Duration;

use crate::config::ServerConfig;
use crate::error::Result;
use crate::sink::OutputSink;

/// `host:port` pair identifying one RCON server. Keys the connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RconEndpoint {
    pub host: String,
    pub port: u16,
}

impl RconEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RconEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// RCON client with a connection pool keyed by endpoint.
pub trait RconClient: Send + Sync {
    /// Send `command` and stream the response into `sink`.
    fn send(
        &self,
        endpoint: &RconEndpoint,
        password: &str,
        command: &str,
        sink: &OutputSink,
    ) -> Result<()>;

    /// Drop any pooled connection to `endpoint`.
    fn delete_connection(&self, endpoint: &RconEndpoint);
}

/// Everything a health monitor needs to probe one server.
#[derive(Debug, Clone)]
pub struct HealthParams {
    pub host: String,
    pub query_port: u16,
    pub rcon_port: u16,
    pub rcon_password: String,
    pub name: String,
    pub poll_interval: Duration,
    pub initial_delay: Duration,
}

/// A running health monitor.
pub trait HealthMonitor: Send + Sync {
    fn stop(&self);
}

/// Creates health monitors; each one starts probing after its initial delay.
pub trait HealthMonitorFactory: Send + Sync {
    fn spawn(&self, params: HealthParams, sink: OutputSink) -> Box<dyn HealthMonitor>;
}

/// Process-wide handler for the game's configuration files.
pub trait ConfigHandler: Send + Sync {
    /// Write the game's own configuration files for `name` before launch.
    fn apply_server_config_files(&self, config: &ServerConfig, name: &str) -> Result<()> {
        tracing::debug!(instance = %name, port = config.game_port, "No server config files to apply");
        Ok(())
    }

    /// Ordered argument vector, program first.
    fn server_arguments(&self, config: &ServerConfig) -> Vec<String>;

    /// Push the current ban list to the game's ban file.
    fn apply_server_bans(&self) -> Result<()> {
        Ok(())
    }
}

/// [`ConfigHandler`] that expands placeholders in `ServerConfig::command`.
///
/// Recognized placeholders: `{name}`, `{host}`, `{game_port}`, `{query_port}`,
/// `{rcon_port}` and `{rcon_password}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateConfigHandler;

impl ConfigHandler for TemplateConfigHandler {
    fn server_arguments(&self, config: &ServerConfig) -> Vec<String> {
        let game_port = config.game_port.to_string();
        let query_port = config.query_port.to_string();
        let rcon_port = config.rcon_port.to_string();
        let substitutions = [
            ("{name}", config.name.as_str()),
            ("{host}", config.host.as_str()),
            ("{game_port}", game_port.as_str()),
            ("{query_port}", query_port.as_str()),
            ("{rcon_port}", rcon_port.as_str()),
            ("{rcon_password}", config.rcon_password.as_str()),
        ];

        config
            .command
            .iter()
            .map(|token| {
                substitutions
                    .iter()
                    .fold(token.clone(), |acc, &(key, value)| acc.replace(key, value))
            })
            .collect()
    }
}
