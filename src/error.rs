//! Error types for the supervisor.
//!
//! Routine operational outcomes (already running, not running, no known pid)
//! are reported through [`crate::instance::Status`] and never appear here.
//! These variants cover the failures that callers can actually act on.

use crate::worker::WorkerRole;

/// Result type for supervisor operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Supervisor errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// IO error with context.
    #[error("IO error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The server process could not be spawned.
    #[error("failed to spawn server '{name}': {reason}")]
    Spawn { name: String, reason: String },

    /// A worker thread could not be created.
    #[error("failed to start {role} thread: {source}")]
    ThreadSpawn {
        role: WorkerRole,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// RCON command could not be delivered.
    #[error("rcon error: {0}")]
    Rcon(String),

    /// The watchdog could not keep an instance's workers alive.
    #[error("watchdog for '{name}' failed: {reason}")]
    Watchdog { name: String, reason: String },

    /// The instance was evicted and can no longer be used.
    #[error("instance '{name}' has been imploded")]
    Imploded { name: String },
}

impl Error {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a spawn error.
    pub fn spawn(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Spawn {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a watchdog failure.
    pub fn watchdog(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Watchdog {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a thread spawn error for the given worker role.
    pub const fn thread_spawn(role: WorkerRole, source: std::io::Error) -> Self {
        Self::ThreadSpawn { role, source }
    }
}
