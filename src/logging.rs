//! Structured logging configuration for the supervisor.
//!
//! Every worker and watchdog thread runs inside a [`worker_span`] carrying
//! the instance name and the thread's role, so a host running several
//! servers can filter one of them out of the combined stream. JSON output
//! is available for log aggregation systems.

use std::io;
use tracing::Level;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
};

/// Logging format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Pretty human-readable output (default for development)
    #[default]
    Pretty,
    /// JSON output for log aggregation
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Minimum log level
    pub level: Level,
    /// Log when a worker span opens and closes, i.e. thread start and exit
    pub with_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: Level::INFO,
            with_spans: false,
        }
    }
}

impl LogConfig {
    /// Create config for JSON logging (production).
    pub const fn json() -> Self {
        Self {
            format: LogFormat::Json,
            level: Level::INFO,
            with_spans: true,
        }
    }

    #[must_use]
    pub const fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

/// Span wrapping the whole body of one instance thread.
///
/// ```rust,ignore
/// let span = worker_span("alpha", "log-relay");
/// let _guard = span.enter();
/// tracing::info!("Claimed log file");
/// ```
pub fn worker_span(instance: &str, role: &str) -> tracing::Span {
    tracing::info_span!("worker", instance = %instance, role = %role)
}

/// Initialize the global tracing subscriber.
///
/// Should be called once at startup. Respects `RUST_LOG` environment
/// variable for filtering if set. Later calls are ignored.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    let span_events = if config.with_spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    match config.format {
        LogFormat::Pretty => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .with_ansi(true)
                    .with_thread_names(true)
                    .with_span_events(span_events),
            );
            let _ = tracing::subscriber::set_global_default(subscriber);
        },
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_events(span_events)
                    .with_writer(io::stdout),
            );
            let _ = tracing::subscriber::set_global_default(subscriber);
        },
    }
}
