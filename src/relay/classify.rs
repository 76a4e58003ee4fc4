//! Picking RCON feedback out of the server log.
//!
//! The server prints RCON responses into its regular log: a line carrying
//! the RCON marker announces a response, and the response body follows on
//! the next lines until the next regular log entry begins. The heuristic is
//! tied to the game's log layout, so it sits behind [`LineClassifier`].

use regex::Regex;
use std::sync::LazyLock;

use crate::config::RelaySettings;
use crate::error::{Error, Result};

static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").expect("valid ANSI regex")
});

/// Remove ANSI color and cursor escape sequences.
pub fn strip_ansi(line: &str) -> std::borrow::Cow<'_, str> {
    ANSI_ESCAPE.replace_all(line, "")
}

/// Verdict for one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Forward this (sanitized) text to the RCON sink.
    Forward(String),
    /// Not RCON feedback.
    Drop,
}

/// Stateful line-by-line classifier.
pub trait LineClassifier: Send {
    fn classify(&mut self, line: &str) -> Classification;

    /// Forget any open block, e.g. after switching to a new file.
    fn reset(&mut self);
}

/// Default classifier: two-state lookahead over RCON blocks.
///
/// - A line containing the marker opens a block and is itself dropped.
/// - While a block is open, a line starting a new timestamped entry or a
///   generic log record closes it and is dropped.
/// - Every other line inside a block is forwarded.
/// - Lines outside a block are dropped.
#[derive(Debug, Clone)]
pub struct RconBlockClassifier {
    marker: String,
    entry: Regex,
    record: Regex,
    in_block: bool,
}

impl RconBlockClassifier {
    pub fn new(marker: impl Into<String>, entry_pattern: &str, record_pattern: &str) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| Error::Config(format!("invalid relay pattern '{pattern}': {e}")))
        };
        Ok(Self {
            marker: marker.into(),
            entry: compile(entry_pattern)?,
            record: compile(record_pattern)?,
            in_block: false,
        })
    }

    pub fn from_settings(settings: &RelaySettings) -> Result<Self> {
        Self::new(
            settings.rcon_marker.clone(),
            &settings.entry_pattern,
            &settings.record_pattern,
        )
    }

    pub const fn in_block(&self) -> bool {
        self.in_block
    }

    fn is_boundary(&self, line: &str) -> bool {
        self.entry.is_match(line) || self.record.is_match(line)
    }
}

impl Default for RconBlockClassifier {
    fn default() -> Self {
        Self {
            marker: crate::constants::RCON_MARKER.to_string(),
            entry: Regex::new(crate::constants::ENTRY_PATTERN).expect("valid entry pattern"),
            record: Regex::new(crate::constants::RECORD_PATTERN).expect("valid record pattern"),
            in_block: false,
        }
    }
}

impl LineClassifier for RconBlockClassifier {
    fn classify(&mut self, line: &str) -> Classification {
        let clean = strip_ansi(line);
        let clean = clean.trim_end_matches(['\r', '\n']);

        if clean.contains(self.marker.as_str()) {
            self.in_block = true;
            return Classification::Drop;
        }

        if !self.in_block {
            return Classification::Drop;
        }

        if self.is_boundary(clean) {
            self.in_block = false;
            return Classification::Drop;
        }

        Classification::Forward(clean.to_string())
    }

    fn reset(&mut self) {
        self.in_block = false;
    }
}
