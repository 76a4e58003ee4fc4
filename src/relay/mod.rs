//! Relaying RCON feedback from the server log into the RCON sink.
//!
//! The relay runs on its own worker thread for the lifetime of one server
//! run. It first waits for the server to start writing a fresh log file,
//! claims it, then tails it and forwards the lines the classifier selects.
//!
//! ## Module Structure
//!
//! - [`discovery`]: Candidate enumeration, rotation detection and claims
//! - [`tail`]: Following appended lines
//! - [`classify`]: RCON block classification and ANSI sanitization

mod classify;
mod discovery;
mod tail;

pub use classify::{Classification, LineClassifier, RconBlockClassifier, strip_ansi};
pub use discovery::{LogClaims, LogDiscovery};
pub use tail::follow;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::sink::OutputSink;
use crate::worker::CancelToken;

/// How the tail loop reacts to I/O errors.
///
/// Retries happen after a fixed delay, without backoff. With no ceiling the
/// relay retries until its thread is cancelled. The failure count resets
/// once a reopened tail delivers a line again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub max_retries: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(crate::constants::TAIL_RETRY_DELAY_MS),
            max_retries: None,
        }
    }
}

impl RetryPolicy {
    pub const fn unlimited(delay: Duration) -> Self {
        Self {
            delay,
            max_retries: None,
        }
    }

    /// Whether `failures` consecutive failures exhaust the policy.
    pub fn exhausted(&self, failures: u32) -> bool {
        self.max_retries.is_some_and(|max| failures > max)
    }
}

/// One relay run for one instance.
pub struct LogRelay {
    pub name: String,
    pub discovery: LogDiscovery,
    /// Newest log modification time seen before the server was spawned.
    pub baseline: Option<SystemTime>,
    pub claims: Arc<LogClaims>,
    pub classifier: Box<dyn LineClassifier>,
    pub sink: OutputSink,
    pub tail_poll: Duration,
    pub rotation_poll: Duration,
    pub retry: RetryPolicy,
}

impl LogRelay {
    /// Detect, claim and tail the instance's log file until cancelled.
    ///
    /// `on_claim` receives the claimed path once the fresh file is found.
    pub fn run(mut self, cancel: &CancelToken, on_claim: impl FnOnce(PathBuf)) {
        tracing::debug!(
            instance = %self.name,
            dir = %self.discovery.dir().display(),
            baseline = ?self.baseline,
            "Waiting for a fresh log file"
        );

        let Some(path) = self.discovery.await_fresh(
            &self.name,
            &self.claims,
            self.baseline,
            self.rotation_poll,
            cancel,
        ) else {
            return;
        };
        on_claim(path.clone());

        let mut failures = 0u32;
        loop {
            self.classifier.reset();
            let classifier = &mut self.classifier;
            let sink = &self.sink;
            let mut progressed = false;
            let result = follow(&path, self.tail_poll, cancel, |line| {
                progressed = true;
                if let Classification::Forward(text) = classifier.classify(line) {
                    sink.push(text);
                }
            });

            match result {
                Ok(()) => return,
                Err(e) => {
                    if progressed {
                        failures = 0;
                    }
                    failures = failures.saturating_add(1);
                    tracing::warn!(
                        instance = %self.name,
                        path = %path.display(),
                        failures = failures,
                        error = %e,
                        "Log tail failed, retrying"
                    );
                    if self.retry.exhausted(failures) {
                        tracing::error!(
                            instance = %self.name,
                            path = %path.display(),
                            failures = failures,
                            "Giving up on log tail"
                        );
                        return;
                    }
                    if cancel.wait(self.retry.delay) {
                        return;
                    }
                },
            }
        }
    }
}
