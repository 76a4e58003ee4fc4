//! Finding the log file an instance is writing to.
//!
//! Several servers write into the same log directory, and the game picks the
//! file names. An instance therefore identifies its file by elimination: it
//! ignores backups and files already claimed by a sibling, remembers the
//! newest modification time at relay start, and claims the first remaining
//! file whose modification time moves past that baseline.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use crate::config::HostSettings;
use crate::worker::CancelToken;

/// Log files claimed by instances, shared host-wide.
#[derive(Debug, Default)]
pub struct LogClaims {
    claims: Mutex<HashMap<PathBuf, String>>,
}

impl LogClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Paths claimed by any instance other than `name`.
    pub fn claimed_by_others(&self, name: &str) -> HashSet<PathBuf> {
        self.claims
            .lock()
            .iter()
            .filter(|(_, owner)| owner.as_str() != name)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Claim `path` for `name`, dropping any earlier claim held by `name`.
    /// Fails if another instance already holds `path`.
    pub fn try_claim(&self, name: &str, path: &Path) -> bool {
        let mut claims = self.claims.lock();
        if claims.get(path).is_some_and(|owner| owner != name) {
            return false;
        }
        claims.retain(|_, owner| owner != name);
        claims.insert(path.to_path_buf(), name.to_string());
        true
    }

    pub fn release(&self, name: &str) {
        self.claims.lock().retain(|_, owner| owner != name);
    }

    pub fn owner_of(&self, path: &Path) -> Option<String> {
        self.claims.lock().get(path).cloned()
    }
}

/// Candidate enumeration over one log directory.
#[derive(Debug, Clone)]
pub struct LogDiscovery {
    dir: PathBuf,
    backup_marker: String,
    fallback_name: String,
}

impl LogDiscovery {
    pub fn new(
        dir: impl Into<PathBuf>,
        backup_marker: impl Into<String>,
        fallback_name: impl Into<String>,
    ) -> Self {
        Self {
            dir: dir.into(),
            backup_marker: backup_marker.into(),
            fallback_name: fallback_name.into(),
        }
    }

    pub fn from_settings(settings: &HostSettings) -> Self {
        Self::new(
            settings.log_dir.clone(),
            settings.backup_marker.clone(),
            settings.fallback_log_name.clone(),
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path used when the directory holds no candidate.
    pub fn fallback_path(&self) -> PathBuf {
        self.dir.join(&self.fallback_name)
    }

    /// Log files that are neither backups nor in `excluded`, with their mtime.
    pub fn candidates(&self, excluded: &HashSet<PathBuf>) -> Vec<(PathBuf, SystemTime)> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "log"))
            .filter(|path| !self.is_backup(path))
            .filter(|path| !excluded.contains(path))
            .filter_map(|path| {
                let metadata = fs::metadata(&path).ok()?;
                if !metadata.is_file() {
                    return None;
                }
                Some((path, metadata.modified().ok()?))
            })
            .collect()
    }

    /// Newest candidate, or the fallback file with its mtime once it exists.
    fn latest(&self, excluded: &HashSet<PathBuf>) -> Option<(PathBuf, SystemTime)> {
        newest(self.candidates(excluded)).or_else(|| {
            let path = self.fallback_path();
            if excluded.contains(&path) {
                return None;
            }
            let modified = fs::metadata(&path).ok()?.modified().ok()?;
            Some((path, modified))
        })
    }

    /// Newest modification time across candidates, or of the fallback file
    /// when there are none.
    pub fn baseline(&self, excluded: &HashSet<PathBuf>) -> Option<SystemTime> {
        self.latest(excluded).map(|(_, modified)| modified)
    }

    /// Poll until the newest candidate (or the fallback file) is modified
    /// after `baseline`, then claim it.
    ///
    /// Returns `None` if cancelled first.
    pub fn await_fresh(
        &self,
        name: &str,
        claims: &LogClaims,
        baseline: Option<SystemTime>,
        poll: Duration,
        cancel: &CancelToken,
    ) -> Option<PathBuf> {
        loop {
            let fresh = self
                .latest(&claims.claimed_by_others(name))
                .filter(|(_, modified)| baseline.is_none_or(|base| *modified > base));

            if let Some((path, _)) = fresh {
                if claims.try_claim(name, &path) {
                    tracing::info!(instance = %name, path = %path.display(), "Claimed log file");
                    return Some(path);
                }
                tracing::debug!(
                    instance = %name,
                    path = %path.display(),
                    "Log file claimed by a sibling, waiting"
                );
            }

            if cancel.wait(poll) {
                return None;
            }
        }
    }

    fn is_backup(&self, path: &Path) -> bool {
        !self.backup_marker.is_empty() && path.to_string_lossy().contains(&self.backup_marker)
    }
}

fn newest(
    candidates: impl IntoIterator<Item = (PathBuf, SystemTime)>,
) -> Option<(PathBuf, SystemTime)> {
    candidates.into_iter().max_by_key(|(_, modified)| *modified)
}
