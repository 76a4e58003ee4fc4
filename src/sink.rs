//! Append-only output channel drained by external transports.
//!
//! Each instance owns two sinks: one for the server's console output and one
//! for relayed RCON feedback. A sink created as *persistent* keeps its buffer
//! across the resets performed when the server restarts. Releasing a sink is
//! terminal: its buffer is cleared and later appends are discarded.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared, cloneable handle to an output buffer.
#[derive(Clone, Debug, Default)]
pub struct OutputSink {
    inner: Arc<SinkInner>,
}

#[derive(Debug, Default)]
struct SinkInner {
    lines: Mutex<Vec<String>>,
    persistent: bool,
    released: AtomicBool,
}

impl OutputSink {
    /// Create an empty sink that is cleared on reset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty sink that survives resets.
    pub fn persistent() -> Self {
        Self {
            inner: Arc::new(SinkInner {
                persistent: true,
                ..SinkInner::default()
            }),
        }
    }

    /// Whether this sink survives resets.
    pub fn is_persistent(&self) -> bool {
        self.inner.persistent
    }

    /// Whether this sink has been released.
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Append one line. Dropped silently once the sink is released.
    pub fn push(&self, line: impl Into<String>) {
        if self.is_released() {
            return;
        }
        self.inner.lines.lock().push(line.into());
    }

    /// Take every buffered line, leaving the sink empty.
    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.inner.lines.lock())
    }

    /// Copy of the buffered lines without consuming them.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner.lines.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear the buffer ahead of a new run, unless the sink is persistent.
    pub fn reset(&self) {
        if !self.inner.persistent {
            self.inner.lines.lock().clear();
        }
    }

    /// Clear the buffer regardless of persistence and stop accepting lines.
    pub fn release(&self) {
        self.inner.released.store(true, Ordering::Release);
        self.inner.lines.lock().clear();
    }
}
