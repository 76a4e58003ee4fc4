//! Named worker threads and their cancellation.
//!
//! Every long-running activity of an instance runs on its own OS thread,
//! registered in a [`WorkerSet`] under its [`WorkerRole`]. Threads cannot be
//! killed from outside, so "terminating" a worker means tripping its
//! [`CancelToken`]; every blocking loop in the crate waits on the token
//! instead of sleeping, so a cancelled worker unwinds within one poll.

use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Role of a worker thread within one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum WorkerRole {
    /// Owns the server process for the duration of one run.
    ProcessOwner,
    /// Tails the server log and relays RCON feedback.
    LogRelay,
}

impl WorkerRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ProcessOwner => "process-owner",
            Self::LogRelay => "log-relay",
        }
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cooperative cancellation flag with a wakeable wait.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, signal) = &*self.inner;
        *flag.lock() = true;
        signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleep for `timeout` or until cancelled. Returns `true` if cancelled.
    pub fn wait(&self, timeout: Duration) -> bool {
        let (flag, signal) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = flag.lock();
        while !*cancelled {
            if signal.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

/// Handle to one running worker thread.
#[derive(Debug)]
pub struct Worker {
    role: WorkerRole,
    handle: JoinHandle<()>,
    cancel: CancelToken,
}

impl Worker {
    /// Spawn a named thread running `body` with a fresh cancel token.
    pub fn spawn<F>(role: WorkerRole, instance: &str, body: F) -> Result<Self>
    where
        F: FnOnce(CancelToken) + Send + 'static,
    {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let span = crate::logging::worker_span(instance, role.as_str());
        let handle = thread::Builder::new()
            .name(format!("{instance}-{role}"))
            .spawn(move || span.in_scope(|| body(token)))
            .map_err(|e| Error::thread_spawn(role, e))?;
        Ok(Self {
            role,
            handle,
            cancel,
        })
    }

    pub const fn role(&self) -> WorkerRole {
        self.role
    }

    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Cancel the worker and detach from it without waiting.
    pub fn terminate(self) {
        self.cancel.cancel();
    }

    /// Cancel the worker and wait up to `timeout` for it to finish.
    /// Returns `true` if the thread finished in time.
    pub fn terminate_and_wait(self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let deadline = Instant::now() + timeout;
        while !self.handle.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(5));
        }
        let _ = self.handle.join();
        true
    }
}

/// Role-keyed set of an instance's worker threads.
#[derive(Debug, Default)]
pub struct WorkerSet {
    workers: BTreeMap<WorkerRole, Worker>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a worker, returning the one it replaces.
    pub fn insert(&mut self, worker: Worker) -> Option<Worker> {
        self.workers.insert(worker.role(), worker)
    }

    pub fn remove(&mut self, role: WorkerRole) -> Option<Worker> {
        self.workers.remove(&role)
    }

    pub fn get(&self, role: WorkerRole) -> Option<&Worker> {
        self.workers.get(&role)
    }

    pub fn is_alive(&self, role: WorkerRole) -> bool {
        self.workers.get(&role).is_some_and(Worker::is_alive)
    }

    /// Roles whose thread has finished while still registered.
    pub fn dead_roles(&self) -> Vec<WorkerRole> {
        self.workers
            .values()
            .filter(|worker| !worker.is_alive())
            .map(Worker::role)
            .collect()
    }

    pub fn roles(&self) -> Vec<WorkerRole> {
        self.workers.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Remove every worker, cancelling each one.
    pub fn terminate_all(&mut self) {
        for (_, worker) in std::mem::take(&mut self.workers) {
            worker.terminate();
        }
    }
}
