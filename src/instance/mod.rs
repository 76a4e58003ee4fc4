//! Lifecycle controller for one supervised server.
//!
//! An [`Instance`] owns the start/stop state machine of one game server, the
//! worker threads that keep it observable, and its two output sinks. It is
//! created once at host startup and lives until the host exits, unless it is
//! evicted from its port by another instance, which implodes it.
//!
//! ## Locking
//!
//! `start`, `stop` and the watchdog's liveness poll all run under the
//! registry's shared lock, so a worker removed by `stop` can never be seen
//! as "dead" and resurrected by a concurrent poll. The finer locks below are
//! always taken after the registry lock, in this order:
//!
//! - `workers`: the worker thread set
//! - `run`: per-run fields (active snapshot, pid, log file, generation)
//! - `lifecycle`: state and transition history
//!
//! ## Module Structure
//!
//! - [`state`]: Lifecycle state machine
//! - `owner`: Process-owner and log-relay thread bodies

mod owner;
mod state;

pub use state::{Lifecycle, LifecycleState, Transition};

use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crate::collab::{
    ConfigHandler, HealthMonitor, HealthMonitorFactory, HealthParams, RconClient, RconEndpoint,
};
use crate::config::{HostSettings, RelaySettings, ServerConfig};
use crate::constants;
use crate::error::{Error, Result};
use crate::process::{KillSignal, OutputFormatter, Platform, ProcessControl, ProcessRunner};
use crate::registry::{Registry, RegistryTable};
use crate::sink::OutputSink;
use crate::worker::{WorkerRole, WorkerSet};

/// Outcome of a lifecycle operation, rendered as a user-facing status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    AlreadyRunning,
    Starting { pid: u32 },
    StartFailed { reason: String },
    NotRunning,
    Stopping { pid: u32 },
    NoKnownPid,
    Signalled { pid: u32, signal: KillSignal },
    SignalFailed { pid: u32, reason: String },
    Imploded,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning => f.write_str("already running"),
            Self::Starting { pid } => write!(f, "starting (pid {pid})"),
            Self::StartFailed { reason } => write!(f, "start failed: {reason}"),
            Self::NotRunning => f.write_str("not running"),
            Self::Stopping { pid } => write!(f, "stopping (pid {pid})"),
            Self::NoKnownPid => f.write_str("no known PID"),
            Self::Signalled { pid, signal } => write!(f, "sent {signal} to pid {pid}"),
            Self::SignalFailed { pid, reason } => write!(f, "failed to signal pid {pid}: {reason}"),
            Self::Imploded => f.write_str("instance imploded"),
        }
    }
}

/// Collaborators and settings shared by every instance of a host.
pub struct Services {
    pub runner: Arc<dyn ProcessRunner>,
    pub rcon: Arc<dyn RconClient>,
    pub health: Arc<dyn HealthMonitorFactory>,
    pub config_handler: Arc<dyn ConfigHandler>,
    pub control: Arc<dyn ProcessControl>,
    pub settings: HostSettings,
    pub relay: RelaySettings,
    pub platform: Platform,
}

impl Services {
    pub const fn formatter(&self) -> OutputFormatter {
        OutputFormatter::for_platform(self.platform)
    }

    /// Signal used by `stop`. Graceful, except where graceful can hang.
    pub const fn stop_signal(&self) -> KillSignal {
        if matches!(self.platform, Platform::Windows) {
            KillSignal::Kill
        } else {
            KillSignal::Terminate
        }
    }
}

/// Ports and credentials frozen when a run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveConfig {
    pub snapshot: Arc<ServerConfig>,
    pub game_port: u16,
    pub query_port: u16,
    pub rcon_port: u16,
    pub rcon_password: String,
    pub endpoint: RconEndpoint,
}

impl ActiveConfig {
    pub fn freeze(config: &ServerConfig) -> Self {
        Self {
            snapshot: Arc::new(config.clone()),
            game_port: config.game_port,
            query_port: config.query_port,
            rcon_port: config.rcon_port,
            rcon_password: config.rcon_password.clone(),
            endpoint: RconEndpoint::new(config.host.clone(), config.rcon_port),
        }
    }

    fn health_params(&self, name: &str, settings: &HostSettings) -> HealthParams {
        HealthParams {
            host: self.endpoint.host.clone(),
            query_port: self.query_port,
            rcon_port: self.rcon_port,
            rcon_password: self.rcon_password.clone(),
            name: name.to_string(),
            poll_interval: settings.health_poll_interval(),
            initial_delay: settings.health_initial_delay(),
        }
    }
}

#[derive(Default)]
struct RunState {
    /// Game port this instance is keyed under in the registry.
    registry_port: u16,
    active: Option<ActiveConfig>,
    pid: Option<u32>,
    log_file: Option<PathBuf>,
    /// Newest log modification time seen before this run's process spawned.
    log_baseline: Option<SystemTime>,
    generation: u64,
    health: Option<Box<dyn HealthMonitor>>,
}

/// One supervised game server.
pub struct Instance {
    name: String,
    registry: Arc<Registry>,
    services: Arc<Services>,
    config: RwLock<ServerConfig>,
    run: Mutex<RunState>,
    workers: Mutex<WorkerSet>,
    lifecycle: Mutex<Lifecycle>,
    output: OutputSink,
    rcon_output: OutputSink,
    imploded: AtomicBool,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pid", &self.pid())
            .finish_non_exhaustive()
    }
}

impl Instance {
    /// Create an instance from its configuration. It still has to be
    /// registered with [`Registry::register`] before it can start.
    pub fn new(config: ServerConfig, services: Arc<Services>, registry: Arc<Registry>) -> Arc<Self> {
        let output = if config.persistent_output {
            OutputSink::persistent()
        } else {
            OutputSink::new()
        };
        Arc::new(Self {
            name: config.name.clone(),
            registry,
            services,
            run: Mutex::new(RunState {
                registry_port: config.game_port,
                ..RunState::default()
            }),
            config: RwLock::new(config),
            workers: Mutex::new(WorkerSet::new()),
            lifecycle: Mutex::new(Lifecycle::default()),
            output,
            rcon_output: OutputSink::new(),
            imploded: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Console output of the server process.
    pub fn output(&self) -> &OutputSink {
        &self.output
    }

    /// RCON responses and relayed RCON log blocks.
    pub fn rcon_output(&self) -> &OutputSink {
        &self.rcon_output
    }

    /// Latest configuration, which takes effect on the next start.
    pub fn config(&self) -> ServerConfig {
        self.config.read().clone()
    }

    /// Replace the configuration. The running process keeps its active
    /// snapshot until it is restarted.
    pub fn update_config(&self, mut config: ServerConfig) {
        config.name.clone_from(&self.name);
        *self.config.write() = config;
    }

    /// Snapshot frozen by the current or most recent start.
    pub fn active(&self) -> Option<ActiveConfig> {
        self.run.lock().active.clone()
    }

    pub fn registry_port(&self) -> u16 {
        self.run.lock().registry_port
    }

    pub(crate) fn set_registry_port(&self, port: u16) {
        self.run.lock().registry_port = port;
    }

    pub fn pid(&self) -> Option<u32> {
        self.run.lock().pid
    }

    /// Log file claimed by the relay for the current run.
    pub fn log_file(&self) -> Option<PathBuf> {
        self.run.lock().log_file.clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.lock().state()
    }

    pub fn transitions(&self) -> Vec<Transition> {
        self.lifecycle.lock().history()
    }

    pub fn is_imploded(&self) -> bool {
        self.imploded.load(Ordering::Acquire)
    }

    pub fn worker_roles(&self) -> Vec<WorkerRole> {
        self.workers.lock().roles()
    }

    pub(crate) fn workers(&self) -> &Mutex<WorkerSet> {
        &self.workers
    }

    /// Running means the process is alive and its owner thread is too.
    pub fn is_running(&self) -> bool {
        let pid_alive = self.pid().is_some_and(|pid| self.services.control.is_alive(pid));
        pid_alive && self.workers.lock().is_alive(WorkerRole::ProcessOwner)
    }

    fn transition(&self, next: LifecycleState) {
        self.lifecycle.lock().transition(&self.name, next);
    }

    /// Start the server and block until its pid and log file are known.
    pub fn start(self: &Arc<Self>) -> Status {
        let mut table = self.registry.lock();
        self.start_locked(&mut table)
    }

    /// Body of [`Instance::start`], for callers already holding the registry lock.
    pub fn start_locked(self: &Arc<Self>, table: &mut RegistryTable) -> Status {
        if self.is_imploded() {
            return Status::Imploded;
        }
        if self.is_running() {
            tracing::info!(instance = %self.name, "Start requested but already running");
            return Status::AlreadyRunning;
        }

        self.await_teardown();

        let config = self.config();
        let previous_port = self.registry_port();
        if config.game_port != previous_port {
            table.migrate(self, previous_port, config.game_port);
        }

        let active = ActiveConfig::freeze(&config);
        tracing::info!(
            instance = %self.name,
            game_port = active.game_port,
            query_port = active.query_port,
            rcon_port = active.rcon_port,
            "Starting server"
        );
        self.run.lock().active = Some(active);

        if let Err(e) = self.launch_process_owner() {
            tracing::error!(instance = %self.name, error = %e, "Could not launch process owner");
            return Status::StartFailed {
                reason: e.to_string(),
            };
        }

        self.await_ready()
    }

    /// Spawn a new process-owner thread for the current active snapshot and
    /// register it in the worker set.
    fn launch_process_owner(self: &Arc<Self>) -> Result<()> {
        let worker = self.spawn_process_owner()?;
        if let Some(stale) = self.workers.lock().insert(worker) {
            stale.terminate();
        }
        Ok(())
    }

    /// Block until the current run is ready or has failed.
    fn await_ready(&self) -> Status {
        let poll = self.services.settings.start_poll();
        loop {
            match self.state() {
                LifecycleState::Running => {
                    if let Some(pid) = self.pid() {
                        return Status::Starting { pid };
                    }
                },
                LifecycleState::Stopping | LifecycleState::Stopped => {
                    return Status::StartFailed {
                        reason: "server exited before it was ready".to_string(),
                    };
                },
                LifecycleState::Starting => {},
            }

            if !self.workers.lock().is_alive(WorkerRole::ProcessOwner) {
                return Status::StartFailed {
                    reason: "process owner ended before the server was ready".to_string(),
                };
            }
            thread::sleep(poll);
        }
    }

    /// Wait for a previous run that is still tearing down. Escalates to a
    /// forceful kill if the process ignores the stop signal for too long.
    fn await_teardown(&self) {
        let poll = self.services.settings.start_poll();
        let grace = self.services.settings.stop_grace();
        let started = Instant::now();
        let mut escalated = false;

        loop {
            let state = self.state();
            let owner_alive = self.workers.lock().is_alive(WorkerRole::ProcessOwner);
            if state == LifecycleState::Stopped
                || (state != LifecycleState::Stopping && !owner_alive)
            {
                break;
            }
            if !escalated && started.elapsed() >= grace {
                escalated = true;
                if let Some(pid) = self.pid() {
                    tracing::warn!(instance = %self.name, pid = pid, "Server ignored stop signal, killing");
                    if let Err(e) = self.services.control.signal(pid, KillSignal::Kill) {
                        tracing::warn!(instance = %self.name, pid = pid, error = %e, "Failed to kill stopping server");
                    }
                }
            }
            thread::sleep(poll);
        }

        // The owner of the previous run died without tearing down.
        if self.state() != LifecycleState::Stopped {
            tracing::warn!(instance = %self.name, state = %self.state(), "Recovering stale lifecycle state");
            self.transition(LifecycleState::Stopping);
            self.transition(LifecycleState::Stopped);
        }
    }

    /// Stop the server.
    ///
    /// Stops the health monitor, removes the process owner from the worker
    /// set and signals the process. The owner thread itself is left to
    /// observe the exit and run its own teardown.
    pub fn stop(&self) -> Status {
        let _table = self.registry.lock();
        self.stop_locked()
    }

    /// Body of [`Instance::stop`], for callers already holding the registry lock.
    pub fn stop_locked(&self) -> Status {
        if !self.is_running() {
            return Status::NotRunning;
        }
        let Some(pid) = self.pid() else {
            return Status::NotRunning;
        };

        self.transition(LifecycleState::Stopping);

        let health = self.run.lock().health.take();
        if let Some(health) = health {
            health.stop();
        }

        // Dropping the handle detaches the thread; it keeps running until
        // the process exits.
        drop(self.workers.lock().remove(WorkerRole::ProcessOwner));

        let signal = self.services.stop_signal();
        if let Err(e) = self.services.control.signal(pid, signal) {
            tracing::warn!(instance = %self.name, pid = pid, error = %e, "Failed to signal server");
        }

        tracing::info!(instance = %self.name, pid = pid, signal = %signal, "Stopping server");
        Status::Stopping { pid }
    }

    /// Stop, then start once the previous run has torn down.
    pub fn restart(self: &Arc<Self>) -> Status {
        let stopped = self.stop();
        tracing::debug!(instance = %self.name, status = %stopped, "Restart: stop finished");
        self.start()
    }

    /// Deliver `signal` (forceful by default) to the server process.
    pub fn kill(&self, signal: Option<KillSignal>) -> Status {
        let signal = signal.unwrap_or_default();
        let Some(pid) = self.pid() else {
            return Status::NoKnownPid;
        };
        if !self.services.control.is_alive(pid) {
            return Status::NotRunning;
        }

        match self.services.control.signal(pid, signal) {
            Ok(()) => {
                tracing::info!(instance = %self.name, pid = pid, signal = %signal, "Killed server");
                Status::Signalled { pid, signal }
            },
            Err(e) => {
                tracing::warn!(instance = %self.name, pid = pid, error = %e, "Kill failed");
                Status::SignalFailed {
                    pid,
                    reason: e.to_string(),
                }
            },
        }
    }

    /// Send one RCON command; the response lands in the RCON sink.
    pub fn rcon(&self, command: &str) -> Result<()> {
        let active = self
            .active()
            .ok_or_else(|| Error::Rcon(format!("'{}' has never been started", self.name)))?;
        self.services.rcon.send(
            &active.endpoint,
            &active.rcon_password,
            command,
            &self.rcon_output,
        )
    }

    /// Send `message` over RCON `repetitions` times, `interval` apart.
    ///
    /// Best effort: a failed send is logged and the remaining repetitions
    /// still go out. Returns the number of successful sends.
    pub fn broadcast(&self, message: &str, repetitions: u32, interval: Duration) -> u32 {
        let mut delivered = 0;
        for attempt in 0..repetitions {
            if attempt > 0 {
                thread::sleep(interval);
            }
            match self.rcon(message) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(
                        instance = %self.name,
                        attempt = attempt + 1,
                        error = %e,
                        "Broadcast send failed"
                    );
                },
            }
        }
        delivered
    }

    /// [`Instance::broadcast`] with the default repetition count and interval,
    /// used to warn players ahead of an update.
    pub fn announce(&self, message: &str) -> u32 {
        self.broadcast(
            message,
            constants::BROADCAST_REPETITIONS,
            Duration::from_millis(constants::BROADCAST_INTERVAL_MS),
        )
    }

    /// Tear the instance down for good to free its port.
    ///
    /// Sinks are released, every worker is cancelled and the process is
    /// killed. An imploded instance refuses to start again.
    pub fn implode(&self) {
        if self.imploded.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(instance = %self.name, "Imploding instance");

        self.output.release();
        self.rcon_output.release();

        let (health, pid) = {
            let mut run = self.run.lock();
            (run.health.take(), run.pid)
        };
        if let Some(health) = health {
            health.stop();
        }

        self.workers.lock().terminate_all();

        if let Some(pid) = pid.filter(|pid| self.services.control.is_alive(*pid)) {
            if let Err(e) = self.services.control.signal(pid, KillSignal::Kill) {
                tracing::warn!(instance = %self.name, pid = pid, error = %e, "Failed to kill imploded server");
            }
        }

        self.registry.claims().release(&self.name);
    }
}
