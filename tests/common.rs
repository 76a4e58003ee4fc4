#![allow(dead_code)]

//! Common test utilities for integration tests.
//!
//! Provides in-memory fakes for every external collaborator:
//! - `FakeOs` - process runner and process control over fake pids
//! - `RecordingRcon` - RCON client recording every send, with injectable failures
//! - `CountingHealth` - health monitor factory counting spawns and stops
//!
//! `TestHost` wires them into a real [`warden::Host`] whose log directory is a
//! temporary directory. Each fake process writes its own log file there and
//! keeps touching it while alive, like a real server would.
//!
//! # Example
//!
//! ```rust,ignore
//! let host = TestHost::new(vec![server("alpha", 7777)]);
//! let alpha = host.instance("alpha");
//! assert!(matches!(alpha.start(), Status::Starting { .. }));
//! ```

use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime};
use tempfile::TempDir;

use warden::collab::{HealthMonitor, HealthMonitorFactory, HealthParams, RconClient, RconEndpoint};
use warden::config::{HostConfig, HostSettings, RelaySettings, ServerConfig};
use warden::process::{KillSignal, Platform, ProcessControl, ProcessRunner, RunOptions};
use warden::{Error, Host, Instance, OutputSink};

/// How long tests wait for asynchronous effects before failing.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Poll `condition` until it holds or [`WAIT_TIMEOUT`] expires.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

/// Server configuration with a templated command line.
pub fn server(name: &str, game_port: u16) -> ServerConfig {
    ServerConfig {
        name: name.to_string(),
        game_port,
        query_port: game_port + 1000,
        rcon_port: game_port + 2000,
        rcon_password: format!("{name}-secret"),
        command: vec![
            "GameServer".to_string(),
            "-Port={game_port}".to_string(),
            "-QueryPort={query_port}".to_string(),
        ],
        ..Default::default()
    }
}

// =============================================================================
// Fake OS
// =============================================================================

/// Fake process runner and process control sharing one process table.
pub struct FakeOs {
    log_dir: PathBuf,
    next_pid: AtomicU32,
    processes: Mutex<HashMap<u32, PathBuf>>,
    exited: Condvar,
    spawned: AtomicUsize,
    commands: Mutex<Vec<Vec<String>>>,
    signals: Mutex<Vec<(u32, KillSignal)>>,
    fail_spawn: AtomicBool,
    ignore_terminate: AtomicBool,
    refuse_kill: AtomicBool,
}

impl FakeOs {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            next_pid: AtomicU32::new(40_000),
            processes: Mutex::new(HashMap::new()),
            exited: Condvar::new(),
            spawned: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            signals: Mutex::new(Vec::new()),
            fail_spawn: AtomicBool::new(false),
            ignore_terminate: AtomicBool::new(false),
            refuse_kill: AtomicBool::new(false),
        }
    }

    /// Number of processes spawned so far.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<Vec<String>> {
        self.commands.lock().clone()
    }

    pub fn signals(&self) -> Vec<(u32, KillSignal)> {
        self.signals.lock().clone()
    }

    pub fn live_pids(&self) -> Vec<u32> {
        self.processes.lock().keys().copied().collect()
    }

    /// Make every following spawn fail.
    pub fn fail_spawns(&self, fail: bool) {
        self.fail_spawn.store(fail, Ordering::SeqCst);
    }

    /// Make processes ignore `SIGTERM`.
    pub fn ignore_terminate(&self, ignore: bool) {
        self.ignore_terminate.store(ignore, Ordering::SeqCst);
    }

    /// Make `SIGKILL` fail as if the process belonged to another user.
    pub fn refuse_kill(&self, refuse: bool) {
        self.refuse_kill.store(refuse, Ordering::SeqCst);
    }

    /// Let `pid` exit on its own, without any signal.
    pub fn crash(&self, pid: u32) {
        self.processes.lock().remove(&pid);
        self.exited.notify_all();
    }

    /// Append `lines` to the log file of `pid`.
    pub fn write_log(&self, pid: u32, lines: &[&str]) {
        let path = self.processes.lock().get(&pid).cloned().unwrap();
        let mut file = OpenOptions::new().append(true).open(path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }
}

impl ProcessRunner for FakeOs {
    fn run(
        &self,
        command: &[String],
        sink: &OutputSink,
        options: &RunOptions,
        on_spawn: &mut dyn FnMut(u32),
    ) -> warden::Result<Option<i32>> {
        self.commands.lock().push(command.to_vec());
        if self.fail_spawn.load(Ordering::SeqCst) {
            return Err(Error::spawn(&options.name, "injected spawn failure"));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        let log = self.log_dir.join(format!("{}-{pid}.log", options.name));
        self.processes.lock().insert(pid, log.clone());
        self.spawned.fetch_add(1, Ordering::SeqCst);

        sink.push(options.formatter.format("Server booting"));
        on_spawn(pid);
        std::fs::write(&log, "LogInit: boot\n").map_err(|e| Error::io("writing fake log", e))?;

        let mut processes = self.processes.lock();
        while processes.contains_key(&pid) {
            self.exited.wait_for(&mut processes, Duration::from_millis(20));
            if let Ok(file) = OpenOptions::new().append(true).open(&log) {
                let _ = file.set_modified(SystemTime::now());
            }
        }
        Ok(Some(0))
    }
}

impl ProcessControl for FakeOs {
    fn is_alive(&self, pid: u32) -> bool {
        self.processes.lock().contains_key(&pid)
    }

    fn signal(&self, pid: u32, signal: KillSignal) -> anyhow::Result<()> {
        self.signals.lock().push((pid, signal));
        if signal == KillSignal::Terminate && self.ignore_terminate.load(Ordering::SeqCst) {
            return Ok(());
        }
        if signal == KillSignal::Kill && self.refuse_kill.load(Ordering::SeqCst) {
            anyhow::bail!("operation not permitted: {pid}");
        }
        if self.processes.lock().remove(&pid).is_none() {
            anyhow::bail!("no such process: {pid}");
        }
        self.exited.notify_all();
        Ok(())
    }
}

// =============================================================================
// Fake RCON
// =============================================================================

/// One recorded RCON send.
#[derive(Debug, Clone)]
pub struct RconSend {
    pub at: Instant,
    pub endpoint: RconEndpoint,
    pub password: String,
    pub command: String,
}

/// RCON client that records sends and fails the ones it is told to.
#[derive(Default)]
pub struct RecordingRcon {
    sends: Mutex<Vec<RconSend>>,
    fail_on: Mutex<HashSet<usize>>,
    deleted: Mutex<Vec<RconEndpoint>>,
}

impl RecordingRcon {
    /// Fail the `n`th send (1-based, counted across all instances).
    pub fn fail_send(&self, n: usize) {
        self.fail_on.lock().insert(n);
    }

    pub fn sends(&self) -> Vec<RconSend> {
        self.sends.lock().clone()
    }

    pub fn deleted(&self) -> Vec<RconEndpoint> {
        self.deleted.lock().clone()
    }
}

impl RconClient for RecordingRcon {
    fn send(
        &self,
        endpoint: &RconEndpoint,
        password: &str,
        command: &str,
        sink: &OutputSink,
    ) -> warden::Result<()> {
        let index = {
            let mut sends = self.sends.lock();
            sends.push(RconSend {
                at: Instant::now(),
                endpoint: endpoint.clone(),
                password: password.to_string(),
                command: command.to_string(),
            });
            sends.len()
        };
        if self.fail_on.lock().contains(&index) {
            return Err(Error::Rcon(format!("injected failure on send {index}")));
        }
        sink.push(format!("ok: {command}"));
        Ok(())
    }

    fn delete_connection(&self, endpoint: &RconEndpoint) {
        self.deleted.lock().push(endpoint.clone());
    }
}

// =============================================================================
// Fake health monitor
// =============================================================================

/// Health monitor factory counting spawned and stopped monitors.
#[derive(Default)]
pub struct CountingHealth {
    params: Mutex<Vec<HealthParams>>,
    stopped: Arc<AtomicUsize>,
}

impl CountingHealth {
    pub fn spawned(&self) -> usize {
        self.params.lock().len()
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn params(&self) -> Vec<HealthParams> {
        self.params.lock().clone()
    }
}

struct CountingMonitor {
    stopped: Arc<AtomicUsize>,
}

impl HealthMonitor for CountingMonitor {
    fn stop(&self) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

impl HealthMonitorFactory for CountingHealth {
    fn spawn(&self, params: HealthParams, _sink: OutputSink) -> Box<dyn HealthMonitor> {
        self.params.lock().push(params);
        Box::new(CountingMonitor {
            stopped: Arc::clone(&self.stopped),
        })
    }
}

// =============================================================================
// Test host
// =============================================================================

/// A real [`Host`] wired to fakes, with a temporary log directory.
pub struct TestHost {
    pub host: Host,
    pub os: Arc<FakeOs>,
    pub rcon: Arc<RecordingRcon>,
    pub health: Arc<CountingHealth>,
    pub dir: TempDir,
}

impl TestHost {
    pub fn new(servers: Vec<ServerConfig>) -> Self {
        Self::create(servers, RelaySettings::default(), 30)
    }

    pub fn with_relay(servers: Vec<ServerConfig>, relay: RelaySettings) -> Self {
        Self::create(servers, relay, 30)
    }

    pub fn with_stop_grace(servers: Vec<ServerConfig>, stop_grace_secs: u64) -> Self {
        Self::create(servers, RelaySettings::default(), stop_grace_secs)
    }

    fn create(servers: Vec<ServerConfig>, relay: RelaySettings, stop_grace_secs: u64) -> Self {
        let dir = TempDir::new().unwrap();
        let os = Arc::new(FakeOs::new(dir.path().to_path_buf()));
        let rcon = Arc::new(RecordingRcon::default());
        let health = Arc::new(CountingHealth::default());

        let config = HostConfig {
            host: HostSettings {
                log_dir: dir.path().to_path_buf(),
                watchdog_interval_ms: 20,
                start_poll_ms: 5,
                stop_grace_secs,
                ..Default::default()
            },
            relay: RelaySettings {
                tail_poll_ms: 10,
                rotation_poll_ms: 10,
                ..relay
            },
            servers,
        };

        let host = Host::builder(config)
            .runner(Arc::clone(&os) as Arc<dyn ProcessRunner>)
            .process_control(Arc::clone(&os) as Arc<dyn ProcessControl>)
            .rcon(Arc::clone(&rcon) as Arc<dyn RconClient>)
            .health(Arc::clone(&health) as Arc<dyn HealthMonitorFactory>)
            .platform(Platform::Linux)
            .build()
            .unwrap();

        Self {
            host,
            os,
            rcon,
            health,
            dir,
        }
    }

    pub fn instance(&self, name: &str) -> Arc<Instance> {
        Arc::clone(self.host.instance(name).unwrap())
    }
}

impl Drop for TestHost {
    fn drop(&mut self) {
        self.host.shutdown();
    }
}
