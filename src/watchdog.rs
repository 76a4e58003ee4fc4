//! Per-instance watchdog.
//!
//! Polls the instance's worker set at a fixed interval and replaces every
//! worker whose thread has finished. Each role is restarted through its own
//! function from a [`RestartTable`]. A poll runs under the registry lock, the
//! same lock `stop` holds while it removes the process owner, so a worker
//! that was removed on purpose is never seen as dead.
//!
//! A failing watchdog is fatal for its instance: the error is logged and
//! returned from the watchdog thread, and nothing heals the instance after
//! that.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::instance::Instance;
use crate::worker::{CancelToken, Worker, WorkerRole};

/// Starts a fresh worker for one role.
pub type Restarter = fn(&Arc<Instance>) -> Result<Worker>;

/// Role-to-restarter mapping, fixed at construction.
#[derive(Clone)]
pub struct RestartTable {
    restarters: BTreeMap<WorkerRole, Restarter>,
}

impl RestartTable {
    /// Restarters of the roles every instance runs.
    pub fn standard() -> Self {
        Self::empty()
            .with(WorkerRole::ProcessOwner, Instance::restart_process_owner)
            .with(WorkerRole::LogRelay, Instance::spawn_log_relay)
    }

    pub fn empty() -> Self {
        Self {
            restarters: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, role: WorkerRole, restarter: Restarter) -> Self {
        self.restarters.insert(role, restarter);
        self
    }

    pub fn get(&self, role: WorkerRole) -> Option<Restarter> {
        self.restarters.get(&role).copied()
    }
}

impl Default for RestartTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Watchdog for one instance.
pub struct Watchdog {
    instance: Arc<Instance>,
    table: RestartTable,
    interval: Duration,
}

impl Watchdog {
    pub fn new(instance: Arc<Instance>, interval: Duration) -> Self {
        Self::with_table(instance, RestartTable::standard(), interval)
    }

    pub const fn with_table(instance: Arc<Instance>, table: RestartTable, interval: Duration) -> Self {
        Self {
            instance,
            table,
            interval,
        }
    }

    /// Run one liveness poll. Returns the roles that were found dead and
    /// replaced.
    pub fn poll_once(&self) -> Result<Vec<WorkerRole>> {
        let name = self.instance.name();
        let _table = self.instance.registry().lock();
        let mut workers = self.instance.workers().lock();

        let dead = workers.dead_roles();
        for &role in &dead {
            tracing::warn!(instance = %name, role = %role, "Worker thread died, restarting");
            let restart = self
                .table
                .get(role)
                .ok_or_else(|| Error::watchdog(name, format!("no restarter for {role}")))?;
            let worker = restart(&self.instance)?;
            workers.insert(worker);
        }
        Ok(dead)
    }

    /// Poll until cancelled or the instance implodes.
    pub fn run(&self, cancel: &CancelToken) -> Result<()> {
        let name = self.instance.name();
        tracing::info!(instance = %name, interval = ?self.interval, "Watchdog started");

        while !cancel.wait(self.interval) {
            if self.instance.is_imploded() {
                tracing::info!(instance = %name, "Instance imploded, watchdog exiting");
                return Ok(());
            }
            if let Err(e) = self.poll_once() {
                tracing::error!(
                    instance = %name,
                    error = %e,
                    "Watchdog failed, instance is no longer supervised"
                );
                return Err(e);
            }
        }

        tracing::info!(instance = %name, "Watchdog stopped");
        Ok(())
    }

    /// Run the watchdog on its own thread.
    pub fn spawn(self) -> Result<WatchdogHandle> {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let name = self.instance.name().to_string();
        let span = crate::logging::worker_span(&name, "watchdog");
        let handle = thread::Builder::new()
            .name(format!("{name}-watchdog"))
            .spawn(move || span.in_scope(|| self.run(&token)))
            .map_err(|e| Error::io(format!("spawning watchdog for '{name}'"), e))?;
        Ok(WatchdogHandle {
            name,
            handle,
            cancel,
        })
    }
}

/// Handle to a running watchdog thread.
pub struct WatchdogHandle {
    name: String,
    handle: JoinHandle<Result<()>>,
    cancel: CancelToken,
}

impl WatchdogHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Ask the watchdog to exit after its current poll.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the watchdog to exit and return its outcome.
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .unwrap_or_else(|_| Err(Error::watchdog(&self.name, "watchdog thread panicked")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::{
        HealthMonitor, HealthMonitorFactory, HealthParams, RconClient, RconEndpoint,
        TemplateConfigHandler,
    };
    use crate::config::{HostSettings, RelaySettings, ServerConfig};
    use crate::instance::Services;
    use crate::process::{CommandRunner, OsProcessControl, Platform};
    use crate::registry::Registry;
    use crate::sink::OutputSink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NoRcon;

    impl RconClient for NoRcon {
        fn send(&self, _: &RconEndpoint, _: &str, _: &str, _: &OutputSink) -> Result<()> {
            Ok(())
        }

        fn delete_connection(&self, _: &RconEndpoint) {}
    }

    struct NoHealth;

    impl HealthMonitor for NoHealth {
        fn stop(&self) {}
    }

    impl HealthMonitorFactory for NoHealth {
        fn spawn(&self, _: HealthParams, _: OutputSink) -> Box<dyn HealthMonitor> {
            Box::new(Self)
        }
    }

    fn instance() -> Arc<Instance> {
        let services = Arc::new(Services {
            runner: Arc::new(CommandRunner),
            rcon: Arc::new(NoRcon),
            health: Arc::new(NoHealth),
            config_handler: Arc::new(TemplateConfigHandler),
            control: Arc::new(OsProcessControl),
            settings: HostSettings::default(),
            relay: RelaySettings::default(),
            platform: Platform::current(),
        });
        let registry = Registry::new();
        let config = ServerConfig {
            name: "alpha".into(),
            ..Default::default()
        };
        let instance = Instance::new(config, services, Arc::clone(&registry));
        registry.register(&instance);
        instance
    }

    fn parked(role: WorkerRole) -> Worker {
        Worker::spawn(role, "alpha", |cancel| {
            while !cancel.wait(Duration::from_secs(5)) {}
        })
        .unwrap()
    }

    fn finished(role: WorkerRole) -> Worker {
        let worker = Worker::spawn(role, "alpha", |_| {}).unwrap();
        while worker.is_alive() {
            thread::sleep(Duration::from_millis(5));
        }
        worker
    }

    static OWNER_RESTARTS: AtomicUsize = AtomicUsize::new(0);
    static RELAY_RESTARTS: AtomicUsize = AtomicUsize::new(0);

    fn restart_owner(_: &Arc<Instance>) -> Result<Worker> {
        OWNER_RESTARTS.fetch_add(1, Ordering::SeqCst);
        Ok(parked(WorkerRole::ProcessOwner))
    }

    fn restart_relay(_: &Arc<Instance>) -> Result<Worker> {
        RELAY_RESTARTS.fetch_add(1, Ordering::SeqCst);
        Ok(parked(WorkerRole::LogRelay))
    }

    fn counting_table() -> RestartTable {
        RestartTable::empty()
            .with(WorkerRole::ProcessOwner, restart_owner)
            .with(WorkerRole::LogRelay, restart_relay)
    }

    #[test]
    fn test_standard_table_covers_every_role() {
        let table = RestartTable::standard();
        assert!(table.get(WorkerRole::ProcessOwner).is_some());
        assert!(table.get(WorkerRole::LogRelay).is_some());
    }

    #[test]
    fn test_poll_replaces_exactly_the_dead_worker() {
        let instance = instance();
        {
            let mut workers = instance.workers().lock();
            workers.insert(parked(WorkerRole::ProcessOwner));
            workers.insert(finished(WorkerRole::LogRelay));
        }

        let owner_before = OWNER_RESTARTS.load(Ordering::SeqCst);
        let relay_before = RELAY_RESTARTS.load(Ordering::SeqCst);
        let watchdog = Watchdog::with_table(Arc::clone(&instance), counting_table(), Duration::from_millis(10));

        assert_eq!(watchdog.poll_once().unwrap(), vec![WorkerRole::LogRelay]);
        assert_eq!(RELAY_RESTARTS.load(Ordering::SeqCst), relay_before + 1);
        assert_eq!(OWNER_RESTARTS.load(Ordering::SeqCst), owner_before);

        let workers = instance.workers().lock();
        assert!(workers.is_alive(WorkerRole::LogRelay));
        assert!(workers.is_alive(WorkerRole::ProcessOwner));
        drop(workers);

        assert!(watchdog.poll_once().unwrap().is_empty());
        instance.workers().lock().terminate_all();
        instance.registry().clear();
    }

    #[test]
    fn test_missing_restarter_is_fatal() {
        let instance = instance();
        instance.workers().lock().insert(finished(WorkerRole::LogRelay));

        let watchdog = Watchdog::with_table(Arc::clone(&instance), RestartTable::empty(), Duration::from_millis(5));
        let handle = watchdog.spawn().unwrap();

        let err = handle.join().unwrap_err();
        assert!(matches!(err, Error::Watchdog { .. }));
        assert!(err.to_string().contains("log-relay"));
        instance.registry().clear();
    }

    #[test]
    fn test_stopped_watchdog_exits_cleanly() {
        let instance = instance();
        let handle = Watchdog::new(Arc::clone(&instance), Duration::from_millis(5))
            .spawn()
            .unwrap();
        assert!(handle.is_alive());
        handle.stop();
        assert!(handle.join().is_ok());
        instance.registry().clear();
    }
}
