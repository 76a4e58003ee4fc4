//! Worker thread bodies of an instance.
//!
//! The process owner lives exactly as long as one server process. Every run
//! gets a new generation number; callbacks and teardown from a superseded
//! run compare their generation first and leave the newer run alone.

use std::path::PathBuf;
use std::sync::Arc;

use super::{ActiveConfig, Instance, LifecycleState};
use crate::error::{Error, Result};
use crate::process::RunOptions;
use crate::relay::{LogDiscovery, LogRelay, RconBlockClassifier};
use crate::worker::{Worker, WorkerRole};

impl Instance {
    /// Start a new run from the active snapshot on a fresh process-owner
    /// thread. The caller registers the returned worker.
    pub(crate) fn spawn_process_owner(self: &Arc<Self>) -> Result<Worker> {
        // Taken before the process exists, so its fresh log always lands after it.
        let baseline = LogDiscovery::from_settings(&self.services.settings)
            .baseline(&self.registry.claims().claimed_by_others(&self.name));

        let (active, generation) = {
            let mut run = self.run.lock();
            let active = run
                .active
                .clone()
                .ok_or_else(|| Error::spawn(&self.name, "no active configuration"))?;
            run.generation += 1;
            run.pid = None;
            run.log_file = None;
            run.log_baseline = baseline;
            (active, run.generation)
        };

        self.transition(LifecycleState::Starting);

        let instance = Arc::clone(self);
        Worker::spawn(WorkerRole::ProcessOwner, &self.name, move |_cancel| {
            instance.own_process(&active, generation);
        })
        .inspect_err(|_| self.transition(LifecycleState::Stopped))
    }

    /// Relaunch the server with the snapshot of the previous run.
    ///
    /// Used by the watchdog after the process owner died on its own; the
    /// configured ports are not re-read, so no migration can happen here.
    pub(crate) fn restart_process_owner(self: &Arc<Self>) -> Result<Worker> {
        if self.is_imploded() {
            return Err(Error::Imploded {
                name: self.name.clone(),
            });
        }
        tracing::info!(instance = %self.name, "Relaunching server with its previous snapshot");
        self.spawn_process_owner()
    }

    /// Spawn a log relay bound to the current run.
    ///
    /// A replacement relay reuses the run's baseline and so reclaims the
    /// file the server is already writing.
    pub(crate) fn spawn_log_relay(self: &Arc<Self>) -> Result<Worker> {
        let (generation, baseline) = {
            let run = self.run.lock();
            (run.generation, run.log_baseline)
        };
        let settings = &self.services.relay;
        let relay = LogRelay {
            name: self.name.clone(),
            discovery: LogDiscovery::from_settings(&self.services.settings),
            baseline,
            claims: Arc::clone(self.registry.claims()),
            classifier: Box::new(RconBlockClassifier::from_settings(settings)?),
            sink: self.rcon_output.clone(),
            tail_poll: settings.tail_poll(),
            rotation_poll: settings.rotation_poll(),
            retry: settings.retry_policy(),
        };

        let instance = Arc::clone(self);
        Worker::spawn(WorkerRole::LogRelay, &self.name, move |cancel| {
            relay.run(&cancel, |path| instance.on_log_claimed(generation, path));
        })
    }

    fn own_process(self: &Arc<Self>, active: &ActiveConfig, generation: u64) {
        self.output.reset();
        self.rcon_output.reset();

        let config = active.snapshot.as_ref();
        let handler = &self.services.config_handler;
        if let Err(e) = handler.apply_server_config_files(config, &self.name) {
            tracing::warn!(instance = %self.name, error = %e, "Failed to apply server config files");
        }
        let args = handler.server_arguments(config);
        let options = RunOptions {
            name: self.name.clone(),
            working_dir: config.working_dir.clone(),
            formatter: self.services.formatter(),
        };

        let mut on_spawn = |pid| self.on_spawn(active, generation, pid);
        match self
            .services
            .runner
            .run(&args, &self.output, &options, &mut on_spawn)
        {
            Ok(code) => {
                tracing::info!(instance = %self.name, exit_code = ?code, "Server process exited");
            },
            Err(e) => {
                tracing::error!(instance = %self.name, error = %e, "Server process failed");
            },
        }

        self.teardown(active, generation);
    }

    fn on_spawn(self: &Arc<Self>, active: &ActiveConfig, generation: u64, pid: u32) {
        {
            let mut run = self.run.lock();
            if run.generation != generation {
                return;
            }
            run.pid = Some(pid);
        }

        let params = active.health_params(&self.name, &self.services.settings);
        let monitor = self.services.health.spawn(params, self.rcon_output.clone());
        let replaced = {
            let mut run = self.run.lock();
            if run.generation == generation {
                run.health.replace(monitor)
            } else {
                Some(monitor)
            }
        };
        if let Some(stale) = replaced {
            stale.stop();
        }

        // Held across the spawn so nobody sees the run ready without its relay.
        let mut workers = self.workers.lock();
        match self.spawn_log_relay() {
            Ok(worker) => {
                if let Some(stale) = workers.insert(worker) {
                    stale.terminate();
                }
            },
            Err(e) => {
                tracing::error!(instance = %self.name, error = %e, "Could not start log relay");
            },
        }
        drop(workers);

        self.mark_ready_if_complete(generation);
    }

    fn on_log_claimed(&self, generation: u64, path: PathBuf) {
        {
            let mut run = self.run.lock();
            if run.generation != generation {
                return;
            }
            run.log_file = Some(path);
        }
        self.mark_ready_if_complete(generation);
    }

    /// Enter `Running` once both the pid and the log file of the run are known.
    fn mark_ready_if_complete(&self, generation: u64) {
        let ready = {
            let run = self.run.lock();
            run.generation == generation && run.pid.is_some() && run.log_file.is_some()
        };
        if !ready {
            return;
        }

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state() == LifecycleState::Starting {
            lifecycle.transition(&self.name, LifecycleState::Running);
            tracing::info!(instance = %self.name, "Server is running");
        }
    }

    fn teardown(&self, active: &ActiveConfig, generation: u64) {
        if self.run.lock().generation != generation {
            tracing::debug!(instance = %self.name, generation = generation, "Superseded run ended");
            return;
        }

        self.transition(LifecycleState::Stopping);

        let health = self.run.lock().health.take();
        if let Some(health) = health {
            health.stop();
        }

        // Removed under the workers lock so the watchdog cannot respawn it.
        let relay = self.workers.lock().remove(WorkerRole::LogRelay);
        if let Some(relay) = relay {
            relay.terminate();
        }

        {
            let mut run = self.run.lock();
            run.pid = None;
            run.log_file = None;
        }
        self.registry.claims().release(&self.name);
        self.services.rcon.delete_connection(&active.endpoint);

        if let Err(e) = self.services.config_handler.apply_server_bans() {
            tracing::warn!(instance = %self.name, error = %e, "Failed to apply server bans");
        }

        self.transition(LifecycleState::Stopped);
        tracing::info!(instance = %self.name, "Server stopped");
    }
}
