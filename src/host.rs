//! Host assembly.
//!
//! A [`Host`] owns the registry, every configured instance and their
//! watchdogs. Use [`HostBuilder`] to plug in the external collaborators:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # fn example(
//! #     rcon: Arc<dyn warden::collab::RconClient>,
//! #     health: Arc<dyn warden::collab::HealthMonitorFactory>,
//! # ) -> anyhow::Result<()> {
//! use warden::config::HostConfig;
//! use warden::host::Host;
//!
//! let config = HostConfig::load(&HostConfig::default_path()?)?;
//! let host = Host::builder(config).rcon(rcon).health(health).build()?;
//! host.start_all();
//! host.spawn_watchdogs()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::collab::{ConfigHandler, HealthMonitorFactory, RconClient, TemplateConfigHandler};
use crate::config::HostConfig;
use crate::error::{Error, Result};
use crate::instance::{Instance, Services, Status};
use crate::process::{CommandRunner, OsProcessControl, Platform, ProcessControl, ProcessRunner};
use crate::registry::Registry;
use crate::watchdog::{Watchdog, WatchdogHandle};

/// Builder for creating a configured [`Host`].
pub struct HostBuilder {
    config: HostConfig,
    runner: Arc<dyn ProcessRunner>,
    rcon: Option<Arc<dyn RconClient>>,
    health: Option<Arc<dyn HealthMonitorFactory>>,
    config_handler: Arc<dyn ConfigHandler>,
    control: Arc<dyn ProcessControl>,
    platform: Platform,
}

impl HostBuilder {
    /// Create a builder with the OS-backed runner and process control and
    /// the template configuration handler.
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            runner: Arc::new(CommandRunner),
            rcon: None,
            health: None,
            config_handler: Arc::new(TemplateConfigHandler),
            control: Arc::new(OsProcessControl),
            platform: Platform::current(),
        }
    }

    #[must_use]
    pub fn runner(mut self, runner: Arc<dyn ProcessRunner>) -> Self {
        self.runner = runner;
        self
    }

    #[must_use]
    pub fn rcon(mut self, rcon: Arc<dyn RconClient>) -> Self {
        self.rcon = Some(rcon);
        self
    }

    #[must_use]
    pub fn health(mut self, health: Arc<dyn HealthMonitorFactory>) -> Self {
        self.health = Some(health);
        self
    }

    #[must_use]
    pub fn config_handler(mut self, handler: Arc<dyn ConfigHandler>) -> Self {
        self.config_handler = handler;
        self
    }

    #[must_use]
    pub fn process_control(mut self, control: Arc<dyn ProcessControl>) -> Self {
        self.control = control;
        self
    }

    /// Override the detected platform.
    #[must_use]
    pub const fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Validate the configuration and create one instance per server.
    pub fn build(self) -> Result<Host> {
        self.config.validate()?;
        let rcon = self
            .rcon
            .ok_or_else(|| Error::Config("an RCON client is required".into()))?;
        let health = self
            .health
            .ok_or_else(|| Error::Config("a health monitor factory is required".into()))?;

        let HostConfig {
            host: settings,
            relay,
            servers,
        } = self.config;
        let services = Arc::new(Services {
            runner: self.runner,
            rcon,
            health,
            config_handler: self.config_handler,
            control: self.control,
            settings,
            relay,
            platform: self.platform,
        });

        let registry = Registry::new();
        let instances: Vec<_> = servers
            .into_iter()
            .map(|server| {
                let instance = Instance::new(server, Arc::clone(&services), Arc::clone(&registry));
                registry.register(&instance);
                instance
            })
            .collect();

        tracing::info!(
            instances = instances.len(),
            log_dir = %services.settings.log_dir.display(),
            "Host configured"
        );

        Ok(Host {
            registry,
            services,
            instances,
            watchdogs: parking_lot::Mutex::new(Vec::new()),
        })
    }
}

/// Supervisor for every game server on this host.
pub struct Host {
    registry: Arc<Registry>,
    services: Arc<Services>,
    instances: Vec<Arc<Instance>>,
    watchdogs: parking_lot::Mutex<Vec<WatchdogHandle>>,
}

impl Host {
    pub fn builder(config: HostConfig) -> HostBuilder {
        HostBuilder::new(config)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Every instance created at startup, including evicted ones.
    pub fn instances(&self) -> &[Arc<Instance>] {
        &self.instances
    }

    pub fn instance(&self, name: &str) -> Option<&Arc<Instance>> {
        self.instances.iter().find(|instance| instance.name() == name)
    }

    /// Start every instance that still holds a port, one after another.
    pub fn start_all(&self) -> Vec<(String, Status)> {
        self.instances
            .iter()
            .filter(|instance| !instance.is_imploded())
            .map(|instance| {
                let status = instance.start();
                tracing::info!(instance = %instance.name(), status = %status, "Start finished");
                (instance.name().to_string(), status)
            })
            .collect()
    }

    pub fn stop_all(&self) -> Vec<(String, Status)> {
        self.instances
            .iter()
            .map(|instance| (instance.name().to_string(), instance.stop()))
            .collect()
    }

    /// Launch one watchdog per live instance.
    pub fn spawn_watchdogs(&self) -> Result<()> {
        let interval = self.services.settings.watchdog_interval();
        let mut watchdogs = self.watchdogs.lock();
        for instance in self.instances.iter().filter(|i| !i.is_imploded()) {
            if watchdogs.iter().any(|w| w.name() == instance.name() && w.is_alive()) {
                continue;
            }
            watchdogs.push(Watchdog::new(Arc::clone(instance), interval).spawn()?);
        }
        Ok(())
    }

    /// Names of instances whose watchdog has exited.
    pub fn unsupervised(&self) -> Vec<String> {
        self.watchdogs
            .lock()
            .iter()
            .filter(|w| !w.is_alive())
            .map(|w| w.name().to_string())
            .collect()
    }

    /// Stop every watchdog and server, then drop the registry entries.
    pub fn shutdown(&self) {
        let watchdogs = std::mem::take(&mut *self.watchdogs.lock());
        for watchdog in &watchdogs {
            watchdog.stop();
        }
        for watchdog in watchdogs {
            let name = watchdog.name().to_string();
            if let Err(e) = watchdog.join() {
                tracing::warn!(instance = %name, error = %e, "Watchdog ended with an error");
            }
        }

        for (name, status) in self.stop_all() {
            tracing::info!(instance = %name, status = %status, "Shutdown");
        }
        self.registry.clear();
    }
}
