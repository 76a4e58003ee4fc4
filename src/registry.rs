//! Port-keyed registry of supervised instances.
//!
//! Every instance is keyed by its current game port. Moving an instance to a
//! port that is already in use evicts the occupant, which is imploded since
//! two servers cannot share a port. The registry's lock also serializes
//! `start`, `stop` and the watchdog's polls across the whole host.

use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::instance::{Instance, Status};
use crate::relay::LogClaims;

/// Map guarded by the registry lock.
#[derive(Default)]
pub struct RegistryTable {
    by_port: BTreeMap<u16, Arc<Instance>>,
}

impl RegistryTable {
    pub fn get(&self, port: u16) -> Option<&Arc<Instance>> {
        self.by_port.get(&port)
    }

    pub fn ports(&self) -> Vec<u16> {
        self.by_port.keys().copied().collect()
    }

    pub fn instances(&self) -> Vec<Arc<Instance>> {
        self.by_port.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.by_port.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_port.is_empty()
    }

    /// Insert `instance` under `port`, imploding any other occupant.
    pub fn insert(&mut self, port: u16, instance: &Arc<Instance>) {
        if let Some(previous) = self.by_port.insert(port, Arc::clone(instance)) {
            if !Arc::ptr_eq(&previous, instance) {
                tracing::warn!(
                    port = port,
                    evicted = %previous.name(),
                    by = %instance.name(),
                    "Port taken over, imploding previous occupant"
                );
                previous.implode();
            }
        }
        instance.set_registry_port(port);
    }

    /// Re-key `instance` from `from` to `to`.
    ///
    /// The entry under `from` is only removed if it still belongs to
    /// `instance`; it may already have been taken over by a sibling.
    pub fn migrate(&mut self, instance: &Arc<Instance>, from: u16, to: u16) {
        if from == to {
            return;
        }
        tracing::info!(instance = %instance.name(), from = from, to = to, "Migrating game port");

        if self
            .by_port
            .get(&from)
            .is_some_and(|owner| Arc::ptr_eq(owner, instance))
        {
            self.by_port.remove(&from);
        }
        self.insert(to, instance);
    }
}

/// Host-wide registry. Shared by every instance and the watchdogs.
#[derive(Default)]
pub struct Registry {
    table: Mutex<RegistryTable>,
    claims: Arc<LogClaims>,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Acquire the registry lock.
    pub fn lock(&self) -> MutexGuard<'_, RegistryTable> {
        self.table.lock()
    }

    /// Log file claims of every instance on this host.
    pub fn claims(&self) -> &Arc<LogClaims> {
        &self.claims
    }

    /// Register `instance` under its configured game port.
    pub fn register(&self, instance: &Arc<Instance>) {
        let port = instance.config().game_port;
        self.lock().insert(port, instance);
    }

    pub fn get(&self, port: u16) -> Option<Arc<Instance>> {
        self.lock().get(port).cloned()
    }

    pub fn find(&self, name: &str) -> Option<Arc<Instance>> {
        self.lock()
            .by_port
            .values()
            .find(|instance| instance.name() == name)
            .cloned()
    }

    pub fn ports(&self) -> Vec<u16> {
        self.lock().ports()
    }

    pub fn instances(&self) -> Vec<Arc<Instance>> {
        self.lock().instances()
    }

    /// Start `instance` under this registry's lock.
    pub fn start(&self, instance: &Arc<Instance>) -> Status {
        let mut table = self.lock();
        instance.start_locked(&mut table)
    }

    /// Drop every entry, breaking the reference cycle with the instances.
    pub fn clear(&self) -> Vec<Arc<Instance>> {
        let table = std::mem::take(&mut *self.lock());
        table.by_port.into_values().collect()
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
    use crate::error::Result;
    use crate::instance::Services;
    use crate::process::{CommandRunner, OsProcessControl, Platform};
    use crate::sink::OutputSink;

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

    fn services() -> Arc<Services> {
        Arc::new(Services {
            runner: Arc::new(CommandRunner),
            rcon: Arc::new(NoRcon),
            health: Arc::new(NoHealth),
            config_handler: Arc::new(TemplateConfigHandler),
            control: Arc::new(OsProcessControl),
            settings: HostSettings::default(),
            relay: RelaySettings::default(),
            platform: Platform::current(),
        })
    }

    fn instance(registry: &Arc<Registry>, name: &str, game_port: u16) -> Arc<Instance> {
        let config = ServerConfig {
            name: name.into(),
            game_port,
            ..Default::default()
        };
        let instance = Instance::new(config, services(), Arc::clone(registry));
        registry.register(&instance);
        instance
    }

    #[test]
    fn test_register_keys_by_game_port() {
        let registry = Registry::new();
        let alpha = instance(&registry, "alpha", 7777);
        let beta = instance(&registry, "beta", 7778);

        assert_eq!(registry.ports(), vec![7777, 7778]);
        assert!(Arc::ptr_eq(&registry.get(7778).unwrap(), &beta));
        assert!(Arc::ptr_eq(&registry.find("alpha").unwrap(), &alpha));
        assert!(registry.find("gamma").is_none());
        registry.clear();
    }

    #[test]
    fn test_migrate_rekeys_and_evicts_occupant() {
        let registry = Registry::new();
        let alpha = instance(&registry, "alpha", 7777);
        let beta = instance(&registry, "beta", 7778);

        registry.lock().migrate(&beta, 7778, 7777);

        assert_eq!(registry.ports(), vec![7777]);
        assert!(Arc::ptr_eq(&registry.get(7777).unwrap(), &beta));
        assert_eq!(beta.registry_port(), 7777);
        assert!(alpha.is_imploded());
        assert!(alpha.output().is_released());
        assert!(!beta.is_imploded());
        registry.clear();
    }

    #[test]
    fn test_migrate_keeps_entry_taken_by_sibling() {
        let registry = Registry::new();
        let alpha = instance(&registry, "alpha", 7777);
        let beta = instance(&registry, "beta", 7778);

        // gamma took over 7778 before beta's stale move away from it.
        let gamma = instance(&registry, "gamma", 7778);
        assert!(beta.is_imploded());
        registry.lock().migrate(&beta, 7778, 7779);

        assert_eq!(registry.ports(), vec![7777, 7778, 7779]);
        assert!(Arc::ptr_eq(&registry.get(7778).unwrap(), &gamma));
        assert!(!gamma.is_imploded());
        assert!(!alpha.is_imploded());
        registry.clear();
    }

    #[test]
    fn test_clear_empties_the_table() {
        let registry = Registry::new();
        instance(&registry, "alpha", 7777);

        let cleared = registry.clear();
        assert_eq!(cleared.len(), 1);
        assert!(registry.lock().is_empty());
    }
}
