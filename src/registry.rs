//! Process-wide service registry.
//!
//! Services are registered by name during process initialization, either at
//! runtime with [`register_service`] or statically with the [`service!`]
//! macro. The orchestrator reads the registry once per run through
//! [`ServiceRegistry::snapshot`].
//!
//! Names are unique for the lifetime of the registry. Registering a name twice
//! is a programming error and aborts the process.
//!
//! [`service!`]: crate::service

use crate::config::Config;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use tracing::{error, info};

/// Entry point of a service. Receives the merged configuration of the run.
pub type ServiceMain = Arc<dyn Fn(&Config) -> anyhow::Result<()> + Send + Sync>;

/// A statically declared service, collected with `inventory`.
///
/// Use the [`service!`](crate::service) macro rather than building this directly.
pub struct ServiceDecl {
    pub name: &'static str,
    pub main: fn(&Config) -> anyhow::Result<()>,
}

inventory::collect!(ServiceDecl);

/// Declare a service at compile time.
///
/// The declaration is folded into the global registry the first time the
/// registry is used, under the same uniqueness rule as runtime registration.
///
/// ```ignore
/// fn heartbeat(config: &mesh_app::Config) -> anyhow::Result<()> {
///     Ok(())
/// }
///
/// mesh_app::service!("heartbeat", heartbeat);
/// ```
#[macro_export]
macro_rules! service {
    ($name:expr, $main:path) => {
        $crate::inventory::submit! {
            $crate::registry::ServiceDecl { name: $name, main: $main }
        }
    };
}

/// Name → entry point table guarded by a reader/writer lock.
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, ServiceMain>>,
}

static GLOBAL: LazyLock<ServiceRegistry> = LazyLock::new(|| {
    let registry = ServiceRegistry::new();
    for decl in inventory::iter::<ServiceDecl> {
        registry.register(decl.name, decl.main);
    }
    registry
});

impl ServiceRegistry {
    /// An empty registry, independent of the global one.
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// The process-wide registry, created on first use and seeded with every
    /// [`service!`](crate::service) declaration linked into the binary.
    pub fn global() -> &'static ServiceRegistry {
        &GLOBAL
    }

    /// Register `main` under `name`.
    ///
    /// Aborts the process if `name` is empty or already registered.
    pub fn register<F>(&self, name: impl Into<String>, main: F)
    where
        F: Fn(&Config) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.is_empty() {
            abort_registration("", "empty service name");
        }

        let mut services = self
            .services
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if services.contains_key(&name) {
            abort_registration(&name, "duplicate service registration");
        }
        services.insert(name.clone(), Arc::new(main));
        drop(services);

        info!(service = %name, "Service registered");
    }

    /// Independent copy of the current table.
    pub fn snapshot(&self) -> ServiceSnapshot {
        let services = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        ServiceSnapshot {
            services: services
                .iter()
                .map(|(name, main)| (name.clone(), Arc::clone(main)))
                .collect(),
        }
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceRegistry")
            .field(&self.snapshot())
            .finish()
    }
}

/// Register a service in the global registry.
///
/// Aborts the process if `name` is empty or already registered.
pub fn register_service<F>(name: impl Into<String>, main: F)
where
    F: Fn(&Config) -> anyhow::Result<()> + Send + Sync + 'static,
{
    ServiceRegistry::global().register(name, main);
}

/// Registration errors are programming errors: report and abort.
fn abort_registration(name: &str, reason: &str) -> ! {
    error!(service = %name, "{reason}, aborting");
    eprintln!("fatal: {reason}: `{name}`");
    std::process::abort();
}

/// Immutable copy of the registry taken at dispatch time, ordered by name.
#[derive(Clone, Default)]
pub struct ServiceSnapshot {
    services: BTreeMap<String, ServiceMain>,
}

impl ServiceSnapshot {
    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ServiceMain> {
        self.services.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ServiceMain)> {
        self.services.iter().map(|(name, main)| (name.as_str(), main))
    }
}

impl fmt::Debug for ServiceSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn ok(_: &Config) -> anyhow::Result<()> {
        Ok(())
    }

    #[test]
    fn test_snapshot_holds_every_registration() {
        let forward = ServiceRegistry::new();
        let backward = ServiceRegistry::new();
        let names = ["gateway", "storage", "push", "session"];

        for name in names {
            forward.register(name, ok);
        }
        for name in names.iter().rev() {
            backward.register(*name, ok);
        }

        let a = forward.snapshot();
        let b = backward.snapshot();
        assert_eq!(a.len(), names.len());
        assert!(names.iter().all(|n| a.contains(n)));
        assert_eq!(a.names().collect::<Vec<_>>(), b.names().collect::<Vec<_>>());
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_registrations() {
        let registry = ServiceRegistry::new();
        registry.register("first", ok);
        let snapshot = registry.snapshot();

        registry.register("second", ok);

        assert_eq!(snapshot.names().collect::<Vec<_>>(), vec!["first"]);
        assert_eq!(registry.snapshot().len(), 2);
    }

    #[test]
    fn test_snapshot_entry_points_are_callable() {
        let registry = ServiceRegistry::new();
        registry.register("fails", |_: &Config| anyhow::bail!("nope"));
        registry.register("succeeds", ok);

        let snapshot = registry.snapshot();
        let config = Config::default();
        assert!(snapshot.get("succeeds").unwrap().as_ref()(&config).is_ok());
        assert!(snapshot.get("fails").unwrap().as_ref()(&config).is_err());
        assert!(snapshot.get("missing").is_none());
    }

    #[test]
    fn test_concurrent_register_and_snapshot() {
        let registry = ServiceRegistry::new();

        thread::scope(|s| {
            for worker in 0..4 {
                let registry = &registry;
                s.spawn(move || {
                    for i in 0..25 {
                        registry.register(format!("svc-{worker}-{i}"), ok);
                    }
                });
            }
            for _ in 0..4 {
                let registry = &registry;
                s.spawn(move || {
                    for _ in 0..25 {
                        let snapshot = registry.snapshot();
                        assert!(snapshot.len() <= 100);
                    }
                });
            }
        });

        assert_eq!(registry.snapshot().len(), 100);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = ServiceRegistry::new().snapshot();
        assert!(snapshot.is_empty());
        assert_eq!(format!("{snapshot:?}"), "{}");
    }
}
