// Registry - the table of known collectors and their memoized instances
//
// Built once at startup: every subsystem registers {name, default state,
// factory}, configuration then fixes each name's enabled flag, and the
// exporter resolves the enabled set exactly once. After that the registry
// is only read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use super::{Collector, CollectorContext, CollectorError};
use crate::config::ConfigError;

/// Constructor for one collector; may reject its configuration
pub type Factory = fn(&CollectorContext) -> Result<Arc<dyn Collector>, CollectorError>;

struct Registration {
    name: &'static str,
    enabled_by_default: bool,
    enabled: bool,
    factory: Factory,
}

/// Ordered collection of collector registrations.
///
/// # Invariants
/// - A name is registered at most once (registering twice panics)
/// - At most one live instance exists per name for the registry's lifetime,
///   even when `resolve_enabled` races with itself
pub struct Registry {
    registrations: Vec<Registration>,
    instances: Mutex<HashMap<&'static str, Arc<dyn Collector>>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            registrations: Vec::new(),
            instances: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a collector under a unique name.
    ///
    /// # Panics
    /// If `name` is already registered. Registration happens while the
    /// binary assembles its collector list, so a duplicate is a bug.
    pub fn register(&mut self, name: &'static str, enabled_by_default: bool, factory: Factory) {
        assert!(
            self.registrations.iter().all(|r| r.name != name),
            "collector {} registered twice",
            name
        );
        self.registrations.push(Registration {
            name,
            enabled_by_default,
            enabled: enabled_by_default,
            factory,
        });
    }

    /// Registered names with their default state, in registration order
    pub fn entries(&self) -> impl Iterator<Item = (&'static str, bool)> + '_ {
        self.registrations
            .iter()
            .map(|r| (r.name, r.enabled_by_default))
    }

    /// Overrides the enabled flag of a registered collector
    pub fn set_enabled(&mut self, name: &str, enabled: bool) -> Result<(), ConfigError> {
        let registration = self
            .registrations
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| ConfigError::UnknownCollector(name.to_string()))?;
        registration.enabled = enabled;
        Ok(())
    }

    #[cfg(test)]
    pub fn is_enabled(&self, name: &str) -> Option<bool> {
        self.registrations
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.enabled)
    }

    /// Returns an instance of every enabled collector, in registration order.
    ///
    /// Instances are created on first request and cached; later calls hand
    /// out the same `Arc`. A factory error aborts the whole resolution so a
    /// misconfigured collector prevents the exporter from starting.
    pub fn resolve_enabled(
        &self,
        ctx: &CollectorContext,
    ) -> Result<Vec<(&'static str, Arc<dyn Collector>)>, CollectorError> {
        // Held for the whole resolution so concurrent callers cannot both
        // run the same factory.
        let mut instances = self
            .instances
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let mut resolved = Vec::new();
        for registration in self.registrations.iter().filter(|r| r.enabled) {
            let collector = match instances.get(registration.name) {
                Some(collector) => Arc::clone(collector),
                None => {
                    debug!(collector = registration.name, "constructing collector");
                    let collector = (registration.factory)(ctx)?;
                    instances.insert(registration.name, Arc::clone(&collector));
                    collector
                }
            };
            resolved.push((registration.name, collector));
        }
        Ok(resolved)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CollectorSettings;
    use crate::sink::MetricSink;
    use crate::collectors::testutil::socket_dispatcher;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Noop;

    #[async_trait]
    impl Collector for Noop {
        async fn update(&self, _sink: &MetricSink) -> Result<(), CollectorError> {
            Ok(())
        }
    }

    fn context() -> CollectorContext {
        CollectorContext {
            dispatcher: socket_dispatcher("/var/run/frr"),
            settings: CollectorSettings::default(),
        }
    }

    fn noop(_ctx: &CollectorContext) -> Result<Arc<dyn Collector>, CollectorError> {
        Ok(Arc::new(Noop))
    }

    fn rejecting(_ctx: &CollectorContext) -> Result<Arc<dyn Collector>, CollectorError> {
        Err(CollectorError::Config {
            collector: "broken",
            reason: "bad setting".to_string(),
        })
    }

    #[test]
    fn test_only_enabled_are_resolved() {
        let mut registry = Registry::new();
        registry.register("a", true, noop);
        registry.register("b", false, noop);
        registry.register("c", true, noop);
        registry.set_enabled("c", false).unwrap();
        registry.set_enabled("b", true).unwrap();

        let names: Vec<&str> = registry
            .resolve_enabled(&context())
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_resolve_is_memoized() {
        let mut registry = Registry::new();
        registry.register("a", true, noop);

        let ctx = context();
        let first = registry.resolve_enabled(&ctx).unwrap();
        let second = registry.resolve_enabled(&ctx).unwrap();
        assert!(Arc::ptr_eq(&first[0].1, &second[0].1));
    }

    static CONCURRENT_BUILDS: AtomicUsize = AtomicUsize::new(0);

    fn counting(_ctx: &CollectorContext) -> Result<Arc<dyn Collector>, CollectorError> {
        CONCURRENT_BUILDS.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(10));
        Ok(Arc::new(Noop))
    }

    #[test]
    fn test_concurrent_resolution_builds_once() {
        let mut registry = Registry::new();
        registry.register("counted", true, counting);
        let registry = Arc::new(registry);
        let ctx = context();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let ctx = ctx.clone();
                std::thread::spawn(move || registry.resolve_enabled(&ctx).unwrap())
            })
            .collect();
        let resolved: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(CONCURRENT_BUILDS.load(Ordering::SeqCst), 1);
        for other in &resolved[1..] {
            assert!(Arc::ptr_eq(&resolved[0][0].1, &other[0].1));
        }
    }

    #[test]
    fn test_factory_error_is_fatal() {
        let mut registry = Registry::new();
        registry.register("ok", true, noop);
        registry.register("broken", true, rejecting);

        match registry.resolve_enabled(&context()) {
            Err(err) => assert!(err.to_string().contains("bad setting")),
            Ok(_) => panic!("expected factory error"),
        }
    }

    #[test]
    fn test_disabled_factory_error_is_ignored() {
        let mut registry = Registry::new();
        registry.register("broken", false, rejecting);
        assert!(registry.resolve_enabled(&context()).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_collector_flag() {
        let mut registry = Registry::new();
        registry.register("a", true, noop);
        assert!(registry.set_enabled("nope", true).is_err());
        assert_eq!(registry.is_enabled("a"), Some(true));
        assert_eq!(registry.is_enabled("nope"), None);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_registration_panics() {
        let mut registry = Registry::new();
        registry.register("a", true, noop);
        registry.register("a", false, noop);
    }
}
