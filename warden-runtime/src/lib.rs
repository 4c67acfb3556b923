//! WARDEN Runtime
//!
//! Builds the query cache, resource registry and error boundary once per
//! page, wires them to a shared [`LifecycleHub`] and hands the bundle to
//! feature modules. Features never construct these pieces themselves.
//!
//! Navigation is the one event that touches all three: the cache forgets
//! everything it located, the boundary resets its recovery budget, and the
//! registry releases every resource registered since the previous
//! navigation. A failure caught by the boundary is narrower: only the
//! resources of the module that failed are released.

use std::sync::{Arc, Weak};

use serde::Serialize;
use tracing::{debug, info};
use warden_boundary::{BoundaryStats, ErrorBoundary, ANY_MODULE};
use warden_cache::{CacheStats, QueryCache};
use warden_core::{
    ConfigError, ErrorRecord, KeyValueStore, LifecycleHub, LifecycleListener, LifecycleSignal,
    NodeTree, Notifier, Scheduler, WardenConfig,
};
use warden_registry::{CleanupReport, RegistryCounts, ResourceRegistry};

pub use warden_boundary;
pub use warden_cache;
pub use warden_core;
pub use warden_registry;

/// What a navigation did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NavigationReport {
    /// Lifecycle listeners that received the signal.
    pub listeners: usize,
    pub cleanup: CleanupReport,
}

/// Combined diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeStats {
    pub cache: CacheStats,
    pub registry: RegistryCounts,
    pub boundary: BoundaryStats,
}

/// One cache, one registry and one boundary sharing a lifecycle hub.
pub struct Runtime<T: NodeTree> {
    config: WardenConfig,
    hub: LifecycleHub,
    cache: Arc<QueryCache<T>>,
    registry: Arc<ResourceRegistry>,
    boundary: Arc<ErrorBoundary>,
    // The hub only holds listeners weakly
    _listeners: Vec<Arc<dyn LifecycleListener>>,
}

impl<T: NodeTree> Runtime<T> {
    /// Validate `config` and build the runtime.
    ///
    /// The boundary gets a recovery hook that releases the resources the
    /// failing module registered through [`ResourceRegistry::scope`] and
    /// sweeps expired or detached cache entries. Other modules keep their
    /// resources and cached lookups.
    pub fn new<S: Scheduler + 'static>(
        config: WardenConfig,
        tree: Arc<T>,
        scheduler: Arc<S>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let cache = Arc::new(QueryCache::new(tree, scheduler.clone(), config.cache.clone()));
        let registry = Arc::new(ResourceRegistry::new(scheduler.clone()));
        let boundary = Arc::new(ErrorBoundary::new(
            config.boundary.clone(),
            config.breaker.clone(),
            scheduler,
            store,
            notifier,
        ));

        let hub = LifecycleHub::new();
        let cache_listener = cache.lifecycle_listener();
        let boundary_listener: Arc<dyn LifecycleListener> = boundary.clone();
        hub.subscribe(&cache_listener);
        hub.subscribe(&boundary_listener);

        // Recovery is scoped to the failing module. Cache entries belong to
        // no module, so only stale ones are dropped.
        let weak_cache: Weak<QueryCache<T>> = Arc::downgrade(&cache);
        let weak_registry = Arc::downgrade(&registry);
        boundary.register_recovery(ANY_MODULE, move |record: &ErrorRecord| {
            let module = record.context.module.as_str();
            let released = weak_registry
                .upgrade()
                .map_or(0, |registry| registry.cleanup_module(module).torn_down);
            let swept = weak_cache.upgrade().map_or(0, |cache| cache.sweep());
            debug!(module, released, swept, "runtime.recover");
        });

        info!(
            max_entries = config.cache.max_entries,
            failure_threshold = config.breaker.failure_threshold,
            "runtime.init"
        );

        Ok(Self {
            config,
            hub,
            cache,
            registry,
            boundary,
            _listeners: vec![cache_listener, boundary_listener],
        })
    }

    /// Build from defaults overridden by `WARDEN_*` environment variables.
    pub fn from_env<S: Scheduler + 'static>(
        tree: Arc<T>,
        scheduler: Arc<S>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, ConfigError> {
        Self::new(WardenConfig::from_env(), tree, scheduler, store, notifier)
    }

    pub fn config(&self) -> &WardenConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<QueryCache<T>> {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    pub fn boundary(&self) -> &Arc<ErrorBoundary> {
        &self.boundary
    }

    /// The hub features subscribe their own listeners to.
    pub fn hub(&self) -> &LifecycleHub {
        &self.hub
    }

    /// Arm the cache's background sweep.
    pub fn start(&self) {
        self.cache.start();
    }

    /// Deliver `signal` to every listener, then release registered
    /// resources. Listeners run first so nothing reads the tree through a
    /// stale cache while teardowns execute.
    pub fn navigate(&self, signal: LifecycleSignal) -> NavigationReport {
        let listeners = self.hub.emit(signal);
        let cleanup = self.registry.cleanup();
        debug!(
            ?signal,
            listeners,
            torn_down = cleanup.torn_down,
            failures = cleanup.failures.len(),
            "runtime.navigate"
        );
        NavigationReport { listeners, cleanup }
    }

    /// Release every registered resource and destroy the cache. Safe to call
    /// more than once.
    pub fn shutdown(&self) -> CleanupReport {
        let report = self.registry.cleanup();
        self.cache.destroy();
        info!(torn_down = report.torn_down, "runtime.shutdown");
        report
    }

    pub fn stats(&self) -> RuntimeStats {
        RuntimeStats {
            cache: self.cache.stats(),
            registry: self.registry.counts(),
            boundary: self.boundary.stats(),
        }
    }
}

impl<T: NodeTree> std::fmt::Debug for Runtime<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("cache", &self.cache)
            .field("registry", &self.registry)
            .field("boundary", &self.boundary)
            .finish()
    }
}
