//! The resource registry.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use warden_core::{
    CleanupId, EventTarget, FrameId, HostError, IdSequence, ListenerId, ListenerOptions,
    ListenerToken, Observer, ObserverId, Scheduler, TimerId,
};

/// Teardown closure registered with [`ResourceRegistry::register_function`].
pub type CleanupFn = Box<dyn FnOnce() -> Result<(), HostError> + Send + 'static>;

/// Resource categories, in bulk teardown order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Function,
    Observer,
    Listener,
    Interval,
    Timeout,
    Frame,
}

impl ResourceKind {
    pub const TEARDOWN_ORDER: [ResourceKind; 6] = [
        Self::Function,
        Self::Observer,
        Self::Listener,
        Self::Interval,
        Self::Timeout,
        Self::Frame,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Observer => "observer",
            Self::Listener => "listener",
            Self::Interval => "interval",
            Self::Timeout => "timeout",
            Self::Frame => "frame",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One teardown that failed during [`ResourceRegistry::cleanup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownFailure {
    pub kind: ResourceKind,
    /// Rendered handle, e.g. `observer#3`.
    pub handle: String,
    pub error: HostError,
}

/// Outcome of a bulk cleanup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Teardowns attempted, failed ones included.
    pub torn_down: usize,
    pub failures: Vec<TeardownFailure>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn record(&mut self, kind: ResourceKind, handle: String, result: Result<(), HostError>) {
        self.torn_down += 1;
        if let Err(error) = result {
            warn!(kind = %kind, handle = %handle, error = %error, "registry.teardown_failed");
            self.failures.push(TeardownFailure { kind, handle, error });
        }
    }
}

/// Tracked resources per category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCounts {
    pub observers: usize,
    pub listeners: usize,
    pub intervals: usize,
    pub timeouts: usize,
    pub frames: usize,
    pub functions: usize,
}

impl RegistryCounts {
    pub fn total(&self) -> usize {
        self.observers + self.listeners + self.intervals + self.timeouts + self.frames + self.functions
    }
}

struct Binding {
    target: Arc<dyn EventTarget>,
    event: String,
    listener: ListenerId,
    options: ListenerOptions,
}

impl Binding {
    fn remove(&self) -> Result<(), HostError> {
        self.target.remove_listener(&self.event, self.listener, &self.options)
    }
}

/// A tracked handle plus the module that registered it, if any.
struct Owned<T> {
    owner: Option<Arc<str>>,
    item: T,
}

impl<T> Owned<T> {
    fn owned_by(&self, module: &str) -> bool {
        self.owner.as_deref() == Some(module)
    }
}

#[derive(Default)]
struct Tracked {
    functions: BTreeMap<CleanupId, Owned<CleanupFn>>,
    observers: BTreeMap<ObserverId, Owned<Box<dyn Observer>>>,
    listeners: BTreeMap<ListenerToken, Owned<Binding>>,
    intervals: BTreeMap<TimerId, Owned<()>>,
    timeouts: BTreeMap<TimerId, Owned<()>>,
    frames: BTreeMap<FrameId, Owned<()>>,
}

impl Tracked {
    /// Detach the handles owned by `module`, leaving everything else.
    fn split_off_module(&mut self, module: &str) -> Tracked {
        Tracked {
            functions: split_owned(&mut self.functions, module),
            observers: split_owned(&mut self.observers, module),
            listeners: split_owned(&mut self.listeners, module),
            intervals: split_owned(&mut self.intervals, module),
            timeouts: split_owned(&mut self.timeouts, module),
            frames: split_owned(&mut self.frames, module),
        }
    }

    fn counts_where(&self, keep: impl Fn(Option<&str>) -> bool) -> RegistryCounts {
        fn count<K, T>(map: &BTreeMap<K, Owned<T>>, keep: &impl Fn(Option<&str>) -> bool) -> usize {
            map.values().filter(|owned| keep(owned.owner.as_deref())).count()
        }
        RegistryCounts {
            observers: count(&self.observers, &keep),
            listeners: count(&self.listeners, &keep),
            intervals: count(&self.intervals, &keep),
            timeouts: count(&self.timeouts, &keep),
            frames: count(&self.frames, &keep),
            functions: count(&self.functions, &keep),
        }
    }
}

fn split_owned<K: Ord + Copy, T>(
    map: &mut BTreeMap<K, Owned<T>>,
    module: &str,
) -> BTreeMap<K, Owned<T>> {
    let keys: Vec<K> = map
        .iter()
        .filter(|(_, owned)| owned.owned_by(module))
        .map(|(key, _)| *key)
        .collect();
    keys.into_iter()
        .filter_map(|key| map.remove(&key).map(|owned| (key, owned)))
        .collect()
}

/// Typed bag of live resources owned by feature code.
///
/// Register what you create; one [`ResourceRegistry::cleanup`] on navigation
/// tears all of it down. Resources registered through
/// [`ResourceRegistry::scope`] also belong to a module and can be released
/// on their own with [`ResourceRegistry::cleanup_module`]. The registry only
/// forgets a handle after trying to release it, and never calls host code
/// with its lock held.
pub struct ResourceRegistry {
    scheduler: Arc<dyn Scheduler>,
    ids: IdSequence,
    tracked: Mutex<Tracked>,
}

impl ResourceRegistry {
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            scheduler,
            ids: IdSequence::new(),
            tracked: Mutex::new(Tracked::default()),
        }
    }

    fn tracked(&self) -> MutexGuard<'_, Tracked> {
        self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Registration handle that tags everything it tracks with `module`.
    ///
    /// `module` is matched against the error boundary's module name, the
    /// label prefix before the first `.`.
    pub fn scope(&self, module: &str) -> ModuleScope<'_> {
        ModuleScope {
            registry: self,
            module: Arc::from(module),
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub fn register_observer(&self, observer: Box<dyn Observer>) -> ObserverId {
        self.track_observer(None, observer)
    }

    /// Track an event binding. The returned token is fresh per call, so the
    /// same handler bound twice yields two independent bindings.
    pub fn register_listener(
        &self,
        target: Arc<dyn EventTarget>,
        event: impl Into<String>,
        listener: ListenerId,
        options: ListenerOptions,
    ) -> ListenerToken {
        self.track_listener(None, target, event.into(), listener, options)
    }

    pub fn register_interval(&self, id: TimerId) -> TimerId {
        self.tracked().intervals.insert(id, Owned { owner: None, item: () });
        id
    }

    pub fn register_timeout(&self, id: TimerId) -> TimerId {
        self.tracked().timeouts.insert(id, Owned { owner: None, item: () });
        id
    }

    pub fn register_animation_frame(&self, id: FrameId) -> FrameId {
        self.tracked().frames.insert(id, Owned { owner: None, item: () });
        id
    }

    pub fn register_function(
        &self,
        f: impl FnOnce() -> Result<(), HostError> + Send + 'static,
    ) -> CleanupId {
        self.track_function(None, Box::new(f))
    }

    fn track_observer(&self, owner: Option<Arc<str>>, observer: Box<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.ids.next());
        self.tracked().observers.insert(id, Owned { owner, item: observer });
        id
    }

    fn track_listener(
        &self,
        owner: Option<Arc<str>>,
        target: Arc<dyn EventTarget>,
        event: String,
        listener: ListenerId,
        options: ListenerOptions,
    ) -> ListenerToken {
        let token = ListenerToken(self.ids.next());
        let binding = Binding {
            target,
            event,
            listener,
            options,
        };
        self.tracked().listeners.insert(token, Owned { owner, item: binding });
        token
    }

    fn track_function(&self, owner: Option<Arc<str>>, f: CleanupFn) -> CleanupId {
        let id = CleanupId(self.ids.next());
        self.tracked().functions.insert(id, Owned { owner, item: f });
        id
    }

    // ------------------------------------------------------------------
    // Individual teardown
    // ------------------------------------------------------------------

    pub fn unregister_observer(&self, id: ObserverId) -> Result<bool, HostError> {
        let Some(mut observer) = self.tracked().observers.remove(&id) else {
            return Ok(false);
        };
        observer.item.disconnect().map(|_| true)
    }

    pub fn unregister_listener(&self, token: ListenerToken) -> Result<bool, HostError> {
        let Some(binding) = self.tracked().listeners.remove(&token) else {
            return Ok(false);
        };
        binding.item.remove().map(|_| true)
    }

    pub fn unregister_interval(&self, id: TimerId) -> Result<bool, HostError> {
        if self.tracked().intervals.remove(&id).is_none() {
            return Ok(false);
        }
        self.scheduler.clear_interval(id);
        Ok(true)
    }

    pub fn unregister_timeout(&self, id: TimerId) -> Result<bool, HostError> {
        if self.tracked().timeouts.remove(&id).is_none() {
            return Ok(false);
        }
        self.scheduler.clear_timeout(id);
        Ok(true)
    }

    pub fn unregister_animation_frame(&self, id: FrameId) -> Result<bool, HostError> {
        if self.tracked().frames.remove(&id).is_none() {
            return Ok(false);
        }
        self.scheduler.cancel_animation_frame(id);
        Ok(true)
    }

    /// Forget and run the teardown closure `id`.
    pub fn unregister_function(&self, id: CleanupId) -> Result<bool, HostError> {
        let Some(f) = self.tracked().functions.remove(&id) else {
            return Ok(false);
        };
        run_guarded(f.item).map(|_| true)
    }

    // ------------------------------------------------------------------
    // Bulk teardown
    // ------------------------------------------------------------------

    /// Tear down everything registered so far, module-owned or not.
    ///
    /// Every category is detached from the registry in one step before the
    /// first teardown runs, so a closure that re-enters `cleanup` or
    /// registers new resources only affects the next round. A failing
    /// teardown is logged and reported; the remaining ones still run.
    pub fn cleanup(&self) -> CleanupReport {
        let taken = std::mem::take(&mut *self.tracked());
        let report = self.tear_down(taken);
        debug!(
            torn_down = report.torn_down,
            failures = report.failures.len(),
            "registry.cleanup"
        );
        report
    }

    /// Tear down only what was registered through `scope(module)`.
    ///
    /// Unowned resources and other modules' resources stay tracked and
    /// running. Same ordering and failure handling as [`Self::cleanup`].
    pub fn cleanup_module(&self, module: &str) -> CleanupReport {
        let taken = self.tracked().split_off_module(module);
        let report = self.tear_down(taken);
        debug!(
            module,
            torn_down = report.torn_down,
            failures = report.failures.len(),
            "registry.cleanup_module"
        );
        report
    }

    fn tear_down(&self, taken: Tracked) -> CleanupReport {
        let mut report = CleanupReport::default();

        for (id, f) in taken.functions {
            report.record(ResourceKind::Function, id.to_string(), run_guarded(f.item));
        }
        for (id, mut observer) in taken.observers {
            let result = catch_unwind(AssertUnwindSafe(|| observer.item.disconnect()))
                .unwrap_or_else(|payload| Err(HostError::from_panic(payload)));
            report.record(ResourceKind::Observer, id.to_string(), result);
        }
        for (token, binding) in taken.listeners {
            let result = catch_unwind(AssertUnwindSafe(|| binding.item.remove()))
                .unwrap_or_else(|payload| Err(HostError::from_panic(payload)));
            report.record(ResourceKind::Listener, token.to_string(), result);
        }
        for id in taken.intervals.into_keys() {
            self.scheduler.clear_interval(id);
            report.record(ResourceKind::Interval, id.to_string(), Ok(()));
        }
        for id in taken.timeouts.into_keys() {
            self.scheduler.clear_timeout(id);
            report.record(ResourceKind::Timeout, id.to_string(), Ok(()));
        }
        for id in taken.frames.into_keys() {
            self.scheduler.cancel_animation_frame(id);
            report.record(ResourceKind::Frame, id.to_string(), Ok(()));
        }
        report
    }

    pub fn counts(&self) -> RegistryCounts {
        self.tracked().counts_where(|_| true)
    }

    /// Resources currently owned by `module`.
    pub fn counts_for(&self, module: &str) -> RegistryCounts {
        self.tracked().counts_where(|owner| owner == Some(module))
    }

    pub fn is_empty(&self) -> bool {
        self.counts().total() == 0
    }
}

/// Registration handle returned by [`ResourceRegistry::scope`].
///
/// Mirrors the registry's `register_*` methods; handles it returns can be
/// passed to the registry's `unregister_*` methods as usual.
#[derive(Clone)]
pub struct ModuleScope<'a> {
    registry: &'a ResourceRegistry,
    module: Arc<str>,
}

impl ModuleScope<'_> {
    pub fn module(&self) -> &str {
        &self.module
    }

    fn owner(&self) -> Option<Arc<str>> {
        Some(self.module.clone())
    }

    pub fn register_observer(&self, observer: Box<dyn Observer>) -> ObserverId {
        self.registry.track_observer(self.owner(), observer)
    }

    pub fn register_listener(
        &self,
        target: Arc<dyn EventTarget>,
        event: impl Into<String>,
        listener: ListenerId,
        options: ListenerOptions,
    ) -> ListenerToken {
        self.registry
            .track_listener(self.owner(), target, event.into(), listener, options)
    }

    pub fn register_interval(&self, id: TimerId) -> TimerId {
        let owned = Owned { owner: self.owner(), item: () };
        self.registry.tracked().intervals.insert(id, owned);
        id
    }

    pub fn register_timeout(&self, id: TimerId) -> TimerId {
        let owned = Owned { owner: self.owner(), item: () };
        self.registry.tracked().timeouts.insert(id, owned);
        id
    }

    pub fn register_animation_frame(&self, id: FrameId) -> FrameId {
        let owned = Owned { owner: self.owner(), item: () };
        self.registry.tracked().frames.insert(id, owned);
        id
    }

    pub fn register_function(
        &self,
        f: impl FnOnce() -> Result<(), HostError> + Send + 'static,
    ) -> CleanupId {
        self.registry.track_function(self.owner(), Box::new(f))
    }

    /// Same as [`ResourceRegistry::cleanup_module`] for this module.
    pub fn cleanup(&self) -> CleanupReport {
        self.registry.cleanup_module(&self.module)
    }

    pub fn counts(&self) -> RegistryCounts {
        self.registry.counts_for(&self.module)
    }
}

impl fmt::Debug for ModuleScope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleScope")
            .field("module", &self.module)
            .finish()
    }
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceRegistry")
            .field("counts", &self.counts())
            .finish()
    }
}

fn run_guarded(f: CleanupFn) -> Result<(), HostError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| Err(HostError::from_panic(payload)))
}
