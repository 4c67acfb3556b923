//! The query cache.
//!
//! Reads go through [`QueryCache::get`] / [`QueryCache::get_all`]; the cache
//! trusts an entry for its TTL but re-checks node attachment on every hit.
//! Waits share one tree observer and are flushed at most once per frame.
//!
//! Locking: the state mutex is never held while calling into the tree or the
//! scheduler. Every path snapshots what it needs, releases the lock, talks to
//! the host, then re-acquires to commit.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};
use warden_core::{
    CacheConfig, FrameId, LifecycleListener, LifecycleSignal, MutationBatch, NodeTree, Observer,
    QueryError, Scheduler, TimerId,
};

use crate::key::{CacheKey, ScopeId, ScopeIds};
use crate::stats::{CacheStats, Counters};
use crate::store::{MultiCacheEntry, SingleStore};
use crate::wait::{PendingWait, Waiter};

/// Timer currently driving the background sweep.
#[derive(Debug, Clone, Copy)]
enum SweepTimer {
    Delay(TimerId),
    Idle(TimerId),
}

struct State<N> {
    scopes: ScopeIds<N>,
    single: SingleStore<N>,
    multi: HashMap<CacheKey, MultiCacheEntry<N>>,
    multi_generation: u64,
    waiters: BTreeMap<u64, Waiter<N>>,
    next_waiter: u64,
    observer: Option<Box<dyn Observer>>,
    flush_pending: bool,
    flush_frame: Option<FrameId>,
    sweep: Option<SweepTimer>,
    counters: Counters,
    destroyed: bool,
}

impl<N> Default for State<N> {
    fn default() -> Self {
        Self {
            scopes: ScopeIds::default(),
            single: SingleStore::default(),
            multi: HashMap::new(),
            multi_generation: 0,
            waiters: BTreeMap::new(),
            next_waiter: 0,
            observer: None,
            flush_pending: false,
            flush_frame: None,
            sweep: None,
            counters: Counters::default(),
            destroyed: false,
        }
    }
}

impl<N: Clone + Eq + Hash> State<N> {
    /// Forget the scope ids among `candidates` that no cached entry refers
    /// to any more, so the map never outgrows the entries.
    fn release_scopes(&mut self, candidates: impl IntoIterator<Item = ScopeId>) -> usize {
        let mut unused: BTreeSet<u64> = candidates
            .into_iter()
            .filter_map(|scope| match scope {
                ScopeId::Node(id) => Some(id),
                ScopeId::Root => None,
            })
            .collect();
        if unused.is_empty() {
            return 0;
        }
        for key in self.single.keys().chain(self.multi.keys()) {
            if let ScopeId::Node(id) = key.scope() {
                unused.remove(&id);
            }
        }
        self.scopes.release(&unused)
    }
}

struct Inner<T: NodeTree> {
    tree: Arc<T>,
    scheduler: Arc<dyn Scheduler>,
    config: CacheConfig,
    state: Mutex<State<T::Node>>,
    /// Handed to scheduled callbacks so they never keep the cache alive.
    this: Weak<Inner<T>>,
}

/// Adaptive cache of tree lookups.
///
/// Cloning is cheap; all clones share one cache.
pub struct QueryCache<T: NodeTree> {
    inner: Arc<Inner<T>>,
}

impl<T: NodeTree> Clone for QueryCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: NodeTree> fmt::Debug for QueryCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<T: NodeTree> QueryCache<T> {
    /// Create a cache over `tree`. The background sweep is not armed until
    /// [`QueryCache::start`] is called.
    pub fn new(tree: Arc<T>, scheduler: Arc<dyn Scheduler>, config: CacheConfig) -> Self {
        let inner = Arc::new_cyclic(|this| Inner {
            tree,
            scheduler,
            config,
            state: Mutex::new(State::default()),
            this: this.clone(),
        });
        Self { inner }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Arm the periodic sweep. Calling it again while armed does nothing.
    pub fn start(&self) {
        self.inner.arm_sweep();
    }

    /// First node matching `pattern` under `scope`.
    ///
    /// A cached node that is no longer attached counts as a miss even inside
    /// its TTL. `skip_cache` goes straight to the tree and leaves the cache
    /// untouched.
    pub fn get(
        &self,
        pattern: &str,
        scope: Option<&T::Node>,
        skip_cache: bool,
    ) -> Result<Option<T::Node>, QueryError> {
        self.inner.get(pattern, scope, skip_cache)
    }

    /// Every node matching `pattern` under `scope`.
    ///
    /// Only the first and last cached nodes are checked for attachment.
    pub fn get_all(
        &self,
        pattern: &str,
        scope: Option<&T::Node>,
        skip_cache: bool,
    ) -> Result<Vec<T::Node>, QueryError> {
        self.inner.get_all(pattern, scope, skip_cache)
    }

    /// Drop cached entries. `None` clears everything; `Some(fragment)` drops
    /// entries whose rendered key contains `fragment`. Returns the number of
    /// entries removed.
    pub fn invalidate(&self, pattern: Option<&str>) -> usize {
        self.inner.invalidate(pattern)
    }

    /// Resolve once `pattern` matches under `scope`, or with `None` after
    /// `timeout`.
    ///
    /// The current tree is checked first; a match returns an already
    /// resolved wait. Otherwise the wait resolves exactly once, from
    /// whichever of the mutation flush, the poll or the timeout gets there
    /// first.
    pub fn wait_for(
        &self,
        pattern: &str,
        timeout: Duration,
        scope: Option<&T::Node>,
    ) -> Result<PendingWait<T::Node>, QueryError> {
        if let Some(node) = self.inner.get(pattern, scope, false)? {
            return Ok(PendingWait::ready(Some(node)));
        }
        Ok(self.inner.register_wait(pattern, timeout, scope))
    }

    /// Run one sweep pass now. Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        self.inner.sweep_once()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.lock();
        CacheStats {
            hits: state.counters.hits,
            misses: state.counters.misses,
            bypasses: state.counters.bypasses,
            evictions: state.counters.evictions,
            sweeps: state.counters.sweeps,
            swept: state.counters.swept,
            entry_count: state.single.len(),
            multi_entry_count: state.multi.len(),
            scope_ids: state.scopes.len(),
            pending_waits: state.waiters.len(),
            observer_active: state.observer.is_some(),
        }
    }

    /// Handle for [`warden_core::LifecycleHub::subscribe`]. Navigation
    /// signals clear the cache.
    pub fn lifecycle_listener(&self) -> Arc<dyn LifecycleListener> {
        self.inner.clone()
    }

    /// Tear the cache down: disconnect the shared observer, cancel every
    /// timer the cache owns, resolve pending waits to `None` and clear both
    /// stores. Idempotent.
    pub fn destroy(&self) {
        self.inner.destroy();
    }
}

impl<T: NodeTree> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, State<T::Node>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    fn get(
        &self,
        pattern: &str,
        scope: Option<&T::Node>,
        skip_cache: bool,
    ) -> Result<Option<T::Node>, QueryError> {
        if skip_cache {
            self.lock().counters.bypasses += 1;
            return self.tree.query(pattern, scope);
        }

        let now = self.scheduler.now();
        let (key, cached) = {
            let mut state = self.lock();
            let key = state.scopes.key_for(pattern, scope);
            let cached = state.single.get(&key).and_then(|entry| {
                let ttl = self.config.ttl_for(entry.value.is_some());
                (now.saturating_duration_since(entry.inserted_at) < ttl).then(|| entry.value.clone())
            });
            (key, cached)
        };

        if let Some(value) = cached {
            let live = value.as_ref().map_or(true, |node| self.tree.is_attached(node));
            if live {
                self.lock().counters.hits += 1;
                return Ok(value);
            }
        }

        let value = self.tree.query(pattern, scope)?;
        let mut state = self.lock();
        state.counters.misses += 1;
        if let Some(evicted) = state.single.insert(key, value.clone(), now, self.config.max_entries) {
            state.counters.evictions += 1;
            let released = state.release_scopes([evicted.scope()]);
            debug!(key = %evicted, released, "cache.evict");
        }
        Ok(value)
    }

    fn get_all(
        &self,
        pattern: &str,
        scope: Option<&T::Node>,
        skip_cache: bool,
    ) -> Result<Vec<T::Node>, QueryError> {
        if skip_cache {
            self.lock().counters.bypasses += 1;
            return self.tree.query_all(pattern, scope);
        }

        let (key, cached) = {
            let mut state = self.lock();
            let key = state.scopes.key_for(pattern, scope);
            let cached = state.multi.get(&key).map(|entry| {
                let endpoints = entry
                    .endpoints()
                    .map(|(first, last)| (first.clone(), last.clone()));
                (entry.values.clone(), endpoints)
            });
            (key, cached)
        };

        if let Some((values, endpoints)) = cached {
            let valid = endpoints.map_or(true, |(first, last)| {
                self.tree.is_attached(&first) && self.tree.is_attached(&last)
            });
            if valid {
                self.lock().counters.hits += 1;
                return Ok(values);
            }
        }

        let values = self.tree.query_all(pattern, scope)?;
        let ttl = self.config.ttl_for(!values.is_empty());

        let generation = {
            let mut state = self.lock();
            state.counters.misses += 1;
            if state.destroyed {
                return Ok(values);
            }
            state.multi_generation += 1;
            state.multi_generation
        };

        let this = self.this.clone();
        let expiry_key = key.clone();
        let expiry = self.scheduler.set_timeout(
            ttl,
            Box::new(move || {
                if let Some(inner) = this.upgrade() {
                    inner.expire_multi(&expiry_key, generation);
                }
            }),
        );

        let stale = {
            let mut state = self.lock();
            if state.destroyed {
                Some(expiry)
            } else {
                let entry = MultiCacheEntry {
                    values: values.clone(),
                    expiry,
                    generation,
                };
                state.multi.insert(key, entry).map(|old| old.expiry)
            }
        };
        if let Some(timer) = stale {
            self.scheduler.clear_timeout(timer);
        }
        Ok(values)
    }

    fn expire_multi(&self, key: &CacheKey, generation: u64) {
        let mut state = self.lock();
        if state.multi.get(key).is_some_and(|e| e.generation == generation) {
            state.multi.remove(key);
            let released = state.release_scopes([key.scope()]);
            trace!(key = %key, released, "cache.expire_multi");
        }
    }

    fn invalidate(&self, pattern: Option<&str>) -> usize {
        let (removed, timers) = {
            let mut state = self.lock();
            match pattern {
                None => {
                    let removed = state.single.len() + state.multi.len();
                    state.single.clear();
                    state.scopes.clear();
                    let timers: Vec<TimerId> = state.multi.drain().map(|(_, e)| e.expiry).collect();
                    (removed, timers)
                }
                Some(fragment) => {
                    let single: Vec<CacheKey> = state
                        .single
                        .keys()
                        .filter(|k| k.contains(fragment))
                        .cloned()
                        .collect();
                    for key in &single {
                        state.single.remove(key);
                    }
                    let doomed: Vec<CacheKey> = state
                        .multi
                        .keys()
                        .filter(|k| k.contains(fragment))
                        .cloned()
                        .collect();
                    let timers: Vec<TimerId> = doomed
                        .iter()
                        .filter_map(|k| state.multi.remove(k))
                        .map(|e| e.expiry)
                        .collect();
                    let scopes: Vec<ScopeId> =
                        single.iter().chain(&doomed).map(CacheKey::scope).collect();
                    state.release_scopes(scopes);
                    (single.len() + timers.len(), timers)
                }
            }
        };

        for timer in timers {
            self.scheduler.clear_timeout(timer);
        }
        debug!(pattern = pattern.unwrap_or("*"), removed, "cache.invalidate");
        removed
    }

    // ------------------------------------------------------------------
    // Sweep
    // ------------------------------------------------------------------

    fn arm_sweep(&self) {
        {
            let state = self.lock();
            if state.destroyed || state.sweep.is_some() {
                return;
            }
        }

        let this = self.this.clone();
        let id = self.scheduler.set_timeout(
            self.config.sweep_interval,
            Box::new(move || {
                if let Some(inner) = this.upgrade() {
                    inner.on_sweep_timer();
                }
            }),
        );

        let mut state = self.lock();
        if state.destroyed || state.sweep.is_some() {
            drop(state);
            self.scheduler.clear_timeout(id);
            return;
        }
        state.sweep = Some(SweepTimer::Delay(id));
    }

    /// The sweep delay elapsed: hand the pass to idle time when the host
    /// supports it, otherwise run it right here.
    fn on_sweep_timer(&self) {
        {
            let mut state = self.lock();
            state.sweep = None;
            if state.destroyed {
                return;
            }
        }

        let this = self.this.clone();
        let task = Box::new(move || {
            if let Some(inner) = this.upgrade() {
                inner.run_scheduled_sweep();
            }
        });
        match self.scheduler.request_idle(task) {
            Ok(id) => {
                let mut state = self.lock();
                if state.destroyed {
                    drop(state);
                    self.scheduler.cancel_idle(id);
                } else {
                    state.sweep = Some(SweepTimer::Idle(id));
                }
            }
            Err(task) => task(),
        }
    }

    fn run_scheduled_sweep(&self) {
        {
            let mut state = self.lock();
            if matches!(state.sweep, Some(SweepTimer::Idle(_))) {
                state.sweep = None;
            }
            if state.destroyed {
                return;
            }
        }
        self.sweep_once();
        self.arm_sweep();
    }

    /// Remove up to `max_sweep_deletions` expired or detached single
    /// entries, oldest first, then drop every entry scoped under a detached
    /// scope node along with that node's id.
    fn sweep_once(&self) -> usize {
        let now = self.scheduler.now();
        let (snapshot, scope_nodes) = {
            let state = self.lock();
            (state.single.snapshot(), state.scopes.assigned())
        };
        let limit = self.config.max_sweep_deletions;

        let mut doomed = Vec::new();
        for (key, value, inserted_at) in snapshot {
            if doomed.len() >= limit {
                break;
            }
            let expired =
                now.saturating_duration_since(inserted_at) >= self.config.ttl_for(value.is_some());
            let detached = !expired && value.as_ref().is_some_and(|node| !self.tree.is_attached(node));
            if expired || detached {
                doomed.push((key, inserted_at));
            }
        }
        let dead_scopes: BTreeSet<u64> = scope_nodes
            .into_iter()
            .filter(|(node, _)| !self.tree.is_attached(node))
            .map(|(_, id)| id)
            .collect();

        let (removed, released, remaining, timers) = {
            let mut state = self.lock();
            let mut removed = 0;
            let mut candidates = Vec::new();
            for (key, inserted_at) in doomed {
                // Skip entries refreshed while the lock was released.
                if state.single.get(&key).is_some_and(|e| e.inserted_at == inserted_at) {
                    state.single.remove(&key);
                    candidates.push(key.scope());
                    removed += 1;
                }
            }

            let mut timers = Vec::new();
            if !dead_scopes.is_empty() {
                let under_dead =
                    |key: &CacheKey| matches!(key.scope(), ScopeId::Node(id) if dead_scopes.contains(&id));
                removed += state.single.remove_where(under_dead);
                let multi: Vec<CacheKey> = state.multi.keys().filter(|k| under_dead(k)).cloned().collect();
                for key in multi {
                    if let Some(entry) = state.multi.remove(&key) {
                        timers.push(entry.expiry);
                        removed += 1;
                    }
                }
                candidates.extend(dead_scopes.iter().map(|id| ScopeId::Node(*id)));
            }

            let released = state.release_scopes(candidates);
            state.counters.sweeps += 1;
            state.counters.swept += removed as u64;
            (removed, released, state.single.len(), timers)
        };

        for timer in timers {
            self.scheduler.clear_timeout(timer);
        }
        debug!(removed, released, remaining, "cache.sweep");
        removed
    }

    // ------------------------------------------------------------------
    // Waits
    // ------------------------------------------------------------------

    fn register_wait(
        &self,
        pattern: &str,
        timeout: Duration,
        scope: Option<&T::Node>,
    ) -> PendingWait<T::Node> {
        let (sender, receiver) = oneshot::channel();
        let id = {
            let mut state = self.lock();
            if state.destroyed {
                return PendingWait::ready(None);
            }
            state.next_waiter += 1;
            let id = state.next_waiter;
            state.waiters.insert(id, Waiter::new(pattern, scope.cloned(), sender));
            id
        };

        let this = self.this.clone();
        let timeout_id = self.scheduler.set_timeout(
            timeout,
            Box::new(move || {
                if let Some(inner) = this.upgrade() {
                    trace!(waiter = id, "cache.wait_timeout");
                    inner.resolve(id, None);
                }
            }),
        );

        let polling = self.config.polls(pattern);
        let poll_id = polling.then(|| {
            let this = self.this.clone();
            self.scheduler.set_interval(
                self.config.poll_interval,
                Arc::new(move || {
                    if let Some(inner) = this.upgrade() {
                        inner.poll_waiter(id);
                    }
                }),
            )
        });

        let attached = {
            let mut state = self.lock();
            match state.waiters.get_mut(&id) {
                Some(waiter) => {
                    waiter.timeout = Some(timeout_id);
                    waiter.poll = poll_id;
                    true
                }
                None => false,
            }
        };
        if !attached {
            // Already resolved before its timers were recorded.
            self.scheduler.clear_timeout(timeout_id);
            if let Some(poll) = poll_id {
                self.scheduler.clear_interval(poll);
            }
        } else if !polling {
            self.ensure_observer();
        }

        trace!(waiter = id, pattern, polling, "cache.wait");
        PendingWait::waiting(receiver)
    }

    fn ensure_observer(&self) {
        {
            let state = self.lock();
            if state.observer.is_some() || state.destroyed {
                return;
            }
        }

        let this = self.this.clone();
        let mut observer = self.tree.observe(Arc::new(move |batch: &MutationBatch| {
            if let Some(inner) = this.upgrade() {
                inner.on_mutations(batch);
            }
        }));

        let mut state = self.lock();
        if state.observer.is_none() && !state.destroyed {
            state.observer = Some(observer);
            debug!("cache.observe");
            return;
        }
        drop(state);
        if let Err(err) = observer.disconnect() {
            warn!(error = %err, "cache.observer_disconnect_failed");
        }
    }

    /// Mark waiters dirty and request a single frame flush.
    fn on_mutations(&self, batch: &MutationBatch) {
        if batch.is_empty() {
            return;
        }
        {
            let mut state = self.lock();
            if state.destroyed || state.waiters.is_empty() || state.flush_pending {
                return;
            }
            state.flush_pending = true;
        }

        let this = self.this.clone();
        let frame = self.scheduler.request_animation_frame(Box::new(move || {
            if let Some(inner) = this.upgrade() {
                inner.flush();
            }
        }));

        let mut state = self.lock();
        if state.flush_pending && !state.destroyed {
            state.flush_frame = Some(frame);
        } else {
            drop(state);
            self.scheduler.cancel_animation_frame(frame);
        }
    }

    /// Check every waiter once against the live tree.
    fn flush(&self) {
        let pending: Vec<(u64, String, Option<T::Node>)> = {
            let mut state = self.lock();
            state.flush_pending = false;
            state.flush_frame = None;
            if state.destroyed {
                return;
            }
            state
                .waiters
                .iter()
                .map(|(id, w)| (*id, w.pattern.clone(), w.scope.clone()))
                .collect()
        };

        let mut resolved = 0usize;
        for (id, pattern, scope) in pending {
            match self.tree.query(&pattern, scope.as_ref()) {
                Ok(Some(node)) => {
                    if self.resolve(id, Some(node)) {
                        resolved += 1;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(waiter = id, error = %err, "cache.flush_query_failed"),
            }
        }
        trace!(resolved, "cache.flush");
    }

    fn poll_waiter(&self, id: u64) {
        let target = {
            let state = self.lock();
            state.waiters.get(&id).map(|w| (w.pattern.clone(), w.scope.clone()))
        };
        let Some((pattern, scope)) = target else {
            return;
        };
        match self.tree.query(&pattern, scope.as_ref()) {
            Ok(Some(node)) => {
                self.resolve(id, Some(node));
            }
            Ok(None) => {}
            Err(err) => warn!(waiter = id, error = %err, "cache.poll_query_failed"),
        }
    }

    /// Remove waiter `id` and deliver `value`. Only the caller that removes
    /// the waiter delivers, which keeps every wait single-shot.
    fn resolve(&self, id: u64, value: Option<T::Node>) -> bool {
        let Some(waiter) = self.lock().waiters.remove(&id) else {
            return false;
        };
        if let Some(timer) = waiter.timeout {
            self.scheduler.clear_timeout(timer);
        }
        if let Some(poll) = waiter.poll {
            self.scheduler.clear_interval(poll);
        }
        waiter.resolve(value);
        true
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    fn destroy(&self) {
        let (observer, frame, sweep, multi_timers, waiters) = {
            let mut state = self.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            state.flush_pending = false;
            state.single.clear();
            state.scopes.clear();
            let multi_timers: Vec<TimerId> = state.multi.drain().map(|(_, e)| e.expiry).collect();
            (
                state.observer.take(),
                state.flush_frame.take(),
                state.sweep.take(),
                multi_timers,
                std::mem::take(&mut state.waiters),
            )
        };

        if let Some(mut observer) = observer {
            if let Err(err) = observer.disconnect() {
                warn!(error = %err, "cache.observer_disconnect_failed");
            }
        }
        if let Some(frame) = frame {
            self.scheduler.cancel_animation_frame(frame);
        }
        match sweep {
            Some(SweepTimer::Delay(id)) => {
                self.scheduler.clear_timeout(id);
            }
            Some(SweepTimer::Idle(id)) => {
                self.scheduler.cancel_idle(id);
            }
            None => {}
        }
        for timer in multi_timers {
            self.scheduler.clear_timeout(timer);
        }

        let pending = waiters.len();
        for waiter in waiters.into_values() {
            if let Some(timer) = waiter.timeout {
                self.scheduler.clear_timeout(timer);
            }
            if let Some(poll) = waiter.poll {
                self.scheduler.clear_interval(poll);
            }
            waiter.resolve(None);
        }
        debug!(pending_waits = pending, "cache.destroy");
    }
}

impl<T: NodeTree> LifecycleListener for Inner<T> {
    fn on_signal(&self, signal: LifecycleSignal) {
        if signal.is_navigation() {
            self.invalidate(None);
        }
    }
}

impl<T: NodeTree> Drop for Inner<T> {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(mut observer) = state.observer.take() {
            let _ = observer.disconnect();
        }
    }
}
