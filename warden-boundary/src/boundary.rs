//! The error boundary.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use warden_core::{
    panic_message, BoundaryConfig, BreakerConfig, CircuitState, Clock, ErrorContext, ErrorKind,
    ErrorRecord, KeyValueStore, LifecycleListener, LifecycleSignal, Notice, Notifier, Severity,
    Timestamp,
};

use crate::breaker::CircuitBreaker;
use crate::classify::classify;
use crate::log::{self, ErrorLog};
use crate::recovery::{Recovery, RecoveryHook};

/// Snapshot of the boundary for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundaryStats {
    /// Records currently held in the in-memory log.
    pub total_errors: usize,
    /// Records stamped within the notification window.
    pub recent_errors: usize,
    pub last_error_at: Option<Timestamp>,
    pub recovering: bool,
    pub by_severity: BTreeMap<Severity, usize>,
    pub circuit_state: CircuitState,
}

/// Wraps feature entry points so their failures are contained.
///
/// A failing call is classified, logged, persisted, fed to the circuit
/// breaker and to recovery hooks, possibly surfaced to the user, and turned
/// into `None`. Nothing escapes to the caller.
pub struct ErrorBoundary {
    config: BoundaryConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
    breaker: CircuitBreaker,
    log: Mutex<ErrorLog>,
    recovery: Recovery,
}

impl ErrorBoundary {
    /// Build a boundary, restoring any persisted records from `store`.
    pub fn new(
        config: BoundaryConfig,
        breaker: BreakerConfig,
        clock: Arc<dyn Clock>,
        store: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let restored = log::load(store.as_ref(), &config.storage_key, config.max_persisted);
        if !restored.is_empty() {
            debug!(records = restored.len(), "boundary.restore");
        }
        let log = ErrorLog::new(config.max_records, config.max_persisted).with_records(restored);
        Self {
            breaker: CircuitBreaker::new(breaker, clock.clone()),
            recovery: Recovery::new(config.max_recovery_attempts, config.recovery_window),
            log: Mutex::new(log),
            config,
            clock,
            store,
            notifier,
        }
    }

    fn log(&self) -> MutexGuard<'_, ErrorLog> {
        self.log.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    // ------------------------------------------------------------------
    // Wrapping
    // ------------------------------------------------------------------

    /// Run `f` under the boundary. `None` when the circuit is open or `f`
    /// failed or panicked.
    pub fn call<T, E, F>(&self, label: &str, f: F) -> Option<T>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display,
    {
        if !self.breaker.is_allowed() {
            debug!(label, "boundary.short_circuit");
            return None;
        }
        match catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(value)) => {
                self.breaker.record_success();
                Some(value)
            }
            Ok(Err(err)) => {
                self.handle_failure(label, err.to_string(), ErrorKind::Failure);
                None
            }
            Err(payload) => {
                self.handle_failure(label, panic_message(payload.as_ref()), ErrorKind::Panic);
                None
            }
        }
    }

    /// Reusable wrapped entry point.
    pub fn wrap<T, E, F>(self: &Arc<Self>, label: impl Into<String>, f: F) -> impl Fn() -> Option<T>
    where
        F: Fn() -> Result<T, E>,
        E: Display,
    {
        let boundary = Arc::clone(self);
        let label = label.into();
        move || boundary.call(&label, &f)
    }

    /// Await `fut` under the boundary. Panics while polling are caught.
    pub async fn call_async<T, E, Fut>(&self, label: &str, fut: Fut) -> Option<T>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        if !self.breaker.is_allowed() {
            debug!(label, "boundary.short_circuit");
            return None;
        }
        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(value)) => {
                self.breaker.record_success();
                Some(value)
            }
            Ok(Err(err)) => {
                self.handle_failure(label, err.to_string(), ErrorKind::Failure);
                None
            }
            Err(payload) => {
                self.handle_failure(label, panic_message(payload.as_ref()), ErrorKind::Panic);
                None
            }
        }
    }

    /// Reusable wrapped async entry point.
    pub fn wrap_async<T, E, Fut, F>(
        self: &Arc<Self>,
        label: impl Into<String>,
        f: F,
    ) -> impl Fn() -> BoxFuture<'static, Option<T>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let boundary = Arc::clone(self);
        let label: Arc<str> = Arc::from(label.into());
        move || {
            let boundary = Arc::clone(&boundary);
            let label = Arc::clone(&label);
            let fut = f();
            async move { boundary.call_async(&label, fut).await }.boxed()
        }
    }

    /// Register a recovery hook for `module`; `"*"` runs for every module.
    pub fn register_recovery(
        &self,
        module: impl Into<String>,
        hook: impl Fn(&ErrorRecord) + Send + Sync + 'static,
    ) {
        let hook: RecoveryHook = Arc::new(hook);
        self.recovery.register(module, hook);
    }

    // ------------------------------------------------------------------
    // Failure handling
    // ------------------------------------------------------------------

    fn handle_failure(&self, label: &str, message: String, kind: ErrorKind) {
        let severity = classify(&message);
        let now = self.clock.wall_now();
        let context = ErrorContext::new(label, kind);

        let mut record = ErrorRecord::new(now, message, severity, context);
        if kind == ErrorKind::Panic {
            let trace = std::backtrace::Backtrace::capture();
            if trace.status() == std::backtrace::BacktraceStatus::Captured {
                record = record.with_stack(trace.to_string());
            }
        }

        error!(
            label,
            module = %record.context.module,
            severity = %severity,
            kind = ?kind,
            error = %record.message,
            "boundary.failure"
        );

        let (notify, payload) = {
            let mut log = self.log();
            let notify = self.should_notify(&log, &record);
            log.push(record.clone());
            (notify, log.persisted_payload())
        };
        log::persist(self.store.as_ref(), &self.config.storage_key, payload);

        self.breaker.record_failure();

        if severity != Severity::Critical {
            self.recovery.attempt(&record, self.clock.now());
        }

        if notify {
            self.notifier
                .notify(&Notice::for_failure(severity, label, &record.message));
        } else {
            debug!(label, severity = %severity, "boundary.notice_suppressed");
        }
    }

    /// Decided against the log as it was before `record` is added.
    fn should_notify(&self, log: &ErrorLog, record: &ErrorRecord) -> bool {
        match record.severity {
            Severity::Low => false,
            Severity::Critical => true,
            severity => {
                let now = record.timestamp;
                let flooded = log.count_since(now, self.config.notify_window) > self.config.notify_rate_limit;
                let duplicate =
                    log.has_duplicate(&record.message, severity, now, self.config.duplicate_window);
                !flooded && !duplicate
            }
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn stats(&self) -> BoundaryStats {
        let now = self.clock.wall_now();
        let log = self.log();
        BoundaryStats {
            total_errors: log.len(),
            recent_errors: log.count_since(now, self.config.notify_window),
            last_error_at: log.last().map(|r| r.timestamp),
            recovering: self.recovery.is_recovering(),
            by_severity: log.by_severity(),
            circuit_state: self.breaker.state(),
        }
    }

    /// The `n` most recent records, newest last.
    pub fn recent_errors(&self, n: usize) -> Vec<ErrorRecord> {
        self.log().recent(n)
    }

    /// Empty the in-memory log and drop the persisted copy.
    pub fn clear_errors(&self) {
        self.log().clear();
        if let Err(err) = self.store.remove(&self.config.storage_key) {
            tracing::warn!(key = %self.config.storage_key, error = %err, "boundary.clear_failed");
        }
    }
}

impl LifecycleListener for ErrorBoundary {
    fn on_signal(&self, signal: LifecycleSignal) {
        if signal.is_navigation() {
            self.recovery.reset();
        }
    }
}

impl std::fmt::Debug for ErrorBoundary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorBoundary")
            .field("breaker", &self.breaker)
            .field("recovery", &self.recovery)
            .field("records", &self.log().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_test_utils::{ManualScheduler, MemoryStore, RecordingNotifier};

    fn boundary() -> (Arc<MemoryStore>, Arc<RecordingNotifier>, ErrorBoundary) {
        let store = Arc::new(MemoryStore::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let boundary = ErrorBoundary::new(
            BoundaryConfig::default(),
            BreakerConfig::default(),
            Arc::new(ManualScheduler::new()),
            store.clone(),
            notifier.clone(),
        );
        (store, notifier, boundary)
    }

    #[test]
    fn test_success_passes_value_through() {
        let (_store, notifier, boundary) = boundary();
        let value = boundary.call("overlay.render", || Ok::<_, String>(42));
        assert_eq!(value, Some(42));
        assert_eq!(notifier.count(), 0);
        assert_eq!(boundary.stats().total_errors, 0);
    }

    #[test]
    fn test_failure_becomes_none_and_is_recorded() {
        let (_store, notifier, boundary) = boundary();
        let value: Option<u32> = boundary.call("overlay.render", || Err("Cannot read property 'x'"));
        assert_eq!(value, None);

        let records = boundary.recent_errors(5);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].severity, Severity::Medium);
        assert_eq!(records[0].context.module, "overlay");
        assert_eq!(records[0].context.kind, ErrorKind::Failure);
        assert_eq!(notifier.count(), 1);
    }

    #[test]
    fn test_panic_is_caught() {
        let (_store, _notifier, boundary) = boundary();
        let value: Option<u32> = boundary.call("overlay.render", || -> Result<u32, String> {
            panic!("x.map is not a function")
        });
        assert_eq!(value, None);
        let record = &boundary.recent_errors(1)[0];
        assert_eq!(record.context.kind, ErrorKind::Panic);
        assert_eq!(record.severity, Severity::High);
    }

    #[test]
    fn test_low_severity_never_notifies() {
        let (_store, notifier, boundary) = boundary();
        let _: Option<()> = boundary.call("net.fetch", || Err("Network request failed"));
        assert_eq!(notifier.count(), 0);
        assert_eq!(boundary.stats().total_errors, 1);
    }
}
