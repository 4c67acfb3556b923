//! Bounded recovery hooks keyed by module.

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, warn};
use warden_core::{panic_message, ErrorRecord};

/// Hook run after a failure in its module.
pub type RecoveryHook = Arc<dyn Fn(&ErrorRecord) + Send + Sync + 'static>;

/// Module key whose hooks run for every module.
pub const ANY_MODULE: &str = "*";

#[derive(Default)]
struct Hooks {
    by_module: HashMap<String, Vec<RecoveryHook>>,
    /// Attempt times per module inside the current window.
    attempts: HashMap<String, VecDeque<Instant>>,
}

pub struct Recovery {
    max_attempts: u32,
    window: Duration,
    hooks: Mutex<Hooks>,
    recovering: AtomicBool,
}

impl Recovery {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            hooks: Mutex::new(Hooks::default()),
            recovering: AtomicBool::new(false),
        }
    }

    fn hooks(&self) -> MutexGuard<'_, Hooks> {
        self.hooks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, module: impl Into<String>, hook: RecoveryHook) {
        self.hooks().by_module.entry(module.into()).or_default().push(hook);
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering.load(Ordering::SeqCst)
    }

    /// Run the hooks for `record`'s module (and wildcard hooks) unless the
    /// module used up its attempts in the current window. Returns the number
    /// of hooks run.
    pub fn attempt(&self, record: &ErrorRecord, now: Instant) -> usize {
        let module = record.context.module.as_str();
        let hooks: Vec<RecoveryHook> = {
            let mut state = self.hooks();
            let attempts = state.attempts.entry(module.to_string()).or_default();
            while attempts
                .front()
                .is_some_and(|at| now.saturating_duration_since(*at) >= self.window)
            {
                attempts.pop_front();
            }
            if attempts.len() >= self.max_attempts as usize {
                debug!(module, attempts = attempts.len(), "boundary.recovery_exhausted");
                return 0;
            }
            attempts.push_back(now);

            let mut hooks = state.by_module.get(module).cloned().unwrap_or_default();
            if module != ANY_MODULE {
                if let Some(any) = state.by_module.get(ANY_MODULE) {
                    hooks.extend(any.iter().cloned());
                }
            }
            hooks
        };

        if hooks.is_empty() {
            return 0;
        }

        self.recovering.store(true, Ordering::SeqCst);
        for hook in &hooks {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook(record))) {
                warn!(
                    module,
                    error = %panic_message(payload.as_ref()),
                    "boundary.recovery_failed"
                );
            }
        }
        self.recovering.store(false, Ordering::SeqCst);
        debug!(module, hooks = hooks.len(), "boundary.recovery");
        hooks.len()
    }

    /// Forget attempt windows and clear the recovering flag.
    pub fn reset(&self) {
        self.hooks().attempts.clear();
        self.recovering.store(false, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for Recovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hooks = self.hooks();
        f.debug_struct("Recovery")
            .field("modules", &hooks.by_module.len())
            .field("recovering", &self.is_recovering())
            .finish()
    }
}
