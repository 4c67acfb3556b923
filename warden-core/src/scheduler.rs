//! Scheduler backed by a tokio runtime.
//!
//! Timers are spawned tasks tracked by abort handles. Animation frames are
//! emulated with a fixed frame interval and idle callbacks are not supported,
//! so callers take their plain-timer fallback.

use crate::constants::FRAME_INTERVAL_MS;
use crate::error::HostError;
use crate::host::{Clock, RepeatingTask, Scheduler, Task};
use crate::ids::{FrameId, IdSequence, TimerId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

type TaskTable = Arc<Mutex<HashMap<u64, AbortHandle>>>;

/// [`Scheduler`] implementation on a tokio runtime handle.
///
/// Uses `tokio::time`, so paused test time drives it as well.
pub struct TokioScheduler {
    handle: Handle,
    ids: IdSequence,
    timers: TaskTable,
    frames: TaskTable,
    frame_interval: Duration,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            ids: IdSequence::new(),
            timers: Arc::new(Mutex::new(HashMap::new())),
            frames: Arc::new(Mutex::new(HashMap::new())),
            frame_interval: Duration::from_millis(FRAME_INTERVAL_MS),
        }
    }

    /// Scheduler on the runtime the caller is running in.
    pub fn current() -> Result<Self, HostError> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| HostError::Timer {
                reason: format!("no tokio runtime: {}", e),
            })
    }

    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = interval;
        self
    }

    /// Number of timers (one-shot and repeating) still armed.
    pub fn pending_timers(&self) -> usize {
        lock(&self.timers).len()
    }

    pub fn pending_frames(&self) -> usize {
        lock(&self.frames).len()
    }

    fn spawn_once(&self, table: &TaskTable, delay: Duration, task: Task) -> u64 {
        let id = self.ids.next();
        let owned = Arc::clone(table);
        // Holding the table lock across spawn keeps the task from removing its
        // entry before it has been inserted.
        let mut guard = lock(table);
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            let armed = lock(&owned).remove(&id).is_some();
            if armed {
                task();
            }
        });
        guard.insert(id, join.abort_handle());
        id
    }

    fn cancel(table: &TaskTable, id: u64) -> bool {
        match lock(table).remove(&id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

fn lock(table: &TaskTable) -> std::sync::MutexGuard<'_, HashMap<u64, AbortHandle>> {
    table.lock().unwrap_or_else(|e| e.into_inner())
}

impl Clock for TokioScheduler {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

impl Scheduler for TokioScheduler {
    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId {
        TimerId(self.spawn_once(&self.timers, delay, task))
    }

    fn clear_timeout(&self, id: TimerId) -> bool {
        Self::cancel(&self.timers, id.0)
    }

    fn set_interval(&self, period: Duration, task: RepeatingTask) -> TimerId {
        let id = self.ids.next();
        let mut guard = lock(&self.timers);
        let join = self.handle.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                task();
            }
        });
        guard.insert(id, join.abort_handle());
        TimerId(id)
    }

    fn clear_interval(&self, id: TimerId) -> bool {
        Self::cancel(&self.timers, id.0)
    }

    fn request_animation_frame(&self, task: Task) -> FrameId {
        FrameId(self.spawn_once(&self.frames, self.frame_interval, task))
    }

    fn cancel_animation_frame(&self, id: FrameId) -> bool {
        Self::cancel(&self.frames, id.0)
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, handle) in lock(&self.timers).drain() {
            handle.abort();
        }
        for (_, handle) in lock(&self.frames).drain() {
            handle.abort();
        }
    }
}

impl std::fmt::Debug for TokioScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokioScheduler")
            .field("pending_timers", &self.pending_timers())
            .field("pending_frames", &self.pending_frames())
            .field("frame_interval", &self.frame_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn settle(d: Duration) {
        tokio::time::sleep(d).await;
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_once_after_delay() {
        let scheduler = TokioScheduler::current().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        scheduler.set_timeout(
            Duration::from_millis(100),
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );

        settle(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        settle(Duration::from_millis(60)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleared_timeout_never_fires() {
        let scheduler = TokioScheduler::current().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let id = scheduler.set_timeout(
            Duration::from_millis(100),
            Box::new(move || {
                f.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(scheduler.clear_timeout(id));
        assert!(!scheduler.clear_timeout(id));
        settle(Duration::from_millis(500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_repeats_until_cleared() {
        let scheduler = TokioScheduler::current().unwrap();
        let ticks = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&ticks);
        let id = scheduler.set_interval(
            Duration::from_millis(10),
            Arc::new(move || {
                t.fetch_add(1, Ordering::SeqCst);
            }),
        );

        settle(Duration::from_millis(35)).await;
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected at least 3 ticks, saw {}", seen);

        assert!(scheduler.clear_interval(id));
        settle(Duration::from_millis(100)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_is_unsupported() {
        let scheduler = TokioScheduler::current().unwrap();
        assert!(scheduler.request_idle(Box::new(|| {})).is_err());
    }

    #[test]
    fn test_current_without_runtime_fails() {
        assert!(TokioScheduler::current().is_err());
    }
}
