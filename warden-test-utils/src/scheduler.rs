//! Deterministic virtual-time scheduler.
//!
//! Nothing runs until the test calls [`ManualScheduler::advance`]; due tasks
//! then run in deadline order with the clock set to each task's deadline.
//! Tasks run without internal locks held, so they may schedule or cancel.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use warden_core::constants::FRAME_INTERVAL_MS;
use warden_core::{Clock, FrameId, IdSequence, RepeatingTask, Scheduler, Task, TimerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Kind {
    Timeout,
    Interval,
    Frame,
    Idle,
}

enum Job {
    Once(Task),
    Repeat(RepeatingTask, Duration),
}

/// Queue position: deadline, then insertion order.
type Slot = (Duration, u64);

#[derive(Default)]
struct State {
    now: Duration,
    seq: u64,
    queue: BTreeMap<Slot, (Kind, u64, Job)>,
    index: HashMap<(Kind, u64), Slot>,
    fired: usize,
}

impl State {
    fn push(&mut self, kind: Kind, id: u64, due: Duration, job: Job) {
        self.seq += 1;
        let slot = (due, self.seq);
        self.queue.insert(slot, (kind, id, job));
        self.index.insert((kind, id), slot);
    }

    fn cancel(&mut self, kind: Kind, id: u64) -> bool {
        match self.index.remove(&(kind, id)) {
            Some(slot) => self.queue.remove(&slot).is_some(),
            None => false,
        }
    }

    fn count(&self, kind: Kind) -> usize {
        self.index.keys().filter(|(k, _)| *k == kind).count()
    }
}

/// [`Scheduler`] whose clock only moves when the test says so.
pub struct ManualScheduler {
    base: Instant,
    base_wall: DateTime<Utc>,
    ids: IdSequence,
    frame_interval: Duration,
    idle_supported: bool,
    state: Mutex<State>,
}

impl Default for ManualScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            base_wall: Utc::now(),
            ids: IdSequence::new(),
            frame_interval: Duration::from_millis(FRAME_INTERVAL_MS),
            idle_supported: false,
            state: Mutex::new(State::default()),
        }
    }

    /// Scheduler that honours `request_idle`, running idle work on the next
    /// `advance` call.
    pub fn with_idle_support() -> Self {
        Self {
            idle_supported: true,
            ..Self::new()
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        self.state().now
    }

    /// Move the clock forward by `by`, running everything that falls due.
    /// Returns the number of tasks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state().now + by;
        let mut ran = 0;
        loop {
            let next = {
                let mut state = self.state();
                let due = match state.queue.keys().next() {
                    Some(slot) if slot.0 <= target => *slot,
                    _ => break,
                };
                let (kind, id, job) = match state.queue.remove(&due) {
                    Some(entry) => entry,
                    None => break,
                };
                state.index.remove(&(kind, id));
                state.now = state.now.max(due.0);
                state.fired += 1;
                match job {
                    Job::Once(task) => Job::Once(task),
                    Job::Repeat(task, period) => {
                        // Re-arm before running so the task may clear itself.
                        let again = std::sync::Arc::clone(&task);
                        state.push(kind, id, due.0 + period, Job::Repeat(again, period));
                        Job::Repeat(task, period)
                    }
                }
            };
            ran += 1;
            match next {
                Job::Once(task) => task(),
                Job::Repeat(task, _) => task(),
            }
        }
        let mut state = self.state();
        state.now = state.now.max(target);
        tracing::trace!(ran, now_ms = state.now.as_millis() as u64, "scheduler.advance");
        ran
    }

    /// Run whatever is due right now without moving the clock.
    pub fn run_due(&self) -> usize {
        self.advance(Duration::ZERO)
    }

    /// Total tasks run since construction.
    pub fn fired(&self) -> usize {
        self.state().fired
    }

    pub fn pending_timeouts(&self) -> usize {
        self.state().count(Kind::Timeout)
    }

    pub fn pending_intervals(&self) -> usize {
        self.state().count(Kind::Interval)
    }

    pub fn pending_frames(&self) -> usize {
        self.state().count(Kind::Frame)
    }

    pub fn pending_idle(&self) -> usize {
        self.state().count(Kind::Idle)
    }

    /// Everything still queued.
    pub fn pending(&self) -> usize {
        self.state().queue.len()
    }

    /// Whether `id` is still armed as a one-shot timer.
    pub fn is_timeout_pending(&self, id: TimerId) -> bool {
        self.state().index.contains_key(&(Kind::Timeout, id.0))
    }
}

impl Clock for ManualScheduler {
    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }

    fn wall_now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        self.base_wall + elapsed
    }
}

impl Scheduler for ManualScheduler {
    fn set_timeout(&self, delay: Duration, task: Task) -> TimerId {
        let id = self.ids.next();
        let mut state = self.state();
        let due = state.now + delay;
        state.push(Kind::Timeout, id, due, Job::Once(task));
        TimerId(id)
    }

    fn clear_timeout(&self, id: TimerId) -> bool {
        self.state().cancel(Kind::Timeout, id.0)
    }

    fn set_interval(&self, period: Duration, task: RepeatingTask) -> TimerId {
        let id = self.ids.next();
        let mut state = self.state();
        let due = state.now + period;
        state.push(Kind::Interval, id, due, Job::Repeat(task, period));
        TimerId(id)
    }

    fn clear_interval(&self, id: TimerId) -> bool {
        self.state().cancel(Kind::Interval, id.0)
    }

    fn request_animation_frame(&self, task: Task) -> FrameId {
        let id = self.ids.next();
        let mut state = self.state();
        let due = state.now + self.frame_interval;
        state.push(Kind::Frame, id, due, Job::Once(task));
        FrameId(id)
    }

    fn cancel_animation_frame(&self, id: FrameId) -> bool {
        self.state().cancel(Kind::Frame, id.0)
    }

    fn request_idle(&self, task: Task) -> Result<TimerId, Task> {
        if !self.idle_supported {
            return Err(task);
        }
        let id = self.ids.next();
        let mut state = self.state();
        let due = state.now;
        state.push(Kind::Idle, id, due, Job::Once(task));
        Ok(TimerId(id))
    }

    fn cancel_idle(&self, id: TimerId) -> bool {
        self.state().cancel(Kind::Idle, id.0)
    }
}

impl std::fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("pending", &state.queue.len())
            .field("fired", &state.fired)
            .finish()
    }
}
