//! Recording and failing host doubles.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use warden_core::{
    EventTarget, HostError, KeyValueStore, ListenerId, ListenerOptions, Notice, Notifier, Observer,
};

// ============================================================================
// STORAGE
// ============================================================================

/// In-memory [`KeyValueStore`] that can be told to reject writes.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Successful `set` calls so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn raw(&self, key: &str) -> Option<String> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, HostError> {
        Ok(self.raw(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), HostError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(HostError::Storage {
                key: key.to_string(),
                reason: "quota exceeded".to_string(),
            });
        }
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), HostError> {
        self.values
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}

// ============================================================================
// NOTIFICATIONS
// ============================================================================

/// [`Notifier`] that keeps every notice it is shown.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn count(&self) -> usize {
        self.notices.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notice: &Notice) {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notice.clone());
    }
}

// ============================================================================
// EVENT TARGETS
// ============================================================================

/// A listener removal seen by a [`RecordingTarget`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub event: String,
    pub listener: ListenerId,
    pub options: ListenerOptions,
}

/// [`EventTarget`] that records removals and fails for chosen events.
#[derive(Debug, Default)]
pub struct RecordingTarget {
    removals: Mutex<Vec<Removal>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingTarget {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make removals for `event` fail.
    pub fn fail_on(&self, event: &str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event.to_string());
    }

    pub fn removals(&self) -> Vec<Removal> {
        self.removals.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventTarget for RecordingTarget {
    fn remove_listener(
        &self,
        event: &str,
        listener: ListenerId,
        options: &ListenerOptions,
    ) -> Result<(), HostError> {
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(event);
        if failing {
            return Err(HostError::ListenerRemoval {
                event: event.to_string(),
                reason: "target already detached".to_string(),
            });
        }
        self.removals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Removal {
                event: event.to_string(),
                listener,
                options: *options,
            });
        Ok(())
    }
}

// ============================================================================
// OBSERVERS
// ============================================================================

/// Shared view of a [`CountingObserver`]'s disconnects.
#[derive(Debug, Clone, Default)]
pub struct DisconnectProbe(Arc<AtomicUsize>);

impl DisconnectProbe {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

/// Observer that counts disconnects and optionally fails them.
#[derive(Debug)]
pub struct CountingObserver {
    probe: DisconnectProbe,
    fail: bool,
}

impl CountingObserver {
    pub fn new() -> (Box<dyn Observer>, DisconnectProbe) {
        let probe = DisconnectProbe::default();
        let observer = Self {
            probe: probe.clone(),
            fail: false,
        };
        (Box::new(observer), probe)
    }

    /// An observer whose disconnect is attempted but reports failure.
    pub fn failing() -> (Box<dyn Observer>, DisconnectProbe) {
        let probe = DisconnectProbe::default();
        let observer = Self {
            probe: probe.clone(),
            fail: true,
        };
        (Box::new(observer), probe)
    }
}

impl Observer for CountingObserver {
    fn disconnect(&mut self) -> Result<(), HostError> {
        self.probe.0.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(HostError::ObserverDisconnect {
                reason: "subscription already detached".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip_and_failures() {
        let store = MemoryStore::new();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap(), Some("v".to_string()));
        store.set_fail_writes(true);
        assert!(store.set("k", "w").is_err());
        assert_eq!(store.writes(), 1);
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap(), None);
    }

    #[test]
    fn test_recording_target_fails_selected_events() {
        let target = RecordingTarget::new();
        target.fail_on("scroll");
        assert!(target
            .remove_listener("scroll", ListenerId(1), &ListenerOptions::default())
            .is_err());
        assert!(target
            .remove_listener("click", ListenerId(2), &ListenerOptions::capture())
            .is_ok());
        assert_eq!(target.removals().len(), 1);
        assert_eq!(target.removals()[0].listener, ListenerId(2));
    }

    #[test]
    fn test_counting_observer_counts_even_when_failing() {
        let (mut observer, probe) = CountingObserver::failing();
        assert!(observer.disconnect().is_err());
        assert_eq!(probe.count(), 1);
    }
}
