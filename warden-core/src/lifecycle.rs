//! Page lifecycle signals.
//!
//! Consumers fire signals, the core only reacts. Dispatch is synchronous:
//! once [`LifecycleHub::emit`] returns every listener has processed the
//! signal, so no read issued afterwards can observe pre-signal state.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, Weak};

/// Lifecycle signals the runtime reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleSignal {
    /// The host finished an in-page navigation
    NavigationFinished,
    /// Older navigation event still fired by some page versions
    LegacyNavigation,
}

impl LifecycleSignal {
    pub fn is_navigation(&self) -> bool {
        matches!(self, Self::NavigationFinished | Self::LegacyNavigation)
    }
}

/// Something that reacts to lifecycle signals.
pub trait LifecycleListener: Send + Sync {
    fn on_signal(&self, signal: LifecycleSignal);
}

/// Synchronous fan-out of lifecycle signals.
///
/// Listeners are held weakly; a dropped component silently leaves the hub.
#[derive(Default)]
pub struct LifecycleHub {
    listeners: Mutex<Vec<Weak<dyn LifecycleListener>>>,
}

impl LifecycleHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: &Arc<dyn LifecycleListener>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.push(Arc::downgrade(listener));
    }

    /// Deliver `signal` to every live listener, in subscription order.
    pub fn emit(&self, signal: LifecycleSignal) -> usize {
        // Snapshot so listeners may subscribe or emit while being notified.
        let live: Vec<Arc<dyn LifecycleListener>> = {
            let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        tracing::debug!(?signal, listeners = live.len(), "lifecycle.emit");
        for listener in &live {
            listener.on_signal(signal);
        }
        live.len()
    }

    pub fn listener_count(&self) -> usize {
        let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.iter().filter(|l| l.strong_count() > 0).count()
    }
}

impl std::fmt::Debug for LifecycleHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleHub")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
