//! Opaque handle types.
//!
//! Host timers, frame requests and listeners are identified by plain integers
//! wrapped in distinct newtypes so a frame id can never be cleared as a timer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! define_handle {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl $name {
            /// Wrap a raw host id.
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            /// The raw host id.
            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_handle!(
    /// Id of a one-shot or repeating host timer (also used for idle callbacks).
    TimerId,
    "timer#"
);
define_handle!(
    /// Id of an animation-frame request.
    FrameId,
    "frame#"
);
define_handle!(
    /// Host-side identity of an event handler, passed back on removal.
    ListenerId,
    "listener#"
);
define_handle!(
    /// Token minted by the registry for one event binding.
    ListenerToken,
    "binding#"
);
define_handle!(
    /// Token minted by the registry for a tracked tree observer.
    ObserverId,
    "observer#"
);
define_handle!(
    /// Token minted by the registry for a teardown closure.
    CleanupId,
    "cleanup#"
);

/// Monotonic id source shared by schedulers and registries.
#[derive(Debug, Default)]
pub struct IdSequence(AtomicU64);

impl IdSequence {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Next id, starting from 1.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display_is_prefixed() {
        assert_eq!(TimerId::new(7).to_string(), "timer#7");
        assert_eq!(FrameId::new(3).to_string(), "frame#3");
        assert_eq!(ListenerToken::new(1).to_string(), "binding#1");
    }

    #[test]
    fn test_id_sequence_starts_at_one_and_increments() {
        let seq = IdSequence::new();
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.next(), 3);
    }
}
