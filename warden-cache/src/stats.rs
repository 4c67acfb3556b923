//! Cache statistics for observability tooling.

use serde::{Deserialize, Serialize};

/// Point-in-time statistics about the query cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Reads served from a fresh, live entry.
    pub hits: u64,
    /// Reads that had to query the tree.
    pub misses: u64,
    /// Reads that skipped the cache on request.
    pub bypasses: u64,
    /// Entries evicted due to capacity.
    pub evictions: u64,
    /// Completed sweep passes.
    pub sweeps: u64,
    /// Entries removed by sweeps.
    pub swept: u64,
    /// Single-node entries currently cached.
    pub entry_count: usize,
    /// Multi-node entries currently cached.
    pub multi_entry_count: usize,
    /// Scope nodes currently holding an id.
    pub scope_ids: usize,
    /// Waits not yet resolved.
    pub pending_waits: usize,
    /// Whether the shared tree observer is connected.
    pub observer_active: bool,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0). Bypasses are not counted.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Running counters kept inside the cache state.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub bypasses: u64,
    pub evictions: u64,
    pub sweeps: u64,
    pub swept: u64,
}
