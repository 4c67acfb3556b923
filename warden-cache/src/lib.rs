//! WARDEN Query Cache
//!
//! Caches lookups against a host node tree that mutates underneath it.
//!
//! - Found and not-found results carry different TTLs, and a cached node
//!   that has been detached is treated as a miss.
//! - The single-entry store is bounded and evicts in insertion order.
//! - A background sweep trims expired entries in idle time.
//! - Many "wait until this appears" requests share one tree observer and
//!   are flushed at most once per animation frame.

mod cache;
mod key;
mod stats;
mod store;
mod wait;

pub use cache::QueryCache;
pub use key::{CacheKey, ScopeId, ScopeIds};
pub use stats::CacheStats;
pub use store::{CacheEntry, MultiCacheEntry, SingleStore};
pub use wait::PendingWait;
