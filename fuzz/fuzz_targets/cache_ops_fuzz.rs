//! Fuzz test for WARDEN query cache operation sequences
//!
//! Each input byte is one operation against an in-memory tree and a manual
//! clock. After every step the cache must stay within its capacity and
//! never hand out a detached node.
//!
//! Run with: cargo +nightly fuzz run cache_ops_fuzz -- -max_total_time=60

#![no_main]

use std::sync::Arc;
use std::time::Duration;

use libfuzzer_sys::fuzz_target;
use warden_cache::QueryCache;
use warden_core::{CacheConfig, NodeTree};
use warden_test_utils::{ManualScheduler, MemoryTree, NodeRef};

const PATTERNS: [&str; 4] = ["#a", "#b", ".item", "#a[x]"];

fuzz_target!(|data: &[u8]| {
    let tree = Arc::new(MemoryTree::new());
    let scheduler = Arc::new(ManualScheduler::with_idle_support());
    let config = CacheConfig::default()
        .with_max_entries(8)
        .with_max_sweep_deletions(3);
    let cache = QueryCache::new(tree.clone(), scheduler.clone(), config);
    cache.start();

    let mut nodes: Vec<NodeRef> = Vec::new();
    let mut waits = Vec::new();

    for &byte in data {
        let pattern = PATTERNS[(byte >> 4) as usize % PATTERNS.len()];
        match byte & 0x0f {
            0 | 1 => {
                if let Ok(Some(node)) = cache.get(pattern, None, false) {
                    assert!(tree.is_attached(&node));
                }
            }
            2 => {
                if let Ok(found) = cache.get_all(pattern, None, false) {
                    for node in found.iter().take(1).chain(found.last()) {
                        assert!(tree.is_attached(node));
                    }
                }
            }
            3 | 4 => {
                let label = pattern.trim_end_matches("[x]");
                nodes.push(tree.append(&[label]));
            }
            5 => {
                if !nodes.is_empty() {
                    let node = nodes.remove(byte as usize % nodes.len());
                    tree.detach(node);
                }
            }
            6 => {
                cache.invalidate(Some(pattern));
            }
            7 => {
                cache.invalidate(None);
            }
            8 => {
                if let Ok(wait) = cache.wait_for(pattern, Duration::from_millis(200), None) {
                    waits.push(wait);
                }
            }
            9 => {
                cache.sweep();
            }
            _ => {
                scheduler.advance(Duration::from_millis(u64::from(byte) * 40));
            }
        }
        let stats = cache.stats();
        assert!(stats.entry_count <= 8);
        assert!(stats.pending_waits <= waits.len());
    }

    cache.destroy();
    for mut wait in waits {
        assert!(wait.try_resolve().is_some());
    }
});
