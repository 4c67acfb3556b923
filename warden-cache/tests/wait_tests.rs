//! Tests for waits: shared observation, frame flushing, polling, timeouts

use std::sync::Arc;

use warden_cache::QueryCache;
use warden_core::TokioScheduler;
use warden_test_utils::*;

fn cache_with(config: CacheConfig) -> (Arc<MemoryTree>, Arc<ManualScheduler>, QueryCache<MemoryTree>) {
    init_tracing();
    let tree = Arc::new(MemoryTree::new());
    let scheduler = Arc::new(ManualScheduler::new());
    let cache = QueryCache::new(tree.clone(), scheduler.clone(), config);
    (tree, scheduler, cache)
}

fn cache() -> (Arc<MemoryTree>, Arc<ManualScheduler>, QueryCache<MemoryTree>) {
    cache_with(CacheConfig::default())
}

#[test]
fn test_existing_node_resolves_immediately() {
    let (tree, scheduler, cache) = cache();
    let node = tree.append(&["#player"]);

    let mut wait = cache.wait_for("#player", ms(1_000), None).unwrap();
    assert!(wait.is_immediate());
    assert_eq!(wait.try_resolve(), Some(Some(node)));
    assert_eq!(scheduler.pending(), 0);
    assert!(!cache.stats().observer_active);
}

#[test]
fn test_timeout_resolves_none_not_earlier() {
    let (_tree, scheduler, cache) = cache();
    let mut wait = cache.wait_for("#never", ms(1_000), None).unwrap();

    scheduler.advance(ms(999));
    assert_eq!(wait.try_resolve(), None);

    scheduler.advance(ms(1));
    assert_eq!(wait.try_resolve(), Some(None));
    assert_eq!(cache.stats().pending_waits, 0);
}

#[test]
fn test_appearance_resolves_within_one_flush_and_cancels_timeout() {
    let (tree, scheduler, cache) = cache();
    let mut wait = cache.wait_for("#late", ms(1_000), None).unwrap();
    assert!(cache.stats().observer_active);
    assert_eq!(scheduler.pending_timeouts(), 1);

    scheduler.advance(ms(200));
    let node = tree.append(&["#late"]);
    assert_eq!(wait.try_resolve(), None);
    assert_eq!(scheduler.pending_frames(), 1);

    scheduler.advance(ms(16));
    assert_eq!(wait.try_resolve(), Some(Some(node)));
    assert_eq!(scheduler.pending_timeouts(), 0);

    // Nothing left to fire later
    assert_eq!(scheduler.advance(ms(1_000)), 0);
}

#[test]
fn test_mutation_burst_requests_one_frame() {
    let (tree, scheduler, cache) = cache();
    let _wait = cache.wait_for("#late", ms(1_000), None).unwrap();

    tree.append(&[".noise"]);
    tree.append(&[".noise"]);
    tree.append(&[".noise"]);
    assert_eq!(scheduler.pending_frames(), 1);

    scheduler.advance(ms(16));
    assert_eq!(scheduler.pending_frames(), 0);
    assert_eq!(cache.stats().pending_waits, 1);
}

#[test]
fn test_waits_share_one_observer() {
    let (tree, scheduler, cache) = cache();
    let mut a = cache.wait_for("#a", ms(1_000), None).unwrap();
    let mut b = cache.wait_for("#b", ms(1_000), None).unwrap();
    let mut c = cache.wait_for("#c", ms(1_000), None).unwrap();
    assert_eq!(tree.observe_calls(), 1);
    assert_eq!(tree.observer_count(), 1);

    let node_b = tree.append(&["#b"]);
    scheduler.advance(ms(16));
    assert_eq!(b.try_resolve(), Some(Some(node_b)));
    assert_eq!(a.try_resolve(), None);
    assert_eq!(c.try_resolve(), None);
    assert_eq!(cache.stats().pending_waits, 2);

    scheduler.advance(ms(1_000));
    assert_eq!(a.try_resolve(), Some(None));
    assert_eq!(c.try_resolve(), Some(None));
}

#[test]
fn test_scoped_wait_ignores_matches_elsewhere() {
    let (tree, scheduler, cache) = cache();
    let panel = tree.append(&["#panel"]);
    let mut wait = cache.wait_for(".button", ms(500), Some(&panel)).unwrap();

    tree.append(&[".button"]);
    scheduler.advance(ms(16));
    assert_eq!(wait.try_resolve(), None);

    let inside = tree.insert(panel, &[".button"]);
    scheduler.advance(ms(16));
    assert_eq!(wait.try_resolve(), Some(Some(inside)));
}

#[test]
fn test_polling_pattern_bypasses_observer() {
    let config = CacheConfig::new().with_polling_pattern("#chat");
    let (tree, scheduler, cache) = cache_with(config);

    let mut wait = cache.wait_for("#chat-box", ms(1_000), None).unwrap();
    assert!(!cache.stats().observer_active);
    assert_eq!(tree.observe_calls(), 0);
    assert_eq!(scheduler.pending_intervals(), 1);

    let node = tree.append(&["#chat-box"]);
    scheduler.advance(ms(100));
    assert_eq!(wait.try_resolve(), Some(Some(node)));
    assert_eq!(scheduler.pending_intervals(), 0);
    assert_eq!(scheduler.pending_timeouts(), 0);
}

#[test]
fn test_polling_wait_times_out_and_stops_polling() {
    let config = CacheConfig::new().with_polling_pattern("#chat");
    let (_tree, scheduler, cache) = cache_with(config);

    let mut wait = cache.wait_for("#chat-box", ms(350), None).unwrap();
    scheduler.advance(ms(350));
    assert_eq!(wait.try_resolve(), Some(None));
    assert_eq!(scheduler.pending_intervals(), 0);
}

#[test]
fn test_destroy_resolves_waits_and_releases_host_resources() {
    let config = CacheConfig::new().with_sweep_interval(ms(1_000));
    let (tree, scheduler, cache) = cache_with(config);
    cache.start();
    tree.append(&[".item"]);
    cache.get_all(".item", None, false).unwrap();

    let mut wait = cache.wait_for("#late", ms(1_000), None).unwrap();
    tree.append(&[".noise"]);
    assert!(scheduler.pending_frames() > 0);

    cache.destroy();
    assert_eq!(wait.try_resolve(), Some(None));
    assert_eq!(scheduler.pending(), 0);
    assert_eq!(tree.observer_count(), 0);

    let stats = cache.stats();
    assert_eq!(stats.entry_count, 0);
    assert_eq!(stats.multi_entry_count, 0);
    assert!(!stats.observer_active);

    // Later waits resolve to None right away
    let mut late = cache.wait_for("#other", ms(1_000), None).unwrap();
    assert_eq!(late.try_resolve(), Some(None));
}

#[tokio::test]
async fn test_wait_future_awaits_resolution() {
    let (tree, scheduler, cache) = cache();
    let wait = cache.wait_for("#late", ms(1_000), None).unwrap();
    let node = tree.append(&["#late"]);
    scheduler.advance(ms(16));
    assert_eq!(wait.await, Some(node));
}

#[tokio::test(start_paused = true)]
async fn test_tokio_scheduler_times_out_wait() {
    let tree = Arc::new(MemoryTree::new());
    let scheduler = Arc::new(TokioScheduler::current().unwrap());
    let cache = QueryCache::new(tree, scheduler, CacheConfig::default());

    let wait = cache.wait_for("#never", ms(50), None).unwrap();
    assert_eq!(wait.await, None);
}

#[tokio::test(start_paused = true)]
async fn test_tokio_scheduler_flushes_on_frame() {
    let tree = Arc::new(MemoryTree::new());
    let scheduler = Arc::new(TokioScheduler::current().unwrap());
    let cache = QueryCache::new(tree.clone(), scheduler, CacheConfig::default());

    let wait = cache.wait_for("#late", ms(5_000), None).unwrap();
    let node = tree.append(&["#late"]);
    assert_eq!(wait.await, Some(node));
}
