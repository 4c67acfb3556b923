//! End-to-end tests: features using the cache, registry and boundary
//! together through one runtime.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use warden_core::{HostError, LifecycleListener, LifecycleSignal, MutationBatch, NodeTree};
use warden_runtime::Runtime;
use warden_test_utils::*;

struct Fixture {
    tree: Arc<MemoryTree>,
    scheduler: Arc<ManualScheduler>,
    notifier: Arc<RecordingNotifier>,
    runtime: Runtime<MemoryTree>,
}

fn fixture() -> Fixture {
    init_tracing();
    let tree = Arc::new(MemoryTree::new());
    let scheduler = Arc::new(ManualScheduler::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let runtime = Runtime::new(
        WardenConfig::default(),
        tree.clone(),
        scheduler.clone(),
        Arc::new(MemoryStore::new()),
        notifier.clone(),
    )
    .unwrap();
    Fixture {
        tree,
        scheduler,
        notifier,
        runtime,
    }
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
    let count = Arc::new(AtomicUsize::new(0));
    let read = count.clone();
    (count, move || read.load(Ordering::SeqCst))
}

#[test]
fn test_navigation_invalidates_cache_and_tears_down_resources() {
    let f = fixture();
    let cache = f.runtime.cache();
    let registry = f.runtime.registry();
    let player = f.tree.append(&["#player"]);

    assert_eq!(cache.get("#player", None, false).unwrap(), Some(player));
    assert_eq!(cache.get("#player", None, false).unwrap(), Some(player));
    assert_eq!(f.tree.query_count(), 1);

    // A feature watches the tree and polls on an interval
    let observer = f.tree.observe(Arc::new(|_: &MutationBatch| {}));
    registry.register_observer(observer);
    let (ticks, read_ticks) = counter();
    let interval = f.scheduler.set_interval(
        ms(100),
        Arc::new(move || {
            ticks.fetch_add(1, Ordering::SeqCst);
        }),
    );
    registry.register_interval(interval);
    let target = RecordingTarget::new();
    registry.register_listener(target.clone(), "click", ListenerId(7), ListenerOptions::capture());

    let report = f.runtime.navigate(LifecycleSignal::NavigationFinished);
    assert_eq!(report.listeners, 2);
    assert_eq!(report.cleanup.torn_down, 3);
    assert!(report.cleanup.is_clean());

    assert_eq!(f.tree.observer_count(), 0);
    assert_eq!(target.removals().len(), 1);
    f.scheduler.advance(ms(1_000));
    assert_eq!(read_ticks(), 0);
    assert!(f.runtime.registry().is_empty());

    // The next read goes back to the tree
    assert_eq!(cache.get("#player", None, false).unwrap(), Some(player));
    assert_eq!(f.tree.query_count(), 2);
}

#[test]
fn test_legacy_navigation_behaves_the_same() {
    let f = fixture();
    f.tree.append(&["#player"]);
    f.runtime.cache().get("#player", None, false).unwrap();
    f.runtime.registry().register_function(|| Ok(()));

    let report = f.runtime.navigate(LifecycleSignal::LegacyNavigation);
    assert_eq!(report.cleanup.torn_down, 1);
    assert_eq!(f.runtime.cache().stats().entry_count, 0);
}

#[test]
fn test_teardown_failure_is_reported_not_raised() {
    let f = fixture();
    let (ran, read_ran) = counter();
    f.runtime
        .registry()
        .register_function(|| Err(HostError::Other("menu already gone".to_string())));
    f.runtime.registry().register_function(move || {
        ran.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let report = f.runtime.navigate(LifecycleSignal::NavigationFinished);
    assert_eq!(report.cleanup.torn_down, 2);
    assert_eq!(report.cleanup.failures.len(), 1);
    assert_eq!(read_ran(), 1);
}

#[test]
fn test_failure_recovery_releases_the_failing_module() {
    let f = fixture();
    let comments = f.tree.append(&["#comments"]);
    f.runtime.cache().get("#comments", None, false).unwrap();
    let (released, read_released) = counter();
    f.runtime.registry().scope("comments").register_function(move || {
        released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let result: Option<()> = f
        .runtime
        .boundary()
        .call("comments.bulk_delete", || Err("TypeError: row.id is not a function"));
    assert_eq!(result, None);

    assert_eq!(read_released(), 1);
    assert!(f.runtime.registry().is_empty());
    assert_eq!(f.notifier.count(), 1);

    // A still-attached lookup is not thrown away
    assert_eq!(f.runtime.cache().get("#comments", None, false).unwrap(), Some(comments));
    assert_eq!(f.tree.query_count(), 1);
}

#[test]
fn test_one_module_failing_leaves_another_running() {
    let f = fixture();
    let (ticks, read_ticks) = counter();
    let poll = f.scheduler.set_interval(
        ms(1_000),
        Arc::new(move || {
            ticks.fetch_add(1, Ordering::SeqCst);
        }),
    );
    f.runtime.registry().scope("comments").register_interval(poll);
    let overlay_target = RecordingTarget::new();
    f.runtime.registry().scope("overlay").register_listener(
        overlay_target.clone(),
        "resize",
        ListenerId(3),
        ListenerOptions::passive(),
    );
    let (unowned, read_unowned) = counter();
    f.runtime.registry().register_function(move || {
        unowned.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    f.scheduler.advance(ms(1_000));
    assert_eq!(read_ticks(), 1);

    let _: Option<()> = f
        .runtime
        .boundary()
        .call("overlay.render", || Err("TypeError: frame is undefined"));

    assert_eq!(overlay_target.removals().len(), 1);
    assert_eq!(f.runtime.registry().counts_for("overlay").total(), 0);
    assert_eq!(f.runtime.registry().counts_for("comments").intervals, 1);
    assert_eq!(read_unowned(), 0);

    f.scheduler.advance(ms(3_000));
    assert_eq!(read_ticks(), 4);

    // Navigation still releases everything
    let report = f.runtime.navigate(LifecycleSignal::NavigationFinished);
    assert_eq!(report.cleanup.torn_down, 2);
    assert_eq!(read_unowned(), 1);
    f.scheduler.advance(ms(3_000));
    assert_eq!(read_ticks(), 4);
}

#[test]
fn test_critical_failure_leaves_resources_alone() {
    let f = fixture();
    let (released, read_released) = counter();
    f.runtime.registry().register_function(move || {
        released.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    let _: Option<()> = f
        .runtime
        .boundary()
        .call("settings.save", || Err("blocked by Content Security Policy"));

    assert_eq!(read_released(), 0);
    assert_eq!(f.runtime.registry().counts().functions, 1);
}

#[test]
fn test_feature_listeners_share_the_hub() {
    struct Seen(AtomicUsize);
    impl LifecycleListener for Seen {
        fn on_signal(&self, _signal: LifecycleSignal) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let f = fixture();
    let seen = Arc::new(Seen(AtomicUsize::new(0)));
    let listener: Arc<dyn LifecycleListener> = seen.clone();
    f.runtime.hub().subscribe(&listener);

    let report = f.runtime.navigate(LifecycleSignal::NavigationFinished);
    assert_eq!(report.listeners, 3);
    assert_eq!(seen.0.load(Ordering::SeqCst), 1);
}

#[test]
fn test_shutdown_resolves_waits_and_releases_everything() {
    let f = fixture();
    f.runtime.start();
    let mut wait = f.runtime.cache().wait_for("#late", ms(5_000), None).unwrap();
    assert_eq!(f.tree.observer_count(), 1);
    f.runtime.registry().register_function(|| Ok(()));

    let report = f.runtime.shutdown();
    assert_eq!(report.torn_down, 1);
    assert_eq!(wait.try_resolve(), Some(None));
    assert_eq!(f.tree.observer_count(), 0);
    assert_eq!(f.scheduler.pending(), 0);

    // Second shutdown has nothing left to do
    assert_eq!(f.runtime.shutdown().torn_down, 0);
}

#[test]
fn test_stats_combine_all_three() {
    let f = fixture();
    f.tree.append(&["#player"]);
    f.runtime.cache().get("#player", None, false).unwrap();
    f.runtime.registry().scope("player").register_timeout(TimerId(99));
    f.runtime.registry().scope("comments").register_timeout(TimerId(100));
    let _: Option<()> = f.runtime.boundary().call("player.init", || Err("something odd"));

    let stats = f.runtime.stats();
    assert_eq!(stats.cache.misses, 1);
    assert_eq!(stats.registry.timeouts, 1);
    assert_eq!(stats.boundary.total_errors, 1);
}

#[tokio::test]
async fn test_async_feature_reads_through_the_boundary() {
    let f = fixture();
    let player = f.tree.append(&["#player"]);
    let cache = f.runtime.cache().clone();

    let found = f
        .runtime
        .boundary()
        .call_async("player.init", async move { cache.get("#player", None, false) })
        .await;
    assert_eq!(found, Some(Some(player)));

    let cache = f.runtime.cache().clone();
    let invalid = f
        .runtime
        .boundary()
        .call_async("player.init", async move { cache.get("", None, false) })
        .await;
    assert_eq!(invalid, None);
    assert_eq!(f.runtime.boundary().stats().total_errors, 1);
}
