//! Integration tests for the WARDEN error boundary

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use warden_boundary::{ErrorBoundary, ANY_MODULE};
use warden_core::{
    BoundaryConfig, BreakerConfig, CircuitState, ErrorKind, ErrorRecord, LifecycleListener,
    LifecycleSignal,
};
use warden_test_utils::*;

struct Fixture {
    clock: Arc<ManualScheduler>,
    store: Arc<MemoryStore>,
    notifier: Arc<RecordingNotifier>,
    boundary: Arc<ErrorBoundary>,
}

fn fixture_with(breaker: BreakerConfig, store: Arc<MemoryStore>) -> Fixture {
    init_tracing();
    let clock = Arc::new(ManualScheduler::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let boundary = Arc::new(ErrorBoundary::new(
        BoundaryConfig::default(),
        breaker,
        clock.clone(),
        store.clone(),
        notifier.clone(),
    ));
    Fixture {
        clock,
        store,
        notifier,
        boundary,
    }
}

/// Breaker that never trips, for tests about logging and notification.
fn fixture() -> Fixture {
    fixture_with(
        BreakerConfig::default().with_failure_threshold(1_000),
        Arc::new(MemoryStore::new()),
    )
}

fn fail(boundary: &ErrorBoundary, label: &str, message: &str) {
    let result: Option<()> = boundary.call(label, || Err(message.to_string()));
    assert!(result.is_none());
}

// ============================================================================
// NOTIFICATION THROTTLING
// ============================================================================

#[test]
fn test_duplicate_suppressed_within_window() {
    let f = fixture();
    fail(&f.boundary, "comments.delete", "Cannot read property 'id'");
    fail(&f.boundary, "comments.delete", "Cannot read property 'id'");
    assert_eq!(f.notifier.count(), 1);

    f.clock.advance(ms(10_001));
    fail(&f.boundary, "comments.delete", "Cannot read property 'id'");
    assert_eq!(f.notifier.count(), 2);
    assert_eq!(f.boundary.stats().total_errors, 3);
}

#[test]
fn test_rate_limit_after_burst() {
    let f = fixture();
    for i in 0..8 {
        fail(&f.boundary, "overlay.render", &format!("render failed #{}", i));
    }
    // Six notify (up to five prior errors), the rest are throttled
    assert_eq!(f.notifier.count(), 6);

    f.clock.advance(ms(60_001));
    fail(&f.boundary, "overlay.render", "render failed again");
    assert_eq!(f.notifier.count(), 7);
}

#[test]
fn test_notice_wording_and_duration() {
    let f = fixture();
    fail(&f.boundary, "stats.load", "SyntaxError: bad json");
    let notices = f.notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].severity, Severity::High);
    assert_eq!(notices[0].duration, ms(6_000));
    assert!(notices[0].message.starts_with("stats.load: "));
}

#[test]
fn test_critical_bypasses_throttle_and_recovery() {
    let f = fixture();
    let recovered = Arc::new(AtomicUsize::new(0));
    let seen = recovered.clone();
    f.boundary.register_recovery(ANY_MODULE, move |_: &ErrorRecord| {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    for _ in 0..10 {
        fail(&f.boundary, "settings.save", "Refused by Content Security Policy");
    }
    assert_eq!(f.notifier.count(), 10);
    assert_eq!(recovered.load(Ordering::SeqCst), 0);
    assert_eq!(f.boundary.stats().by_severity.get(&Severity::Critical), Some(&10));
}

// ============================================================================
// RECOVERY
// ============================================================================

#[test]
fn test_recovery_bounded_per_window_and_reset_by_navigation() {
    let f = fixture();
    let runs = Arc::new(AtomicUsize::new(0));
    let seen = runs.clone();
    f.boundary.register_recovery("comments", move |record: &ErrorRecord| {
        assert_eq!(record.context.module, "comments");
        seen.fetch_add(1, Ordering::SeqCst);
    });

    for i in 0..5 {
        fail(&f.boundary, "comments.delete", &format!("TypeError #{}", i));
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    // Other modules do not run this hook
    fail(&f.boundary, "overlay.render", "TypeError");
    assert_eq!(runs.load(Ordering::SeqCst), 3);

    f.boundary.on_signal(LifecycleSignal::NavigationFinished);
    fail(&f.boundary, "comments.delete", "TypeError again");
    assert_eq!(runs.load(Ordering::SeqCst), 4);

    f.clock.advance(ms(60_000));
    fail(&f.boundary, "comments.delete", "TypeError later");
    assert_eq!(runs.load(Ordering::SeqCst), 5);
    assert!(!f.boundary.stats().recovering);
}

#[test]
fn test_panicking_recovery_hook_is_contained() {
    let f = fixture();
    f.boundary
        .register_recovery("comments", |_: &ErrorRecord| panic!("recovery hook exploded"));
    fail(&f.boundary, "comments.delete", "TypeError");
    assert_eq!(f.boundary.stats().total_errors, 1);
}

// ============================================================================
// PERSISTENCE
// ============================================================================

#[test]
fn test_persisted_tail_is_bounded_and_restored() {
    let f = fixture();
    for i in 0..25 {
        fail(&f.boundary, "overlay.render", &format!("failure {}", i));
    }
    let raw = f.store.raw("warden.error_log").unwrap();
    let persisted: Vec<ErrorRecord> = serde_json::from_str(&raw).unwrap();
    assert_eq!(persisted.len(), 20);
    assert_eq!(persisted.last().unwrap().message, "failure 24");

    let restored = fixture_with(BreakerConfig::default(), f.store.clone());
    let records = restored.boundary.recent_errors(100);
    assert_eq!(records.len(), 20);
    assert_eq!(records[0].message, "failure 5");
    assert_eq!(records[19].message, "failure 24");
}

#[test]
fn test_storage_failure_is_not_raised() {
    let f = fixture();
    f.store.set_fail_writes(true);
    fail(&f.boundary, "overlay.render", "TypeError");
    assert_eq!(f.boundary.stats().total_errors, 1);
    assert!(f.store.raw("warden.error_log").is_none());
}

#[test]
fn test_clear_errors_drops_memory_and_storage() {
    let f = fixture();
    fail(&f.boundary, "overlay.render", "TypeError");
    assert!(f.store.raw("warden.error_log").is_some());

    f.boundary.clear_errors();
    assert_eq!(f.boundary.stats().total_errors, 0);
    assert!(f.store.raw("warden.error_log").is_none());
}

// ============================================================================
// CIRCUIT BREAKER
// ============================================================================

#[test]
fn test_breaker_short_circuits_then_probes() {
    let f = fixture_with(BreakerConfig::default(), Arc::new(MemoryStore::new()));
    for i in 0..5 {
        fail(&f.boundary, "comments.delete", &format!("TypeError {}", i));
    }
    assert_eq!(f.boundary.stats().circuit_state, CircuitState::Open);

    let invoked = AtomicUsize::new(0);
    let result = f.boundary.call("comments.delete", || {
        invoked.fetch_add(1, Ordering::SeqCst);
        Ok::<_, String>(1)
    });
    assert_eq!(result, None);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    f.clock.advance(ms(30_000));
    for _ in 0..3 {
        let result = f.boundary.call("comments.delete", || {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(1)
        });
        assert_eq!(result, Some(1));
    }
    assert_eq!(invoked.load(Ordering::SeqCst), 3);
    assert_eq!(f.boundary.stats().circuit_state, CircuitState::Closed);
}

#[test]
fn test_navigation_keeps_breaker_state() {
    let f = fixture_with(BreakerConfig::default(), Arc::new(MemoryStore::new()));
    for i in 0..5 {
        fail(&f.boundary, "comments.delete", &format!("TypeError {}", i));
    }
    f.boundary.on_signal(LifecycleSignal::LegacyNavigation);
    assert_eq!(f.boundary.breaker().state(), CircuitState::Open);
}

// ============================================================================
// WRAPPING
// ============================================================================

#[test]
fn test_wrap_reuses_label() {
    let f = fixture();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let wrapped = f.boundary.wrap("download.menu", move || {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        if n % 2 == 0 {
            Ok(n)
        } else {
            Err("menu target is undefined")
        }
    });

    assert_eq!(wrapped(), Some(0));
    assert_eq!(wrapped(), None);
    assert_eq!(wrapped(), Some(2));
    let records = f.boundary.recent_errors(10);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].context.label, "download.menu");
}

#[tokio::test]
async fn test_call_async_catches_errors_and_panics() {
    let f = fixture();
    let ok = f.boundary.call_async("vote.send", async { Ok::<_, String>(5) }).await;
    assert_eq!(ok, Some(5));

    let err: Option<()> = f
        .boundary
        .call_async("vote.send", async { Err("connection reset") })
        .await;
    assert_eq!(err, None);

    let wrapped = f.boundary.wrap_async("vote.retry", || async {
        if true {
            panic!("retry state is undefined");
        }
        Ok::<u32, String>(1)
    });
    assert_eq!(wrapped().await, None);

    let records = f.boundary.recent_errors(10);
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].severity, Severity::Low);
    assert_eq!(records[1].context.kind, ErrorKind::Panic);
    assert_eq!(records[1].severity, Severity::Medium);
}
