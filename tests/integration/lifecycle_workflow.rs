//! Service lifecycle tests.
//!
//! Tests create → start → periodic tick → stop against a real tokio timer.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use territory_telemetry::config::{TelemetryConfig, MIN_TICK_INTERVAL_MS};
use territory_telemetry::entry::{EntryKind, Severity};
use territory_telemetry::service::{LifecycleState, TelemetryService};

fn fast_config() -> TelemetryConfig {
    TelemetryConfig {
        tick_interval_ms: MIN_TICK_INTERVAL_MS,
        ..TelemetryConfig::default()
    }
}

fn fatal_error() -> EntryKind {
    EntryKind::ScriptError {
        message: "Out of memory".to_string(),
        error_type: None,
        filename: Some("worker.js".to_string()),
        line: Some(1),
        column: None,
        stack: None,
        component: None,
        function: None,
    }
}

#[tokio::test]
async fn test_timer_recomputes_and_notifies() {
    let service = Arc::new(TelemetryService::new(fast_config()));
    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notifications);
    let _subscription = service.on_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(service.start(), LifecycleState::Running);
    let after_start = notifications.load(Ordering::SeqCst);

    service.capture(fatal_error(), Some(Severity::Critical));
    let after_capture = notifications.load(Ordering::SeqCst);
    assert_eq!(after_capture, after_start + 1);
    let alerts = service.active_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].metric, "critical_errors");

    // No explicit tick: the timer republishes on its own
    tokio::time::sleep(Duration::from_millis(MIN_TICK_INTERVAL_MS + 500)).await;

    assert!(notifications.load(Ordering::SeqCst) > after_capture);
    assert_eq!(service.current().active_alerts, alerts);

    service.stop();
}

#[tokio::test]
async fn test_stop_cancels_timer_and_subscribers() {
    let service = Arc::new(TelemetryService::new(fast_config()));
    let notifications = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&notifications);
    let _subscription = service.subscribe("dashboard", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    service.start();
    service.stop();
    service.stop();
    assert_eq!(service.lifecycle(), LifecycleState::Stopped);
    assert_eq!(service.subscriber_count(), 0);

    let before = notifications.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(MIN_TICK_INTERVAL_MS + 200)).await;
    assert_eq!(notifications.load(Ordering::SeqCst), before);

    assert!(service.capture(fatal_error(), None).is_none());
    assert!(service.events().is_empty());
    assert_eq!(service.start(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_dropping_service_ends_timer() {
    let service = Arc::new(TelemetryService::new(fast_config()));
    service.start();
    let weak = Arc::downgrade(&service);
    drop(service);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_start_outside_runtime_keeps_capturing() {
    let service = Arc::new(TelemetryService::new(fast_config()));
    assert_eq!(service.start(), LifecycleState::Created);
    assert!(service
        .capture(fatal_error(), Some(Severity::Critical))
        .is_some());

    // Alerts do not wait for a timer that never started
    let alerts = service.active_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].metric, "critical_errors");
    assert!(service.tick().is_empty());
}
