//! Panic hook tests.
//!
//! The hook is process-wide, so these tests run serially and only look for
//! the entries they produced themselves.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serial_test::serial;

use territory_telemetry::config::TelemetryConfig;
use territory_telemetry::entry::{Entry, EntryKind, Severity};
use territory_telemetry::instrument::install_panic_hook;
use territory_telemetry::service::TelemetryService;

fn panics_with(service: &TelemetryService, message: &str) -> Vec<Entry> {
    let expected = format!("panic: {message}");
    service
        .events()
        .into_iter()
        .filter(|e| e.kind.summary() == expected)
        .collect()
}

#[test]
#[serial]
fn test_worker_panic_is_captured_as_critical() {
    let service = Arc::new(TelemetryService::new(TelemetryConfig::default()));
    install_panic_hook(&service);

    for _ in 0..3 {
        let joined = std::thread::spawn(|| panic!("territory import failed")).join();
        assert!(joined.is_err());
    }

    let captured = panics_with(&service, "territory import failed");
    assert_eq!(captured.len(), 1);
    assert_eq!(captured[0].occurrences, 3);
    assert_eq!(captured[0].severity, Severity::Critical);
    assert!(matches!(
        &captured[0].kind,
        EntryKind::ScriptError { error_type: Some(t), .. } if t == "panic"
    ));

    // Recorded without notifying; the next tick publishes and alerts
    let raised = service.tick();
    assert!(raised.iter().any(|a| a.metric == "critical_errors"));
}

#[test]
#[serial]
fn test_subscriber_panic_is_isolated_and_not_recorded() {
    let service = Arc::new(TelemetryService::new(TelemetryConfig::default()));
    install_panic_hook(&service);

    let delivered = Arc::new(AtomicUsize::new(0));
    let _bad = service.on_change(|_| panic!("chart render failed"));
    let counter = Arc::clone(&delivered);
    let _good = service.on_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    service.add_breadcrumb(
        territory_telemetry::entry::BreadcrumbCategory::Console,
        "refresh",
        Severity::Debug,
        std::collections::BTreeMap::new(),
    );
    service.tick();

    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    // Logged as a subscriber failure, never turned into a critical entry
    assert!(panics_with(&service, "chart render failed").is_empty());
    assert!(service.active_alerts().is_empty());
}

#[test]
#[serial]
fn test_panicking_capture_builder_is_dropped() {
    let service = Arc::new(TelemetryService::new(TelemetryConfig::default()));
    install_panic_hook(&service);

    let id = service.try_capture(|| -> Result<EntryKind, String> { panic!("builder exploded") });
    assert!(id.is_none());
    assert!(service.events().is_empty());

    assert!(service.tick().is_empty());
    assert!(service.active_alerts().is_empty());
}

#[test]
#[serial]
fn test_uncaught_panic_after_contained_one_is_recorded() {
    let service = Arc::new(TelemetryService::new(TelemetryConfig::default()));
    install_panic_hook(&service);

    let _ = service.try_capture(|| -> Result<EntryKind, String> { panic!("builder exploded") });
    let joined = std::thread::spawn(|| panic!("sync worker crashed")).join();
    assert!(joined.is_err());

    assert!(panics_with(&service, "builder exploded").is_empty());
    assert_eq!(panics_with(&service, "sync worker crashed").len(), 1);
}

#[test]
#[serial]
fn test_hook_ignores_dropped_service() {
    let service = Arc::new(TelemetryService::new(TelemetryConfig::default()));
    install_panic_hook(&service);
    drop(service);

    let joined = std::thread::spawn(|| panic!("nobody listening")).join();
    assert!(joined.is_err());
}
