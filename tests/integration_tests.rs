//! Integration tests for the telemetry core.
//!
//! These tests verify end-to-end behavior through the public API:
//! - Capture and deduplication
//! - Buffer eviction
//! - Threshold alerting with a controlled clock
//! - Configuration handling

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::float_cmp
)]

use std::sync::Arc;

use chrono::Duration;
use pretty_assertions::assert_eq;
use serial_test::serial;

use territory_telemetry::aggregation::AggregationEngine;
use territory_telemetry::alerting::ThresholdRule;
use territory_telemetry::config::{sanitize, validate_config, TelemetryConfig};
use territory_telemetry::entry::{Category, EntryKind, Severity};
use territory_telemetry::error::ConfigError;
use territory_telemetry::fingerprint::fingerprint;
use territory_telemetry::service::TelemetryService;
use territory_telemetry::traits::ManualTimeProvider;

// ============================================================================
// Test Utilities
// ============================================================================

/// Create a service driven by a manual clock.
fn create_service(config: TelemetryConfig) -> (TelemetryService, ManualTimeProvider) {
    let clock = ManualTimeProvider::default();
    let service = TelemetryService::with_clock(config, Arc::new(clock.clone()));
    (service, clock)
}

fn custom_event(name: &str) -> EntryKind {
    EntryKind::Custom {
        name: name.to_string(),
        message: None,
        component: None,
        properties: std::collections::BTreeMap::new(),
    }
}

fn render_error() -> EntryKind {
    EntryKind::ScriptError {
        message: "Cannot read properties of undefined".to_string(),
        error_type: Some("TypeError".to_string()),
        filename: Some("territory-map.js".to_string()),
        line: Some(88),
        column: Some(14),
        stack: None,
        component: Some("TerritoryMap".to_string()),
        function: Some("renderPolygons".to_string()),
    }
}

// ============================================================================
// Capture Tests
// ============================================================================

#[test]
fn test_five_identical_captures_merge_into_one_entry() {
    let (service, clock) = create_service(TelemetryConfig::default());

    for _ in 0..5 {
        service.capture(render_error(), None);
        clock.advance(Duration::seconds(1));
    }

    let events = service.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].occurrences, 5);
    assert_eq!(events[0].fingerprint, fingerprint(&render_error()));

    let snapshot = service.snapshot();
    assert_eq!(snapshot.total, 5);
    assert_eq!(snapshot.unique_issues, 1);
    assert_eq!(snapshot.top_issues[0].occurrences, 5);
}

#[test]
fn test_different_fingerprints_never_merge() {
    let (service, _) = create_service(TelemetryConfig::default());
    service.capture(custom_event("shift_published"), None);
    service.capture(custom_event("shift_archived"), None);
    assert_eq!(service.events().len(), 2);
}

#[test]
fn test_twelve_hundred_captures_keep_newest_thousand() {
    let (service, _) = create_service(TelemetryConfig::default());

    for i in 0..1200 {
        service.capture(custom_event(&format!("event-{i}")), None);
    }

    let events = service.events();
    assert_eq!(events.len(), 1000);
    let names: Vec<String> = events
        .iter()
        .map(|e| match &e.kind {
            EntryKind::Custom { name, .. } => name.clone(),
            other => panic!("unexpected kind: {other:?}"),
        })
        .collect();
    assert_eq!(names.first().map(String::as_str), Some("event-1199"));
    assert_eq!(names.last().map(String::as_str), Some("event-200"));
    assert!(!names.iter().any(|n| n == "event-199"));
}

#[test]
fn test_summarize_empty_is_all_zero() {
    let snapshot = AggregationEngine::default().summarize(
        &[],
        &[],
        Some(Duration::hours(1)),
        chrono::Utc::now(),
    );
    assert_eq!(snapshot.total, 0);
    assert_eq!(snapshot.rate_per_minute, 0.0);
    assert!(Category::ALL
        .iter()
        .all(|c| snapshot.by_category.get(c) == Some(&0)));
    assert!(snapshot.top_issues.is_empty());
}

#[test]
fn test_window_excludes_stale_entries() {
    let (service, clock) = create_service(TelemetryConfig::default());
    service.capture(custom_event("old"), None);
    clock.advance(Duration::hours(2));
    service.capture(custom_event("fresh"), None);

    assert_eq!(service.snapshot().total, 1);
    assert_eq!(service.snapshot_with_window(None).total, 2);
}

// ============================================================================
// Alerting Tests
// ============================================================================

#[test]
fn test_cpu_threshold_sequence_with_cooldown() {
    let config = TelemetryConfig {
        thresholds: vec![ThresholdRule::above("cpu", 80.0, Severity::Warning)],
        alert_cooldown_ms: 300_000,
        ..TelemetryConfig::default()
    };
    let (service, clock) = create_service(config);

    let mut alerts = Vec::new();
    for value in [50.0, 85.0, 90.0, 40.0, 95.0] {
        alerts.extend(service.record_metric("cpu", "dispatch-worker", value));
        clock.advance(Duration::minutes(1));
    }

    assert_eq!(alerts.len(), 1);
    let alert = &alerts[0];
    assert_eq!(alert.current_value, 85.0);
    assert_eq!(alert.threshold, 80.0);
    assert_eq!(alert.cooldown_until - alert.timestamp, Duration::minutes(5));

    // Cooldown has elapsed and the value still crosses
    clock.advance(Duration::minutes(1));
    let again = service.record_metric("cpu", "dispatch-worker", 97.0);
    assert!(again.is_some());
}

#[test]
fn test_sustained_breach_one_alert_per_cooldown_window() {
    let config = TelemetryConfig {
        thresholds: vec![ThresholdRule::above("cpu", 80.0, Severity::Warning)],
        ..TelemetryConfig::default()
    };
    let (service, clock) = create_service(config);

    let mut raised = 0;
    for _ in 0..30 {
        raised += usize::from(service.record_metric("cpu", "host", 95.0).is_some());
        clock.advance(Duration::minutes(1));
    }
    assert_eq!(raised, 6);
}

#[test]
fn test_alerts_are_tracked_per_source() {
    let config = TelemetryConfig {
        thresholds: vec![ThresholdRule::above("cpu", 80.0, Severity::Warning)],
        ..TelemetryConfig::default()
    };
    let (service, _) = create_service(config);

    assert!(service.record_metric("cpu", "a", 90.0).is_some());
    assert!(service.record_metric("cpu", "b", 90.0).is_some());
    assert_eq!(service.active_alerts().len(), 2);
}

#[test]
fn test_alert_auto_resolves_after_cooldown() {
    let config = TelemetryConfig {
        thresholds: vec![ThresholdRule::above("cpu", 80.0, Severity::Warning)],
        ..TelemetryConfig::default()
    };
    let (service, clock) = create_service(config);

    service.record_metric("cpu", "host", 90.0);
    clock.advance(Duration::minutes(6));
    service.record_metric("cpu", "host", 30.0);

    assert!(service.active_alerts().is_empty());
    assert_eq!(service.resolved_alerts().len(), 1);
}

#[test]
fn test_network_failures_raise_global_alert_on_capture() {
    let (service, _) = create_service(TelemetryConfig::default());
    for i in 0..6 {
        service.capture(
            EntryKind::NetworkFailure {
                url: format!("https://api.example.test/zones/{i}"),
                method: "GET".to_string(),
                status: Some(500),
                duration_ms: Some(40),
                message: None,
            },
            None,
        );
    }

    let alerts = service.active_alerts();
    let metrics: Vec<&str> = alerts.iter().map(|a| a.metric.as_str()).collect();
    assert_eq!(metrics, vec!["network_failures"]);
    assert_eq!(alerts[0].source, "global");

    // Already raised; the tick stays inside the cooldown
    assert!(service.tick().is_empty());
}

// ============================================================================
// Configuration Tests
// ============================================================================

#[test]
fn test_invalid_config_is_corrected_not_rejected() {
    let config = TelemetryConfig {
        event_capacity: 0,
        tick_interval_ms: 10,
        thresholds: vec![ThresholdRule::above("error_rate", f64::NAN, Severity::Warning)],
        ..TelemetryConfig::default()
    };
    let errors = validate_config(&config);
    assert_eq!(errors.len(), 3);
    assert!(errors
        .iter()
        .any(|e| matches!(e, ConfigError::InvalidThreshold { metric, .. } if metric == "error_rate")));

    let (service, _) = create_service(config);
    assert_eq!(service.config(), &sanitize(service.config().clone()));
    assert_eq!(service.config().event_capacity, 1000);
    assert_eq!(service.config().thresholds[0].threshold, 10.0);
}

#[test]
#[serial]
fn test_config_from_env() {
    std::env::set_var("TELEMETRY_EVENT_CAPACITY", "64");
    std::env::set_var("TELEMETRY_ALERT_COOLDOWN_MS", "60000");
    std::env::set_var("TELEMETRY_THRESHOLDS", "cpu>75:error");
    let config = TelemetryConfig::from_env();
    std::env::remove_var("TELEMETRY_EVENT_CAPACITY");
    std::env::remove_var("TELEMETRY_ALERT_COOLDOWN_MS");
    std::env::remove_var("TELEMETRY_THRESHOLDS");

    assert_eq!(config.event_capacity, 64);
    assert_eq!(config.alert_cooldown(), Duration::minutes(1));
    assert_eq!(
        config.thresholds,
        vec![ThresholdRule::above("cpu", 75.0, Severity::Error)]
    );
}
