//! Export workflow tests.
//!
//! Tests the `{events, metrics, alerts, exportedAt}` document produced from
//! live service state.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use chrono::{DateTime, Duration};
use serde_json::Value;
use tempfile::TempDir;

use territory_telemetry::config::TelemetryConfig;
use territory_telemetry::entry::{EntryKind, Severity};
use territory_telemetry::error::ExportError;
use territory_telemetry::service::{ExportDocument, TelemetryService};
use territory_telemetry::traits::ManualTimeProvider;

fn create_service() -> (TelemetryService, ManualTimeProvider) {
    let clock = ManualTimeProvider::default();
    let service = TelemetryService::with_clock(TelemetryConfig::default(), Arc::new(clock.clone()));
    (service, clock)
}

fn populate(service: &TelemetryService, clock: &ManualTimeProvider) {
    service.capture(
        EntryKind::ScriptError {
            message: "Assignment overlap".to_string(),
            error_type: Some("RangeError".to_string()),
            filename: None,
            line: None,
            column: None,
            stack: None,
            component: Some("AssignmentTable".to_string()),
            function: Some("validate".to_string()),
        },
        Some(Severity::Critical),
    );
    clock.advance(Duration::seconds(5));
    service.capture(
        EntryKind::Navigation {
            from: Some("/".to_string()),
            to: "/reports".to_string(),
        },
        None,
    );
    service.record_metric("page_load_ms", "/reports", 420.0);
    service.tick();
}

#[test]
fn test_export_snapshot_schema() {
    let (service, clock) = create_service();
    populate(&service, &clock);

    let json: Value = serde_json::from_str(&service.export_snapshot().unwrap()).unwrap();
    let object = json.as_object().unwrap();
    let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["alerts", "events", "exportedAt", "metrics"]);

    let events = json["events"].as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["category"], "navigation");
    assert_eq!(events[1]["kind"]["kind"], "script_error");
    assert_eq!(events[1]["kind"]["errorType"], "RangeError");
    assert!(events[1]["lastSeen"].is_string());

    assert_eq!(json["metrics"]["criticalErrors"], 1);
    assert_eq!(json["metrics"]["byCategory"]["javascript"], 1);
    assert_eq!(json["metrics"]["performance"]["page_load_ms"]["count"], 1);

    let alerts = json["alerts"].as_array().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0]["metric"], "critical_errors");
    assert!(alerts[0]["cooldownUntil"].is_string());

    let exported_at = json["exportedAt"].as_str().unwrap();
    assert!(DateTime::parse_from_rfc3339(exported_at).is_ok());
}

#[test]
fn test_export_round_trips_into_document() {
    let (service, clock) = create_service();
    populate(&service, &clock);

    let document: ExportDocument =
        serde_json::from_str(&service.export_snapshot().unwrap()).unwrap();
    let expected = service.export_document();
    assert_eq!(document.events, expected.events);
    assert_eq!(document.alerts, expected.alerts);
    assert_eq!(document.exported_at, expected.exported_at);
    assert_eq!(document.metrics.total, expected.metrics.total);
}

#[test]
fn test_export_to_path_writes_file() {
    let (service, clock) = create_service();
    populate(&service, &clock);

    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("telemetry.json");
    service.export_to_path(&path).unwrap();

    let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written["events"].as_array().unwrap().len(), 2);
}

#[test]
fn test_export_to_unwritable_path_reports_error() {
    let (service, _) = create_service();
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let path = temp_dir.path().join("no-such-dir").join("telemetry.json");

    let err = service.export_to_path(&path).unwrap_err();
    assert!(matches!(err, ExportError::Write { .. }));
    assert!(err.to_string().contains("no-such-dir"));
}

#[test]
fn test_export_empty_service() {
    let (service, _) = create_service();
    let document = service.export_document();
    assert!(document.events.is_empty());
    assert!(document.alerts.is_empty());
    assert_eq!(document.metrics.total, 0);
}
