//! Replay workflow tests.
//!
//! Tests decoding a JSON-lines session and applying it to a service, the
//! way the `telemetry-replay` binary does.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use territory_telemetry::alerting::ThresholdRule;
use territory_telemetry::config::TelemetryConfig;
use territory_telemetry::entry::{Category, Severity};
use territory_telemetry::error::IngestError;
use territory_telemetry::ingest::{parse_line, Applied};
use territory_telemetry::service::TelemetryService;
use territory_telemetry::traits::ManualTimeProvider;

const SESSION: &str = r##"
# morning dispatch session
{"op":"breadcrumb","category":"navigation","message":"/dispatch"}
{"op":"capture","entry":{"kind":"user_interaction","action":"click","target":"#assign-btn","component":"DispatchPanel"}}
{"op":"capture","entry":{"kind":"network_failure","url":"https://api.example.test/assign?id=9","method":"post","status":503}}
{"op":"capture","entry":{"kind":"network_failure","url":"https://api.example.test/assign?id=10","method":"POST","status":503}}
{"op":"metric","name":"memory_mb","source":"tab-1","value":512}
this line is broken
{"op":"metric","name":"memory_mb","source":"tab-1","value":2048}
{"op":"tick"}
"##;

fn create_service() -> TelemetryService {
    let config = TelemetryConfig {
        thresholds: vec![ThresholdRule::above("memory_mb", 1024.0, Severity::Warning)],
        ..TelemetryConfig::default()
    };
    TelemetryService::with_clock(config, Arc::new(ManualTimeProvider::default()))
}

fn replay(service: &TelemetryService, input: &str) -> (Vec<Applied>, Vec<IngestError>) {
    let mut applied = Vec::new();
    let mut errors = Vec::new();
    for (i, line) in input.lines().enumerate() {
        match parse_line(i + 1, line) {
            Ok(Some(command)) => applied.push(command.apply(service)),
            Ok(None) => {}
            Err(e) => errors.push(e),
        }
    }
    (applied, errors)
}

#[test]
fn test_replay_session() {
    let service = create_service();
    let (applied, errors) = replay(&service, SESSION);

    assert_eq!(applied.len(), 7);
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], IngestError::Parse { line: 8, .. }));

    // Query strings and method case do not split the issue
    let events = service.events();
    assert_eq!(events.len(), 2);
    let network = events
        .iter()
        .find(|e| e.category == Category::Network)
        .unwrap();
    assert_eq!(network.occurrences, 2);
    assert_eq!(network.severity, Severity::Warning);
    assert_eq!(network.breadcrumbs.len(), 2);

    let alerts = service.active_alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].metric, "memory_mb");
    // 2048 is double the threshold exactly, not beyond it
    assert_eq!(alerts[0].severity, Severity::Warning);

    let rollup = &service.snapshot().performance["memory_mb"];
    assert_eq!(rollup.count, 2);
    assert!((rollup.max - 2048.0).abs() < f64::EPSILON);
}

#[test]
fn test_replay_dismiss_and_clear() {
    let service = create_service();
    replay(&service, SESSION);
    let alert_id = service.active_alerts()[0].id;

    let script = format!("{{\"op\":\"dismiss\",\"id\":\"{alert_id}\"}}\n{{\"op\":\"clear\"}}");
    let (applied, errors) = replay(&service, &script);

    assert!(errors.is_empty());
    assert_eq!(applied, vec![Applied::Dismissed(true), Applied::Recorded]);
    assert!(service.events().is_empty());
    assert!(service.active_alerts().is_empty());
}
