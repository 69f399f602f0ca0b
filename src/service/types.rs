//! Values published and exported by the service.

use serde::{Deserialize, Serialize};

use crate::aggregation::MetricSnapshot;
use crate::alerting::AlertRecord;
use crate::entry::{Breadcrumb, Entry};

/// Service lifecycle.
///
/// ```text
/// Created --start--> Running --stop--> Stopped
///    |                                    ^
///    +---------------stop-----------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Constructed, no timer running. Captures are accepted.
    #[default]
    Created,
    /// Periodic recompute timer running.
    Running,
    /// Timer cancelled, subscribers dropped, captures rejected.
    Stopped,
}

/// State delivered to subscribers on every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringState {
    /// Aggregate over the configured window.
    pub snapshot: MetricSnapshot,
    /// Active alerts, newest first.
    pub active_alerts: Vec<AlertRecord>,
    /// Most recently captured entries, newest first.
    pub recent_events: Vec<Entry>,
    /// Most recent breadcrumbs, newest first.
    pub recent_breadcrumbs: Vec<Breadcrumb>,
    /// Lifecycle at publish time.
    pub lifecycle: LifecycleState,
}

impl MonitoringState {
    /// State of a service that has not captured anything yet.
    #[must_use]
    pub fn empty(at: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            snapshot: MetricSnapshot::empty(at),
            active_alerts: Vec::new(),
            recent_events: Vec::new(),
            recent_breadcrumbs: Vec::new(),
            lifecycle: LifecycleState::Created,
        }
    }
}

/// Document produced by [`export_snapshot`](super::TelemetryService::export_snapshot).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    /// Every buffered entry, newest first.
    pub events: Vec<Entry>,
    /// Snapshot over the configured window.
    pub metrics: MetricSnapshot,
    /// Active alerts, newest first.
    pub alerts: Vec<AlertRecord>,
    /// Export time, RFC 3339 with millisecond precision.
    pub exported_at: String,
}
