//! Rollups over buffered entries.
//!
//! This module provides:
//! - Counts grouped by category, severity and component
//! - Top-N issues ranked by occurrences
//! - Event and error rates per minute over a rolling window
//! - Per-metric rollups of performance samples
//!
//! Every function here is pure: it reads slices and returns a fresh
//! [`MetricSnapshot`]. An empty input yields an all-zero snapshot.
//!
//! # Example
//!
//! ```
//! use territory_telemetry::aggregation::AggregationEngine;
//! use chrono::Utc;
//!
//! let engine = AggregationEngine::new(10);
//! let snapshot = engine.summarize(&[], &[], None, Utc::now());
//! assert_eq!(snapshot.total, 0);
//! assert!(snapshot.by_category.values().all(|&count| count == 0));
//! ```

// Counts comfortably fit f64's mantissa
#![allow(clippy::cast_precision_loss)]

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{Category, Entry, PerformanceSample, Severity};

/// Default number of issues kept in [`MetricSnapshot::top_issues`].
pub const DEFAULT_TOP_N: usize = 10;

/// One row of the top-issues table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSummary {
    /// Deduplication key.
    pub fingerprint: String,
    /// Category.
    pub category: Category,
    /// Highest severity seen.
    pub severity: Severity,
    /// One-line description.
    pub message: String,
    /// Originating component.
    pub component: Option<String>,
    /// Number of merged captures.
    pub occurrences: u64,
    /// First capture.
    pub first_seen: DateTime<Utc>,
    /// Latest capture.
    pub last_seen: DateTime<Utc>,
}

impl From<&Entry> for IssueSummary {
    fn from(entry: &Entry) -> Self {
        Self {
            fingerprint: entry.fingerprint.clone(),
            category: entry.category,
            severity: entry.severity,
            message: entry.kind.summary(),
            component: entry.kind.component().map(String::from),
            occurrences: entry.occurrences,
            first_seen: entry.timestamp,
            last_seen: entry.last_seen,
        }
    }
}

/// Summary statistics for one performance metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MetricRollup {
    /// Number of samples.
    pub count: u64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Arithmetic mean.
    pub avg: f64,
    /// 95th percentile (nearest rank).
    pub p95: f64,
    /// Most recent value.
    pub latest: f64,
}

/// Point-in-time aggregate over the buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSnapshot {
    /// When the snapshot was computed.
    pub computed_at: DateTime<Utc>,
    /// Rolling window used, if any.
    pub window_ms: Option<u64>,
    /// Captures in scope, counting merged recurrences.
    pub total: u64,
    /// Distinct fingerprints in scope.
    pub unique_issues: u64,
    /// Captures that count as failures.
    pub error_count: u64,
    /// Captures at `Critical` severity.
    pub critical_errors: u64,
    /// Captures in the network category.
    pub network_failures: u64,
    /// Captures per category. Every category is present.
    pub by_category: BTreeMap<Category, u64>,
    /// Captures per severity. Every level is present.
    pub by_severity: BTreeMap<Severity, u64>,
    /// Failure captures per originating component.
    pub by_component: BTreeMap<String, u64>,
    /// Most frequent issues.
    pub top_issues: Vec<IssueSummary>,
    /// Captures per minute.
    pub rate_per_minute: f64,
    /// Failure captures per minute.
    pub error_rate_per_minute: f64,
    /// Rollups per performance metric name.
    pub performance: BTreeMap<String, MetricRollup>,
}

impl MetricSnapshot {
    /// All-zero snapshot.
    #[must_use]
    pub fn empty(at: DateTime<Utc>) -> Self {
        Self {
            computed_at: at,
            window_ms: None,
            total: 0,
            unique_issues: 0,
            error_count: 0,
            critical_errors: 0,
            network_failures: 0,
            by_category: Category::ALL.iter().map(|c| (*c, 0)).collect(),
            by_severity: Severity::ALL.iter().map(|s| (*s, 0)).collect(),
            by_component: BTreeMap::new(),
            top_issues: Vec::new(),
            rate_per_minute: 0.0,
            error_rate_per_minute: 0.0,
            performance: BTreeMap::new(),
        }
    }

    /// Value of a named snapshot metric, as used by threshold rules.
    ///
    /// Known names: `error_rate`, `event_rate`, `error_count`,
    /// `critical_errors`, `network_failures`, `unique_issues`, `total`.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        let value = match name {
            "error_rate" => self.error_rate_per_minute,
            "event_rate" => self.rate_per_minute,
            "error_count" => self.error_count as f64,
            "critical_errors" => self.critical_errors as f64,
            "network_failures" => self.network_failures as f64,
            "unique_issues" => self.unique_issues as f64,
            "total" => self.total as f64,
            _ => return None,
        };
        Some(value)
    }
}

/// Computes [`MetricSnapshot`]s.
#[derive(Debug, Clone, Copy)]
pub struct AggregationEngine {
    top_n: usize,
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new(DEFAULT_TOP_N)
    }
}

impl AggregationEngine {
    /// Create an engine keeping `top_n` issues per snapshot.
    #[must_use]
    pub const fn new(top_n: usize) -> Self {
        Self { top_n }
    }

    /// Summarize entries and samples as of `now`.
    ///
    /// With a `window`, only entries last seen (and samples taken) within
    /// `window` of `now` are considered; otherwise everything is. A window
    /// reaching past the earliest representable time selects everything.
    #[must_use]
    pub fn summarize(
        &self,
        entries: &[Entry],
        samples: &[PerformanceSample],
        window: Option<Duration>,
        now: DateTime<Utc>,
    ) -> MetricSnapshot {
        let cutoff = window.and_then(|w| now.checked_sub_signed(w));
        let in_scope: Vec<&Entry> = entries
            .iter()
            .filter(|e| cutoff.is_none_or(|c| e.last_seen >= c))
            .collect();

        let mut snapshot = MetricSnapshot::empty(now);
        snapshot.window_ms = window.and_then(|w| u64::try_from(w.num_milliseconds()).ok());
        snapshot.unique_issues = in_scope.len() as u64;

        for entry in &in_scope {
            let n = entry.occurrences;
            snapshot.total += n;
            *snapshot.by_category.entry(entry.category).or_insert(0) += n;
            *snapshot.by_severity.entry(entry.severity).or_insert(0) += n;
            if entry.is_error() {
                snapshot.error_count += n;
                if let Some(component) = entry.kind.component() {
                    *snapshot
                        .by_component
                        .entry(component.to_string())
                        .or_insert(0) += n;
                }
            }
            if entry.severity == Severity::Critical {
                snapshot.critical_errors += n;
            }
            if entry.category == Category::Network {
                snapshot.network_failures += n;
            }
        }

        snapshot.top_issues = top_issues(&in_scope, self.top_n);

        let minutes = span_minutes(&in_scope, window, now);
        if minutes > 0.0 {
            snapshot.rate_per_minute = snapshot.total as f64 / minutes;
            snapshot.error_rate_per_minute = snapshot.error_count as f64 / minutes;
        }

        snapshot.performance = rollup_samples(samples, cutoff);
        snapshot
    }
}

/// Rank by occurrences descending, ties broken by most recent `last_seen`.
fn top_issues(entries: &[&Entry], n: usize) -> Vec<IssueSummary> {
    let mut ranked: Vec<&Entry> = entries.to_vec();
    ranked.sort_by_key(|e| (Reverse(e.occurrences), Reverse(e.last_seen)));
    ranked.into_iter().take(n).map(IssueSummary::from).collect()
}

/// Length of the rate denominator in minutes, never below one.
fn span_minutes(entries: &[&Entry], window: Option<Duration>, now: DateTime<Utc>) -> f64 {
    let span = window.unwrap_or_else(|| {
        entries
            .iter()
            .map(|e| e.timestamp)
            .min()
            .map_or_else(Duration::zero, |oldest| now - oldest)
    });
    (span.num_milliseconds() as f64 / 60_000.0).max(1.0)
}

fn rollup_samples(
    samples: &[PerformanceSample],
    cutoff: Option<DateTime<Utc>>,
) -> BTreeMap<String, MetricRollup> {
    let mut grouped: BTreeMap<&str, Vec<&PerformanceSample>> = BTreeMap::new();
    for sample in samples {
        if !sample.value.is_finite() || cutoff.is_some_and(|c| sample.timestamp < c) {
            continue;
        }
        grouped.entry(sample.metric.as_str()).or_default().push(sample);
    }

    grouped
        .into_iter()
        .map(|(metric, group)| (metric.to_string(), rollup(&group)))
        .collect()
}

fn rollup(group: &[&PerformanceSample]) -> MetricRollup {
    if group.is_empty() {
        return MetricRollup::default();
    }
    let mut values: Vec<f64> = group.iter().map(|s| s.value).collect();
    values.sort_by(f64::total_cmp);

    let count = values.len();
    let rank = ((count as f64) * 0.95).ceil() as usize;
    let p95 = values[rank.clamp(1, count) - 1];
    let latest = group
        .iter()
        .max_by_key(|s| s.timestamp)
        .map_or(0.0, |s| s.value);

    MetricRollup {
        count: count as u64,
        min: values[0],
        max: values[count - 1],
        avg: values.iter().sum::<f64>() / count as f64,
        p95,
        latest,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::float_cmp,
    clippy::cast_possible_wrap
)]
mod tests {
    use super::*;
    use crate::entry::EntryKind;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap as Map;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn custom(name: &str, severity: Severity, minute: i64) -> Entry {
        Entry::new(
            EntryKind::Custom {
                name: name.to_string(),
                message: None,
                component: Some("Dashboard".to_string()),
                properties: Map::new(),
            },
            severity,
            t0() + Duration::minutes(minute),
        )
    }

    fn network(url: &str, minute: i64) -> Entry {
        Entry::new(
            EntryKind::NetworkFailure {
                url: url.to_string(),
                method: "GET".to_string(),
                status: Some(500),
                duration_ms: None,
                message: None,
            },
            Severity::Warning,
            t0() + Duration::minutes(minute),
        )
    }

    fn sample(metric: &str, value: f64, minute: i64) -> PerformanceSample {
        PerformanceSample {
            metric: metric.to_string(),
            source: "host".to_string(),
            value,
            timestamp: t0() + Duration::minutes(minute),
        }
    }

    #[test]
    fn test_empty_summary() {
        let snapshot = AggregationEngine::default().summarize(&[], &[], None, t0());
        assert_eq!(snapshot, MetricSnapshot::empty(t0()));
        assert_eq!(snapshot.by_category.len(), Category::ALL.len());
        assert_eq!(snapshot.by_severity.len(), Severity::ALL.len());
        assert_eq!(snapshot.rate_per_minute, 0.0);
    }

    #[test]
    fn test_empty_summary_with_window() {
        let snapshot = AggregationEngine::default().summarize(
            &[],
            &[],
            Some(Duration::minutes(5)),
            t0(),
        );
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.window_ms, Some(300_000));
        assert_eq!(snapshot.error_rate_per_minute, 0.0);
    }

    #[test]
    fn test_counts_weighted_by_occurrences() {
        let mut repeated = custom("sync_failed", Severity::Error, 0);
        repeated.record_occurrence(t0() + Duration::minutes(1), Severity::Error);
        repeated.record_occurrence(t0() + Duration::minutes(2), Severity::Error);
        let entries = vec![repeated, custom("page_view", Severity::Info, 1), network("/api", 2)];

        let snapshot = AggregationEngine::default().summarize(&entries, &[], None, t0() + Duration::minutes(2));
        assert_eq!(snapshot.total, 5);
        assert_eq!(snapshot.unique_issues, 3);
        assert_eq!(snapshot.by_category[&Category::Custom], 4);
        assert_eq!(snapshot.by_category[&Category::Network], 1);
        assert_eq!(snapshot.by_category[&Category::Javascript], 0);
        assert_eq!(snapshot.by_severity[&Severity::Error], 3);
        assert_eq!(snapshot.error_count, 4);
        assert_eq!(snapshot.network_failures, 1);
        assert_eq!(snapshot.by_component.get("Dashboard"), Some(&3));
    }

    #[test]
    fn test_window_filters_by_last_seen() {
        let entries = vec![
            custom("old", Severity::Error, 0),
            custom("recent", Severity::Error, 55),
        ];
        let now = t0() + Duration::minutes(60);
        let snapshot = AggregationEngine::default().summarize(
            &entries,
            &[],
            Some(Duration::minutes(10)),
            now,
        );
        assert_eq!(snapshot.total, 1);
        assert_eq!(snapshot.top_issues[0].message, "recent");
        assert!((snapshot.rate_per_minute - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_window_past_earliest_time_selects_everything() {
        let entries = vec![custom("ancient", Severity::Error, -600), network("/api", 0)];
        let snapshot = AggregationEngine::default().summarize(
            &entries,
            &[sample("cpu", 40.0, -600)],
            Some(Duration::milliseconds(i64::MAX)),
            t0(),
        );
        assert_eq!(snapshot.total, 2);
        assert_eq!(snapshot.performance["cpu"].count, 1);
    }

    #[test]
    fn test_rate_without_window_spans_oldest_entry() {
        let entries: Vec<Entry> = (0..10).map(|m| network(&format!("/api/{m}"), m)).collect();
        let snapshot = AggregationEngine::default().summarize(
            &entries,
            &[],
            None,
            t0() + Duration::minutes(5),
        );
        assert!((snapshot.rate_per_minute - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_rate_minimum_one_minute() {
        let entries = vec![custom("burst", Severity::Error, 0)];
        let snapshot = AggregationEngine::default().summarize(&entries, &[], None, t0());
        assert!((snapshot.rate_per_minute - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_top_issues_ranking_and_ties() {
        let mut frequent = custom("frequent", Severity::Error, 0);
        for m in 1..4 {
            frequent.record_occurrence(t0() + Duration::minutes(m), Severity::Error);
        }
        let tie_old = custom("tie_old", Severity::Error, 1);
        let tie_new = custom("tie_new", Severity::Error, 2);
        let entries = vec![tie_old, frequent, tie_new];

        let snapshot = AggregationEngine::new(2).summarize(&entries, &[], None, t0() + Duration::minutes(5));
        let names: Vec<&str> = snapshot.top_issues.iter().map(|i| i.message.as_str()).collect();
        assert_eq!(names, vec!["frequent", "tie_new"]);
        assert_eq!(snapshot.top_issues[0].occurrences, 4);
    }

    #[test]
    fn test_performance_rollup() {
        let samples: Vec<PerformanceSample> = (1..=20)
            .map(|v| sample("page_load_ms", f64::from(v) * 10.0, i64::from(v)))
            .chain(std::iter::once(sample("page_load_ms", f64::NAN, 21)))
            .collect();
        let snapshot = AggregationEngine::default().summarize(
            &[],
            &samples,
            None,
            t0() + Duration::minutes(30),
        );
        let rollup = &snapshot.performance["page_load_ms"];
        assert_eq!(rollup.count, 20);
        assert_eq!(rollup.min, 10.0);
        assert_eq!(rollup.max, 200.0);
        assert!((rollup.avg - 105.0).abs() < f64::EPSILON);
        assert_eq!(rollup.p95, 190.0);
        assert_eq!(rollup.latest, 200.0);
    }

    #[test]
    fn test_performance_window() {
        let samples = vec![sample("cpu", 90.0, 0), sample("cpu", 30.0, 59)];
        let snapshot = AggregationEngine::default().summarize(
            &[],
            &samples,
            Some(Duration::minutes(5)),
            t0() + Duration::minutes(60),
        );
        assert_eq!(snapshot.performance["cpu"].count, 1);
        assert_eq!(snapshot.performance["cpu"].max, 30.0);
    }

    #[test]
    fn test_snapshot_metric_lookup() {
        let entries = vec![custom("fatal", Severity::Critical, 0)];
        let snapshot = AggregationEngine::default().summarize(&entries, &[], None, t0());
        assert_eq!(snapshot.metric("critical_errors"), Some(1.0));
        assert_eq!(snapshot.metric("error_rate"), Some(1.0));
        assert_eq!(snapshot.metric("cpu"), None);
    }

    #[test]
    fn test_snapshot_serializes_enum_keys() {
        let snapshot = MetricSnapshot::empty(t0());
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["byCategory"]["javascript"], 0);
        assert_eq!(json["bySeverity"]["critical"], 0);
    }
}
