//! Threshold alerting.
//!
//! Each `(metric, source)` pair runs a small state machine:
//!
//! ```text
//! Normal --value crosses--> Triggered --record created--> Cooldown
//!   ^                                                        |
//!   +--- cooldown elapsed and value back in range -----------+
//! ```
//!
//! While in cooldown a pair cannot produce a second alert. Once the
//! cooldown has elapsed, a value still crossing re-triggers; a value back
//! in range resolves the active alert. Dismissal removes an alert from the
//! active list without touching the state machine.

// Thresholds are compared as f64, counts are converted for display only
#![allow(clippy::cast_precision_loss)]

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregation::MetricSnapshot;
use crate::buffer::RingBuffer;
use crate::entry::Severity;

/// Source label used for metrics derived from the snapshot.
pub const GLOBAL_SOURCE: &str = "global";

/// Number of resolved alerts kept for inspection.
pub const RESOLVED_HISTORY: usize = 50;

/// Which side of the threshold is bad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdDirection {
    /// Alert when value is strictly greater than the threshold.
    Above,
    /// Alert when value is strictly less than the threshold.
    Below,
}

/// A static threshold for one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdRule {
    /// Metric name.
    pub metric: String,
    /// Threshold value.
    pub threshold: f64,
    /// Which side is bad.
    pub direction: ThresholdDirection,
    /// Base severity of alerts raised by this rule.
    pub severity: Severity,
}

impl ThresholdRule {
    /// Rule firing when `metric > threshold`.
    #[must_use]
    pub fn above(metric: impl Into<String>, threshold: f64, severity: Severity) -> Self {
        Self {
            metric: metric.into(),
            threshold,
            direction: ThresholdDirection::Above,
            severity,
        }
    }

    /// Rule firing when `metric < threshold`.
    #[must_use]
    pub fn below(metric: impl Into<String>, threshold: f64, severity: Severity) -> Self {
        Self {
            metric: metric.into(),
            threshold,
            direction: ThresholdDirection::Below,
            severity,
        }
    }

    /// Whether `value` is on the bad side.
    #[must_use]
    pub fn is_crossed(&self, value: f64) -> bool {
        match self.direction {
            ThresholdDirection::Above => value > self.threshold,
            ThresholdDirection::Below => value < self.threshold,
        }
    }

    /// Severity for a crossing value: one level above base when the
    /// overshoot is at least double.
    #[must_use]
    pub fn severity_for(&self, value: f64) -> Severity {
        let far = match self.direction {
            ThresholdDirection::Above => self.threshold > 0.0 && value > self.threshold * 2.0,
            ThresholdDirection::Below => self.threshold > 0.0 && value < self.threshold / 2.0,
        };
        if far {
            self.severity.escalate()
        } else {
            self.severity
        }
    }
}

/// Default rules for snapshot metrics.
#[must_use]
pub fn default_rules() -> Vec<ThresholdRule> {
    vec![
        ThresholdRule::above("error_rate", 10.0, Severity::Warning),
        ThresholdRule::above("critical_errors", 0.0, Severity::Critical),
        ThresholdRule::above("network_failures", 5.0, Severity::Warning),
    ]
}

/// An alert raised when a metric crossed its threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    /// Unique id.
    pub id: Uuid,
    /// Severity.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Metric name.
    pub metric: String,
    /// Where the value was measured.
    pub source: String,
    /// Value at trigger time.
    pub current_value: f64,
    /// Threshold that was crossed.
    pub threshold: f64,
    /// Trigger time.
    pub timestamp: DateTime<Utc>,
    /// The same pair cannot re-trigger before this instant.
    pub cooldown_until: DateTime<Utc>,
}

/// Per-pair state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertPhase {
    /// Value in range, no active alert.
    #[default]
    Normal,
    /// Alert raised; no re-trigger until the instant passes.
    Cooldown {
        /// End of the cooldown window.
        until: DateTime<Utc>,
    },
}

type AlertKey = (String, String);

/// Evaluates values against [`ThresholdRule`]s.
#[derive(Debug)]
pub struct ThresholdAlerter {
    rules: Vec<ThresholdRule>,
    cooldown: Duration,
    phases: HashMap<AlertKey, AlertPhase>,
    active: Vec<AlertRecord>,
    resolved: RingBuffer<AlertRecord>,
    triggered_total: u64,
}

impl ThresholdAlerter {
    /// Create an alerter.
    #[must_use]
    pub fn new(rules: Vec<ThresholdRule>, cooldown: Duration) -> Self {
        Self {
            rules,
            cooldown,
            phases: HashMap::new(),
            active: Vec::new(),
            resolved: RingBuffer::new(RESOLVED_HISTORY),
            triggered_total: 0,
        }
    }

    /// Configured rules.
    #[must_use]
    pub fn rules(&self) -> &[ThresholdRule] {
        &self.rules
    }

    /// Current phase for a pair.
    #[must_use]
    pub fn phase(&self, metric: &str, source: &str) -> AlertPhase {
        self.phases
            .get(&(metric.to_string(), source.to_string()))
            .copied()
            .unwrap_or_default()
    }

    /// Evaluate one value for `(metric, source)` at `now`.
    ///
    /// Returns the alert created by this evaluation, if any. When several
    /// rules exist for the metric, the most severe crossed rule wins.
    pub fn evaluate(
        &mut self,
        metric: &str,
        source: &str,
        value: f64,
        now: DateTime<Utc>,
    ) -> Option<AlertRecord> {
        if !value.is_finite() {
            tracing::debug!(metric, source, value, "Ignoring non-finite metric value");
            return None;
        }

        let mut matching = self.rules.iter().filter(|r| r.metric == metric).peekable();
        matching.peek()?;
        let crossed = matching
            .filter(|r| r.is_crossed(value))
            .max_by_key(|r| r.severity_for(value))
            .cloned();

        let key = (metric.to_string(), source.to_string());
        let phase = self.phases.get(&key).copied().unwrap_or_default();

        match (phase, crossed) {
            (AlertPhase::Normal, Some(rule)) => Some(self.trigger(key, &rule, value, now)),
            (AlertPhase::Normal, None) => None,
            (AlertPhase::Cooldown { until }, _) if now < until => None,
            (AlertPhase::Cooldown { .. }, Some(rule)) => Some(self.trigger(key, &rule, value, now)),
            (AlertPhase::Cooldown { .. }, None) => {
                self.resolve(&key, now);
                None
            }
        }
    }

    /// Evaluate every rule whose metric the snapshot knows, with source
    /// [`GLOBAL_SOURCE`].
    pub fn evaluate_snapshot(
        &mut self,
        snapshot: &MetricSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<AlertRecord> {
        let mut metrics: Vec<String> = self.rules.iter().map(|r| r.metric.clone()).collect();
        metrics.sort();
        metrics.dedup();

        metrics
            .into_iter()
            .filter_map(|metric| {
                let value = snapshot.metric(&metric)?;
                self.evaluate(&metric, GLOBAL_SOURCE, value, now)
            })
            .collect()
    }

    /// Remove an alert from the active list. Returns whether it was there.
    pub fn dismiss(&mut self, id: Uuid) -> bool {
        let before = self.active.len();
        self.active.retain(|a| a.id != id);
        let removed = self.active.len() != before;
        if removed {
            tracing::debug!(alert_id = %id, "Alert dismissed");
        }
        removed
    }

    /// Active alerts, newest first.
    #[must_use]
    pub fn active(&self) -> Vec<AlertRecord> {
        self.active.iter().rev().cloned().collect()
    }

    /// Auto-resolved alerts, newest first.
    #[must_use]
    pub fn resolved(&self) -> Vec<AlertRecord> {
        self.resolved.to_vec()
    }

    /// Alerts raised since creation or the last [`clear`](Self::clear).
    #[must_use]
    pub const fn triggered_total(&self) -> u64 {
        self.triggered_total
    }

    /// Forget every alert and return every pair to `Normal`.
    pub fn clear(&mut self) {
        self.phases.clear();
        self.active.clear();
        self.resolved.clear();
        self.triggered_total = 0;
    }

    fn trigger(
        &mut self,
        key: AlertKey,
        rule: &ThresholdRule,
        value: f64,
        now: DateTime<Utc>,
    ) -> AlertRecord {
        let (metric, source) = &key;
        let comparison = match rule.direction {
            ThresholdDirection::Above => "above",
            ThresholdDirection::Below => "below",
        };
        let record = AlertRecord {
            id: Uuid::new_v4(),
            severity: rule.severity_for(value),
            message: format!(
                "{metric} on {source} is {value:.2}, {comparison} threshold {:.2}",
                rule.threshold
            ),
            metric: metric.clone(),
            source: source.clone(),
            current_value: value,
            threshold: rule.threshold,
            timestamp: now,
            cooldown_until: now + self.cooldown,
        };

        tracing::warn!(
            metric = %metric,
            source = %source,
            value,
            threshold = rule.threshold,
            severity = %record.severity,
            "Threshold alert triggered"
        );

        self.active
            .retain(|a| !(a.metric == record.metric && a.source == record.source));
        self.active.push(record.clone());
        self.phases.insert(
            key,
            AlertPhase::Cooldown {
                until: record.cooldown_until,
            },
        );
        self.triggered_total += 1;
        record
    }

    fn resolve(&mut self, key: &AlertKey, now: DateTime<Utc>) {
        let (metric, source) = key;
        self.phases.insert(key.clone(), AlertPhase::Normal);

        let (resolved, still_active): (Vec<AlertRecord>, Vec<AlertRecord>) = self
            .active
            .drain(..)
            .partition(|a| &a.metric == metric && &a.source == source);
        self.active = still_active;
        for record in resolved {
            tracing::info!(
                metric = %metric,
                source = %source,
                alert_id = %record.id,
                resolved_at = %now,
                "Threshold alert resolved"
            );
            self.resolved.push(record);
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::float_cmp
)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    fn t(minute: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute)
    }

    fn cpu_alerter() -> ThresholdAlerter {
        ThresholdAlerter::new(
            vec![ThresholdRule::above("cpu", 80.0, Severity::Warning)],
            Duration::minutes(5),
        )
    }

    #[test_case(ThresholdDirection::Above, 80.0, false)]
    #[test_case(ThresholdDirection::Above, 80.1, true)]
    #[test_case(ThresholdDirection::Below, 80.0, false)]
    #[test_case(ThresholdDirection::Below, 79.9, true)]
    fn test_strict_crossing(direction: ThresholdDirection, value: f64, expected: bool) {
        let rule = ThresholdRule {
            metric: "cpu".to_string(),
            threshold: 80.0,
            direction,
            severity: Severity::Warning,
        };
        assert_eq!(rule.is_crossed(value), expected);
    }

    #[test]
    fn test_severity_escalates_on_large_overshoot() {
        let rule = ThresholdRule::above("latency", 100.0, Severity::Warning);
        assert_eq!(rule.severity_for(150.0), Severity::Warning);
        assert_eq!(rule.severity_for(250.0), Severity::Error);

        let low = ThresholdRule::below("success_rate", 0.8, Severity::Error);
        assert_eq!(low.severity_for(0.7), Severity::Error);
        assert_eq!(low.severity_for(0.3), Severity::Critical);
    }

    #[test]
    fn test_cpu_sequence_single_alert_within_cooldown() {
        let mut alerter = cpu_alerter();
        let values = [50.0, 85.0, 90.0, 40.0, 95.0];

        let alerts: Vec<AlertRecord> = values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| alerter.evaluate("cpu", "host", *v, t(i64::try_from(i).unwrap())))
            .collect();

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].current_value, 85.0);
        assert_eq!(alerts[0].timestamp, t(1));
        assert_eq!(alerts[0].cooldown_until, t(6));
        assert_eq!(alerter.active().len(), 1);
    }

    #[test]
    fn test_retrigger_after_cooldown() {
        let mut alerter = cpu_alerter();
        assert!(alerter.evaluate("cpu", "host", 85.0, t(0)).is_some());
        assert!(alerter.evaluate("cpu", "host", 99.0, t(4)).is_none());
        let second = alerter.evaluate("cpu", "host", 91.0, t(5));
        assert!(second.is_some());
        assert_eq!(alerter.active().len(), 1);
        assert_eq!(alerter.active()[0].current_value, 91.0);
        assert_eq!(alerter.triggered_total(), 2);
    }

    #[test]
    fn test_one_alert_per_cooldown_window_under_sustained_breach() {
        let mut alerter = cpu_alerter();
        let count = (0..30)
            .filter_map(|minute| alerter.evaluate("cpu", "host", 95.0, t(minute)))
            .count();
        assert_eq!(count, 6);
    }

    #[test]
    fn test_auto_resolve_after_cooldown() {
        let mut alerter = cpu_alerter();
        alerter.evaluate("cpu", "host", 85.0, t(0));
        assert!(matches!(alerter.phase("cpu", "host"), AlertPhase::Cooldown { .. }));

        assert!(alerter.evaluate("cpu", "host", 40.0, t(2)).is_none());
        assert_eq!(alerter.active().len(), 1);

        assert!(alerter.evaluate("cpu", "host", 40.0, t(5)).is_none());
        assert_eq!(alerter.phase("cpu", "host"), AlertPhase::Normal);
        assert!(alerter.active().is_empty());
        assert_eq!(alerter.resolved().len(), 1);
    }

    #[test]
    fn test_sources_are_independent() {
        let mut alerter = cpu_alerter();
        assert!(alerter.evaluate("cpu", "host-a", 85.0, t(0)).is_some());
        assert!(alerter.evaluate("cpu", "host-b", 85.0, t(0)).is_some());
        assert_eq!(alerter.active().len(), 2);
    }

    #[test]
    fn test_dismiss_keeps_cooldown() {
        let mut alerter = cpu_alerter();
        let alert = alerter.evaluate("cpu", "host", 85.0, t(0)).unwrap();
        assert!(alerter.dismiss(alert.id));
        assert!(!alerter.dismiss(alert.id));
        assert!(alerter.active().is_empty());

        assert!(alerter.evaluate("cpu", "host", 90.0, t(1)).is_none());
        assert!(alerter.evaluate("cpu", "host", 90.0, t(5)).is_some());
    }

    #[test]
    fn test_unknown_metric_and_non_finite_ignored() {
        let mut alerter = cpu_alerter();
        assert!(alerter.evaluate("memory", "host", 1e9, t(0)).is_none());
        assert!(alerter.evaluate("cpu", "host", f64::NAN, t(0)).is_none());
        assert!(alerter.evaluate("cpu", "host", f64::INFINITY, t(0)).is_none());
        assert_eq!(alerter.phase("memory", "host"), AlertPhase::Normal);
    }

    #[test]
    fn test_most_severe_rule_wins() {
        let mut alerter = ThresholdAlerter::new(
            vec![
                ThresholdRule::above("cpu", 80.0, Severity::Warning),
                ThresholdRule::above("cpu", 95.0, Severity::Critical),
            ],
            Duration::minutes(5),
        );
        let alert = alerter.evaluate("cpu", "host", 97.0, t(0)).unwrap();
        assert_eq!(alert.severity, Severity::Critical);
        assert_eq!(alert.threshold, 95.0);
    }

    #[test]
    fn test_zero_cooldown_retriggers_every_evaluation() {
        let mut alerter = ThresholdAlerter::new(
            vec![ThresholdRule::above("cpu", 80.0, Severity::Warning)],
            Duration::zero(),
        );
        assert!(alerter.evaluate("cpu", "host", 85.0, t(0)).is_some());
        assert!(alerter.evaluate("cpu", "host", 85.0, t(0)).is_some());
    }

    #[test]
    fn test_evaluate_snapshot_uses_global_source() {
        let mut alerter = ThresholdAlerter::new(default_rules(), Duration::minutes(5));
        let mut snapshot = MetricSnapshot::empty(t(0));
        snapshot.critical_errors = 1;
        snapshot.network_failures = 2;

        let alerts = alerter.evaluate_snapshot(&snapshot, t(0));
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, "critical_errors");
        assert_eq!(alerts[0].source, GLOBAL_SOURCE);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mut alerter = cpu_alerter();
        alerter.evaluate("cpu", "host", 85.0, t(0));
        alerter.clear();
        assert!(alerter.active().is_empty());
        assert_eq!(alerter.triggered_total(), 0);
        assert!(alerter.evaluate("cpu", "host", 85.0, t(1)).is_some());
    }

    #[test]
    fn test_alert_record_serializes_camel_case() {
        let mut alerter = cpu_alerter();
        let alert = alerter.evaluate("cpu", "host", 85.0, t(0)).unwrap();
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["currentValue"], 85.0);
        assert!(json.get("cooldownUntil").is_some());
    }
}
