//! Configuration management.
//!
//! This module handles:
//! - Buffer capacities, timer interval, rolling window and cooldown
//! - Threshold rules
//! - Environment variable loading for the host binary
//! - Correcting invalid values to safe defaults (see [`sanitize`])
//!
//! Configuration never fails: a bad value is reported as a
//! [`ConfigError`](crate::error::ConfigError), logged, and replaced.
//!
//! # Example
//!
//! ```
//! use territory_telemetry::config::{sanitize, TelemetryConfig, DEFAULT_EVENT_CAPACITY};
//!
//! let config = TelemetryConfig {
//!     event_capacity: 0,
//!     ..TelemetryConfig::default()
//! };
//! let config = sanitize(config);
//! assert_eq!(config.event_capacity, DEFAULT_EVENT_CAPACITY);
//! ```

mod validation;

pub use validation::{
    sanitize, validate_config, MAX_CAPACITY, MAX_COOLDOWN_MS, MAX_SNAPSHOT_WINDOW_MS,
    MAX_TICK_INTERVAL_MS, MIN_TICK_INTERVAL_MS,
};

use std::str::FromStr;

use chrono::Duration;

use crate::alerting::{default_rules, ThresholdDirection, ThresholdRule};
use crate::entry::Severity;
use crate::error::ConfigError;

/// Default event buffer capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 1000;

/// Default breadcrumb buffer capacity.
pub const DEFAULT_BREADCRUMB_CAPACITY: usize = 100;

/// Default performance sample buffer capacity.
pub const DEFAULT_SAMPLE_CAPACITY: usize = 500;

/// Default number of breadcrumbs attached to a new error entry.
pub const DEFAULT_BREADCRUMBS_PER_ENTRY: usize = 10;

/// Default size of the top-issues table.
pub const DEFAULT_TOP_N: usize = crate::aggregation::DEFAULT_TOP_N;

/// Default recompute timer interval (10 seconds).
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 10_000;

/// Default alert cooldown (5 minutes).
pub const DEFAULT_ALERT_COOLDOWN_MS: u64 = 300_000;

/// Default rolling window for snapshots (1 hour).
pub const DEFAULT_SNAPSHOT_WINDOW_MS: u64 = 3_600_000;

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// Event buffer capacity.
    pub event_capacity: usize,
    /// Breadcrumb buffer capacity.
    pub breadcrumb_capacity: usize,
    /// Performance sample buffer capacity.
    pub sample_capacity: usize,
    /// Breadcrumbs copied onto each new error entry.
    pub breadcrumbs_per_entry: usize,
    /// Size of the top-issues table.
    pub top_n: usize,
    /// Rolling snapshot window; `None` summarizes the whole buffer.
    pub snapshot_window_ms: Option<u64>,
    /// Recompute timer interval.
    pub tick_interval_ms: u64,
    /// Minimum time between alerts for the same `(metric, source)`.
    pub alert_cooldown_ms: u64,
    /// Threshold rules.
    pub thresholds: Vec<ThresholdRule>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            breadcrumb_capacity: DEFAULT_BREADCRUMB_CAPACITY,
            sample_capacity: DEFAULT_SAMPLE_CAPACITY,
            breadcrumbs_per_entry: DEFAULT_BREADCRUMBS_PER_ENTRY,
            top_n: DEFAULT_TOP_N,
            snapshot_window_ms: Some(DEFAULT_SNAPSHOT_WINDOW_MS),
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            alert_cooldown_ms: DEFAULT_ALERT_COOLDOWN_MS,
            thresholds: default_rules(),
        }
    }
}

impl TelemetryConfig {
    /// Load configuration from environment variables.
    ///
    /// Optional environment variables (with defaults):
    /// - `TELEMETRY_EVENT_CAPACITY` (default: `1000`)
    /// - `TELEMETRY_BREADCRUMB_CAPACITY` (default: `100`)
    /// - `TELEMETRY_SAMPLE_CAPACITY` (default: `500`)
    /// - `TELEMETRY_BREADCRUMBS_PER_ENTRY` (default: `10`)
    /// - `TELEMETRY_TOP_N` (default: `10`)
    /// - `TELEMETRY_SNAPSHOT_WINDOW_MS`, `0` disables the window (default: `3600000`)
    /// - `TELEMETRY_TICK_INTERVAL_MS` (default: `10000`)
    /// - `TELEMETRY_ALERT_COOLDOWN_MS` (default: `300000`)
    /// - `TELEMETRY_THRESHOLDS`, e.g. `cpu>80:warning,success_rate<0.9:error`
    ///   (default: the built-in rules)
    ///
    /// Unparsable values are logged and replaced by their defaults, and the
    /// result is passed through [`sanitize`].
    #[must_use]
    pub fn from_env() -> Self {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        let thresholds = std::env::var("TELEMETRY_THRESHOLDS").map_or_else(
            |_| default_rules(),
            |raw| {
                let (rules, errors) = parse_rules(&raw);
                for error in &errors {
                    tracing::warn!(error = %error, "Ignoring threshold rule");
                }
                rules
            },
        );

        let snapshot_window_ms = match env_or("TELEMETRY_SNAPSHOT_WINDOW_MS", DEFAULT_SNAPSHOT_WINDOW_MS)
        {
            0 => None,
            ms => Some(ms),
        };

        sanitize(Self {
            event_capacity: env_or("TELEMETRY_EVENT_CAPACITY", DEFAULT_EVENT_CAPACITY),
            breadcrumb_capacity: env_or("TELEMETRY_BREADCRUMB_CAPACITY", DEFAULT_BREADCRUMB_CAPACITY),
            sample_capacity: env_or("TELEMETRY_SAMPLE_CAPACITY", DEFAULT_SAMPLE_CAPACITY),
            breadcrumbs_per_entry: env_or(
                "TELEMETRY_BREADCRUMBS_PER_ENTRY",
                DEFAULT_BREADCRUMBS_PER_ENTRY,
            ),
            top_n: env_or("TELEMETRY_TOP_N", DEFAULT_TOP_N),
            snapshot_window_ms,
            tick_interval_ms: env_or("TELEMETRY_TICK_INTERVAL_MS", DEFAULT_TICK_INTERVAL_MS),
            alert_cooldown_ms: env_or("TELEMETRY_ALERT_COOLDOWN_MS", DEFAULT_ALERT_COOLDOWN_MS),
            thresholds,
        })
    }

    /// Rolling snapshot window.
    #[must_use]
    pub fn snapshot_window(&self) -> Option<Duration> {
        self.snapshot_window_ms
            .and_then(|ms| i64::try_from(ms).ok())
            .map(Duration::milliseconds)
    }

    /// Recompute timer interval.
    #[must_use]
    pub const fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms)
    }

    /// Alert cooldown window.
    #[must_use]
    pub fn alert_cooldown(&self) -> Duration {
        i64::try_from(self.alert_cooldown_ms)
            .map_or_else(|_| Duration::zero(), Duration::milliseconds)
    }
}

/// Parse a comma-separated threshold list.
///
/// Each item is `metric>value` or `metric<value`, optionally followed by
/// `:severity` (default `warning`). Items that fail to parse are returned
/// as errors and left out of the rule list.
///
/// # Example
///
/// ```
/// use territory_telemetry::config::parse_rules;
///
/// let (rules, errors) = parse_rules("cpu>80:error, success_rate<0.9, junk");
/// assert_eq!(rules.len(), 2);
/// assert_eq!(errors.len(), 1);
/// ```
#[must_use]
pub fn parse_rules(raw: &str) -> (Vec<ThresholdRule>, Vec<ConfigError>) {
    let mut rules = Vec::new();
    let mut errors = Vec::new();

    for item in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match parse_rule(item) {
            Ok(rule) => rules.push(rule),
            Err(error) => errors.push(error),
        }
    }
    (rules, errors)
}

fn parse_rule(item: &str) -> Result<ThresholdRule, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidThreshold {
        metric: item.to_string(),
        reason: reason.to_string(),
    };

    let (body, severity) = match item.split_once(':') {
        Some((body, severity)) => (
            body,
            Severity::from_str(severity).map_err(|reason| invalid(&reason))?,
        ),
        None => (item, Severity::Warning),
    };

    let (metric, threshold, direction) = if let Some((m, t)) = body.split_once('>') {
        (m, t, ThresholdDirection::Above)
    } else if let Some((m, t)) = body.split_once('<') {
        (m, t, ThresholdDirection::Below)
    } else {
        return Err(invalid("expected metric>value or metric<value"));
    };

    let metric = metric.trim();
    if metric.is_empty() {
        return Err(invalid("metric name is empty"));
    }
    let threshold: f64 = threshold
        .trim()
        .parse()
        .map_err(|_| invalid("threshold is not a number"))?;

    Ok(ThresholdRule {
        metric: metric.to_string(),
        threshold,
        direction,
        severity,
    })
}

/// Parse an environment variable, falling back to `default` when unset or
/// unparsable.
fn env_or<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            let error = ConfigError::InvalidValue {
                var: name.into(),
                reason: format!("'{raw}' is not a valid number, using {default}"),
            };
            tracing::warn!(error = %error, "Configuration corrected");
            default
        }),
        Err(_) => default,
    }
}
