//! Configuration validation.
//!
//! This module checks configuration values against acceptable ranges and
//! corrects the ones that fall outside them.

use super::{
    TelemetryConfig, DEFAULT_ALERT_COOLDOWN_MS, DEFAULT_BREADCRUMBS_PER_ENTRY,
    DEFAULT_BREADCRUMB_CAPACITY, DEFAULT_EVENT_CAPACITY, DEFAULT_SAMPLE_CAPACITY,
    DEFAULT_SNAPSHOT_WINDOW_MS, DEFAULT_TICK_INTERVAL_MS, DEFAULT_TOP_N,
};
use crate::alerting::{default_rules, ThresholdRule};
use crate::error::ConfigError;

/// Maximum allowed buffer capacity.
pub const MAX_CAPACITY: usize = 100_000;

/// Maximum allowed snapshot window in milliseconds (30 days).
pub const MAX_SNAPSHOT_WINDOW_MS: u64 = 2_592_000_000;

/// Minimum allowed timer interval in milliseconds (1 second).
pub const MIN_TICK_INTERVAL_MS: u64 = 1000;

/// Maximum allowed timer interval in milliseconds (5 minutes).
pub const MAX_TICK_INTERVAL_MS: u64 = 300_000;

/// Maximum allowed alert cooldown in milliseconds (24 hours).
pub const MAX_COOLDOWN_MS: u64 = 86_400_000;

/// Validate configuration values.
///
/// Every out-of-range value is reported, not only the first:
/// - capacities and `top_n` must be between 1 and 100000
/// - `breadcrumbs_per_entry` must not exceed 100000 (0 disables trails)
/// - `snapshot_window_ms` must be between 1 and 2592000000 when set
/// - `tick_interval_ms` must be between 1000 and 300000
/// - `alert_cooldown_ms` must not exceed 86400000
/// - rule thresholds must be finite and rule metrics non-empty
#[must_use = "validation result should be checked"]
pub fn validate_config(config: &TelemetryConfig) -> Vec<ConfigError> {
    let mut errors = Vec::new();

    let capacities = [
        ("event_capacity", config.event_capacity),
        ("breadcrumb_capacity", config.breadcrumb_capacity),
        ("sample_capacity", config.sample_capacity),
        ("top_n", config.top_n),
    ];
    for (var, value) in capacities {
        if !(1..=MAX_CAPACITY).contains(&value) {
            errors.push(ConfigError::InvalidValue {
                var: var.into(),
                reason: format!("must be between 1 and {MAX_CAPACITY}, got {value}"),
            });
        }
    }

    if config.breadcrumbs_per_entry > MAX_CAPACITY {
        errors.push(ConfigError::InvalidValue {
            var: "breadcrumbs_per_entry".into(),
            reason: format!("must be at most {MAX_CAPACITY}"),
        });
    }

    match config.snapshot_window_ms {
        Some(0) => errors.push(ConfigError::InvalidValue {
            var: "snapshot_window_ms".into(),
            reason: "must be positive; use no window instead".into(),
        }),
        Some(ms) if ms > MAX_SNAPSHOT_WINDOW_MS => errors.push(ConfigError::InvalidValue {
            var: "snapshot_window_ms".into(),
            reason: format!("must be at most {MAX_SNAPSHOT_WINDOW_MS} ms, got {ms}"),
        }),
        _ => {}
    }

    if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&config.tick_interval_ms) {
        errors.push(ConfigError::InvalidValue {
            var: "tick_interval_ms".into(),
            reason: format!(
                "must be between {MIN_TICK_INTERVAL_MS} and {MAX_TICK_INTERVAL_MS} ms"
            ),
        });
    }

    if config.alert_cooldown_ms > MAX_COOLDOWN_MS {
        errors.push(ConfigError::InvalidValue {
            var: "alert_cooldown_ms".into(),
            reason: format!("must be between 0 and {MAX_COOLDOWN_MS} ms"),
        });
    }

    errors.extend(config.thresholds.iter().filter_map(rule_error));
    errors
}

/// Correct every invalid value to a safe default.
///
/// Each correction is logged at `warn`. A rule with a non-finite threshold
/// is replaced by the built-in rule for the same metric when one exists,
/// and dropped otherwise.
#[must_use]
pub fn sanitize(mut config: TelemetryConfig) -> TelemetryConfig {
    let errors = validate_config(&config);
    if errors.is_empty() {
        return config;
    }
    for error in &errors {
        tracing::warn!(error = %error, "Configuration corrected");
    }

    let clamp = |value: usize, default: usize| {
        if (1..=MAX_CAPACITY).contains(&value) {
            value
        } else {
            default
        }
    };
    config.event_capacity = clamp(config.event_capacity, DEFAULT_EVENT_CAPACITY);
    config.breadcrumb_capacity = clamp(config.breadcrumb_capacity, DEFAULT_BREADCRUMB_CAPACITY);
    config.sample_capacity = clamp(config.sample_capacity, DEFAULT_SAMPLE_CAPACITY);
    config.top_n = clamp(config.top_n, DEFAULT_TOP_N);

    if config.breadcrumbs_per_entry > MAX_CAPACITY {
        config.breadcrumbs_per_entry = DEFAULT_BREADCRUMBS_PER_ENTRY;
    }
    match config.snapshot_window_ms {
        Some(0) => config.snapshot_window_ms = None,
        Some(ms) if ms > MAX_SNAPSHOT_WINDOW_MS => {
            config.snapshot_window_ms = Some(DEFAULT_SNAPSHOT_WINDOW_MS);
        }
        _ => {}
    }
    if !(MIN_TICK_INTERVAL_MS..=MAX_TICK_INTERVAL_MS).contains(&config.tick_interval_ms) {
        config.tick_interval_ms = DEFAULT_TICK_INTERVAL_MS;
    }
    if config.alert_cooldown_ms > MAX_COOLDOWN_MS {
        config.alert_cooldown_ms = DEFAULT_ALERT_COOLDOWN_MS;
    }

    let defaults = default_rules();
    config.thresholds = config
        .thresholds
        .into_iter()
        .filter_map(|rule| {
            if rule_error(&rule).is_none() {
                return Some(rule);
            }
            defaults.iter().find(|d| d.metric == rule.metric).cloned()
        })
        .collect();

    config
}

fn rule_error(rule: &ThresholdRule) -> Option<ConfigError> {
    let reason = if rule.metric.trim().is_empty() {
        "metric name is empty"
    } else if !rule.threshold.is_finite() {
        "threshold must be finite"
    } else {
        return None;
    };
    Some(ConfigError::InvalidThreshold {
        metric: rule.metric.clone(),
        reason: reason.into(),
    })
}
