//! Entry data model.
//!
//! An [`Entry`] is one logical issue or event held in the event buffer.
//! Its payload is the typed [`EntryKind`] union; each kind maps to exactly
//! one [`Category`]. Entries are created once at capture time and afterwards
//! only their occurrence counter, `last_seen` and severity change when the
//! same fingerprint recurs.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fingerprint::fingerprint;

/// Ordinal severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Diagnostic noise.
    Debug,
    /// Informational.
    #[serde(alias = "low")]
    Info,
    /// Something looks wrong.
    #[serde(alias = "warn", alias = "medium")]
    Warning,
    /// A failure.
    #[serde(alias = "high")]
    Error,
    /// Immediate attention needed.
    #[serde(alias = "fatal")]
    Critical,
}

impl Severity {
    /// Every level, lowest first.
    pub const ALL: [Self; 5] = [
        Self::Debug,
        Self::Info,
        Self::Warning,
        Self::Error,
        Self::Critical,
    ];

    /// The next level up, saturating at `Critical`.
    #[must_use]
    pub const fn escalate(self) -> Self {
        match self {
            Self::Debug => Self::Info,
            Self::Info => Self::Warning,
            Self::Warning => Self::Error,
            Self::Error | Self::Critical => Self::Critical,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" | "low" => Ok(Self::Info),
            "warning" | "warn" | "medium" => Ok(Self::Warning),
            "error" | "high" => Ok(Self::Error),
            "critical" | "fatal" => Ok(Self::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of entry categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Uncaught script errors.
    Javascript,
    /// Unhandled promise rejections.
    Promise,
    /// Failed network calls.
    Network,
    /// User interactions.
    Interaction,
    /// Navigation changes.
    Navigation,
    /// Application-defined events.
    Custom,
}

impl Category {
    /// Every category.
    pub const ALL: [Self; 6] = [
        Self::Javascript,
        Self::Promise,
        Self::Network,
        Self::Interaction,
        Self::Navigation,
        Self::Custom,
    ];

    /// Snake-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Javascript => "javascript",
            Self::Promise => "promise",
            Self::Network => "network",
            Self::Interaction => "interaction",
            Self::Navigation => "navigation",
            Self::Custom => "custom",
        }
    }

    /// Whether entries in this category are failures regardless of severity.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Javascript | Self::Promise | Self::Network)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed payload of a captured entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EntryKind {
    /// An uncaught error thrown by script code.
    ScriptError {
        /// Error message.
        message: String,
        /// Error class name, e.g. `TypeError`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_type: Option<String>,
        /// Source file.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        /// Source line.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        line: Option<u32>,
        /// Source column.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        column: Option<u32>,
        /// Stack trace text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
        /// Originating UI component.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        component: Option<String>,
        /// Originating function.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        function: Option<String>,
    },
    /// A rejected promise nobody handled.
    PromiseRejection {
        /// Rejection reason.
        reason: String,
        /// Originating UI component.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        component: Option<String>,
    },
    /// A network call that failed or returned an error status.
    NetworkFailure {
        /// Request URL.
        url: String,
        /// HTTP method.
        method: String,
        /// Response status, absent when no response arrived.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        /// Round-trip time.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        /// Transport error text.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    /// A click, submit or similar user action.
    UserInteraction {
        /// Action name, e.g. `click`.
        action: String,
        /// Target element description.
        target: String,
        /// Owning UI component.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        component: Option<String>,
    },
    /// A route change.
    Navigation {
        /// Previous route.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        /// New route.
        to: String,
    },
    /// Application-defined event.
    Custom {
        /// Event name.
        name: String,
        /// Free-text message.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        /// Originating UI component.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        component: Option<String>,
        /// Extra string properties.
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        properties: BTreeMap<String, String>,
    },
}

impl EntryKind {
    /// Category this kind belongs to.
    #[must_use]
    pub const fn category(&self) -> Category {
        match self {
            Self::ScriptError { .. } => Category::Javascript,
            Self::PromiseRejection { .. } => Category::Promise,
            Self::NetworkFailure { .. } => Category::Network,
            Self::UserInteraction { .. } => Category::Interaction,
            Self::Navigation { .. } => Category::Navigation,
            Self::Custom { .. } => Category::Custom,
        }
    }

    /// Default severity when the instrumentation gives none.
    #[must_use]
    pub const fn default_severity(&self) -> Severity {
        match self {
            Self::ScriptError { .. } | Self::PromiseRejection { .. } => Severity::Error,
            Self::NetworkFailure { .. } => Severity::Warning,
            Self::UserInteraction { .. } | Self::Navigation { .. } | Self::Custom { .. } => {
                Severity::Info
            }
        }
    }

    /// Originating component, if known.
    #[must_use]
    pub fn component(&self) -> Option<&str> {
        match self {
            Self::ScriptError { component, .. }
            | Self::PromiseRejection { component, .. }
            | Self::UserInteraction { component, .. }
            | Self::Custom { component, .. } => component.as_deref(),
            Self::NetworkFailure { .. } | Self::Navigation { .. } => None,
        }
    }

    /// One-line human readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::ScriptError {
                message,
                error_type,
                ..
            } => match error_type {
                Some(t) => format!("{t}: {message}"),
                None => message.clone(),
            },
            Self::PromiseRejection { reason, .. } => format!("Unhandled rejection: {reason}"),
            Self::NetworkFailure {
                url,
                method,
                status,
                message,
                ..
            } => match (status, message) {
                (Some(code), _) => format!("{method} {url} failed with {code}"),
                (None, Some(text)) => format!("{method} {url} failed: {text}"),
                (None, None) => format!("{method} {url} failed"),
            },
            Self::UserInteraction { action, target, .. } => format!("{action} on {target}"),
            Self::Navigation { from, to } => match from {
                Some(from) => format!("{from} -> {to}"),
                None => format!("-> {to}"),
            },
            Self::Custom { name, message, .. } => match message {
                Some(text) => format!("{name}: {text}"),
                None => name.clone(),
            },
        }
    }
}

/// One logical issue in the event buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    /// Unique id generated at capture.
    pub id: Uuid,
    /// Deduplication key.
    pub fingerprint: String,
    /// Category derived from the kind.
    pub category: Category,
    /// Highest severity seen for this fingerprint.
    pub severity: Severity,
    /// Typed payload from the first capture.
    pub kind: EntryKind,
    /// First capture time.
    pub timestamp: DateTime<Utc>,
    /// Most recent capture time.
    pub last_seen: DateTime<Utc>,
    /// Number of captures merged into this entry.
    pub occurrences: u64,
    /// Trail of breadcrumbs leading up to the first capture, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub breadcrumbs: Vec<Breadcrumb>,
}

impl Entry {
    /// Create a fresh entry captured at `at`.
    #[must_use]
    pub fn new(kind: EntryKind, severity: Severity, at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint: fingerprint(&kind),
            category: kind.category(),
            severity,
            kind,
            timestamp: at,
            last_seen: at,
            occurrences: 1,
            breadcrumbs: Vec::new(),
        }
    }

    /// Attach a breadcrumb trail.
    #[must_use]
    pub fn with_breadcrumbs(mut self, breadcrumbs: Vec<Breadcrumb>) -> Self {
        self.breadcrumbs = breadcrumbs;
        self
    }

    /// Merge a recurrence of the same fingerprint.
    pub fn record_occurrence(&mut self, at: DateTime<Utc>, severity: Severity) {
        self.occurrences = self.occurrences.saturating_add(1);
        if at > self.last_seen {
            self.last_seen = at;
        }
        self.severity = self.severity.max(severity);
    }

    /// Whether this entry counts as a failure for error metrics.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.category.is_failure() || self.severity >= Severity::Error
    }
}

/// Breadcrumb categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreadcrumbCategory {
    /// Route change.
    Navigation,
    /// User action.
    Interaction,
    /// Network request.
    Http,
    /// Console output.
    Console,
    /// Anything else.
    Custom,
}

/// Lightweight trail entry kept for diagnostic replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// Kind of breadcrumb.
    pub category: BreadcrumbCategory,
    /// Short description.
    pub message: String,
    /// Level.
    pub level: Severity,
    /// Extra context.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, String>,
}

impl Breadcrumb {
    /// Create a breadcrumb with no extra data.
    #[must_use]
    pub fn new(
        category: BreadcrumbCategory,
        message: impl Into<String>,
        level: Severity,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            timestamp: at,
            category,
            message: message.into(),
            level,
            data: BTreeMap::new(),
        }
    }

    /// Add a data field.
    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }
}

/// A single numeric performance measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    /// Metric name, e.g. `cpu` or `page_load_ms`.
    pub metric: String,
    /// Where the value was measured.
    pub source: String,
    /// Measured value.
    pub value: f64,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
}
