//! JSON-lines replay commands.
//!
//! Each non-blank line of replay input is one command object tagged by
//! `op`. Lines starting with `#` are comments.
//!
//! ```text
//! {"op":"capture","entry":{"kind":"promise_rejection","reason":"timeout"}}
//! {"op":"breadcrumb","category":"console","message":"retrying"}
//! {"op":"metric","name":"cpu","source":"worker-1","value":91.5}
//! {"op":"tick"}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alerting::AlertRecord;
use crate::entry::{BreadcrumbCategory, EntryKind, Severity};
use crate::error::IngestError;
use crate::service::TelemetryService;

const fn default_level() -> Severity {
    Severity::Info
}

/// One replay command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IngestCommand {
    /// Capture an entry.
    Capture {
        /// Entry payload.
        entry: EntryKind,
        /// Severity override.
        #[serde(default)]
        severity: Option<Severity>,
    },
    /// Append a breadcrumb.
    Breadcrumb {
        /// Breadcrumb category.
        category: BreadcrumbCategory,
        /// Short description.
        message: String,
        /// Level, `info` when absent.
        #[serde(default = "default_level")]
        level: Severity,
        /// Extra context.
        #[serde(default)]
        data: BTreeMap<String, String>,
    },
    /// Record a performance sample.
    Metric {
        /// Metric name.
        name: String,
        /// Where the value was measured.
        source: String,
        /// Measured value.
        value: f64,
    },
    /// Dismiss an active alert.
    Dismiss {
        /// Alert id.
        id: Uuid,
    },
    /// Clear every buffer.
    Clear,
    /// Run one recompute tick.
    Tick,
}

/// What applying a command did.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// An entry was stored (or merged) under this id.
    Captured(Uuid),
    /// The command was accepted but stored nothing addressable.
    Recorded,
    /// Alerts raised by the command.
    Alerts(Vec<AlertRecord>),
    /// Whether the dismissed alert was active.
    Dismissed(bool),
    /// The service rejected the command, e.g. because it is stopped.
    Ignored,
}

impl IngestCommand {
    /// Run the command against `service`.
    pub fn apply(self, service: &TelemetryService) -> Applied {
        match self {
            Self::Capture { entry, severity } => service
                .capture(entry, severity)
                .map_or(Applied::Ignored, Applied::Captured),
            Self::Breadcrumb {
                category,
                message,
                level,
                data,
            } => {
                service.add_breadcrumb(category, message, level, data);
                Applied::Recorded
            }
            Self::Metric {
                name,
                source,
                value,
            } => Applied::Alerts(service.record_metric(name, source, value).into_iter().collect()),
            Self::Dismiss { id } => Applied::Dismissed(service.dismiss_alert(id)),
            Self::Clear => {
                service.clear_all();
                Applied::Recorded
            }
            Self::Tick => Applied::Alerts(service.tick()),
        }
    }
}

/// Decode one input line.
///
/// Returns `Ok(None)` for blank and comment lines.
///
/// # Errors
///
/// Returns [`IngestError::Parse`] if the line is not a valid command.
pub fn parse_line(line_no: usize, line: &str) -> Result<Option<IngestCommand>, IngestError> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|source| IngestError::Parse {
            line: line_no,
            source,
        })
}
