//! Error types for the telemetry core.
//!
//! This module defines a hierarchical error system:
//! - [`TelemetryError`]: Top-level error wrapping every subsystem error
//! - [`CaptureError`]: Instrumentation failed while building an entry
//! - [`SubscriberError`]: A notified subscriber callback failed
//! - [`ConfigError`]: Invalid configuration (always corrected, never fatal)
//! - [`ExportError`]: Serializing or writing the export document failed
//! - [`IngestError`]: A replay command line could not be decoded
//!
//! The core never lets these escape into the host application on the
//! capture and notification paths: they are logged and dropped there.
//! Only explicit, caller-initiated operations such as export return them.
//!
//! All errors implement `Send + Sync`.

use thiserror::Error;

/// Top-level telemetry error.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Capture failure.
    #[error("Capture failed: {0}")]
    Capture(#[from] CaptureError),

    /// Subscriber failure.
    #[error("Subscriber failed: {0}")]
    Subscriber(#[from] SubscriberError),

    /// Configuration failure.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Export failure.
    #[error("Export failed: {0}")]
    Export(#[from] ExportError),

    /// Replay input failure.
    #[error("Ingest failed: {0}")]
    Ingest(#[from] IngestError),
}

/// Errors raised while the instrumentation builds an entry.
///
/// These are swallowed by the service and logged at `warn`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// The entry builder returned an error.
    #[error("Entry builder failed: {message}")]
    BuilderFailed {
        /// Description of the failure.
        message: String,
    },

    /// The entry builder panicked.
    #[error("Entry builder panicked: {message}")]
    BuilderPanicked {
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The service is stopped and no longer accepts entries.
    #[error("Service is stopped")]
    Stopped,
}

/// Errors raised by subscriber callbacks during notification.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriberError {
    /// A subscriber callback panicked.
    #[error("Subscriber {id} panicked: {message}")]
    Panicked {
        /// Subscriber id.
        id: String,
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Configuration errors.
///
/// Reported by validation; each one is corrected to a safe default.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Configuration value is invalid.
    #[error("Invalid value for {var}: {reason}")]
    InvalidValue {
        /// The setting or variable name.
        var: String,
        /// Why the value is invalid.
        reason: String,
    },

    /// A threshold rule is unusable.
    #[error("Invalid threshold rule for {metric}: {reason}")]
    InvalidThreshold {
        /// Metric the rule applies to.
        metric: String,
        /// Why the rule is invalid.
        reason: String,
    },
}

/// Export errors.
#[derive(Debug, Error)]
pub enum ExportError {
    /// JSON serialization failed.
    #[error("Serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Writing the export file failed.
    #[error("Write failed for {path}: {source}")]
    Write {
        /// Target path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors decoding replay commands.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The line is not a valid command.
    #[error("Line {line}: {source}")]
    Parse {
        /// 1-based line number.
        line: usize,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Reading input failed.
    #[error("Read failed: {0}")]
    Read(#[from] std::io::Error),
}

/// Render a panic payload as text for logging.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

thread_local! {
    static CONTAINED_DEPTH: std::cell::Cell<u32> = const { std::cell::Cell::new(0) };
}

/// Run `f`, catching any panic as a failure the core handles itself.
///
/// While `f` runs, [`is_contained`] is true on this thread so the panic
/// hook can tell these panics apart from uncaught ones.
pub(crate) fn catch_contained<R>(f: impl FnOnce() -> R) -> std::thread::Result<R> {
    CONTAINED_DEPTH.with(|d| d.set(d.get() + 1));
    let out = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
    CONTAINED_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    out
}

/// Whether the current thread is inside [`catch_contained`].
pub(crate) fn is_contained() -> bool {
    CONTAINED_DEPTH.with(|d| d.get() > 0)
}
