//! Upstream instrumentation.
//!
//! Adapters that turn host-application events into typed entries:
//!
//! - [`install_panic_hook`]: uncaught panics become critical script errors
//! - [`Instrumentation`]: explicit reporting of errors, rejected async
//!   work, network results, user interactions and navigation
//!
//! None of these return errors to the caller.

use std::panic::PanicHookInfo;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use uuid::Uuid;

use crate::entry::{EntryKind, Severity};
use crate::error::{is_contained, panic_message};
use crate::fingerprint::strip_query;
use crate::service::TelemetryService;

/// Metric name used for network round-trip samples.
pub const NETWORK_LATENCY_METRIC: &str = "network_latency_ms";

static HOOK_TARGET: OnceLock<Mutex<Weak<TelemetryService>>> = OnceLock::new();

/// Route uncaught panics into `service`.
///
/// The hook is installed at most once per process and chains to the hook
/// that was active before it. Calling this again only retargets the hook to
/// a new service. Returns `true` when this call installed the hook.
///
/// The hook records without blocking: if the service lock is held (for
/// example, the panic happened inside the service itself), the panic is
/// dropped. Panics the core catches itself, in `try_capture` builders and
/// subscriber callbacks, are not recorded. Subscribers see recorded panics
/// on the next publish.
pub fn install_panic_hook(service: &Arc<TelemetryService>) -> bool {
    let mut installed = false;
    let target = HOOK_TARGET.get_or_init(|| {
        installed = true;
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            report_panic(info);
            previous(info);
        }));
        Mutex::new(Weak::new())
    });

    let mut guard = match target.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    *guard = Arc::downgrade(service);
    drop(guard);

    tracing::debug!(session_id = %service.session_id(), installed, "Panic hook targeted");
    installed
}

fn report_panic(info: &PanicHookInfo<'_>) {
    // Caught by the core and logged as a capture or subscriber failure
    if is_contained() {
        return;
    }
    let Some(target) = HOOK_TARGET.get() else {
        return;
    };
    let service = match target.try_lock() {
        Ok(guard) => guard.upgrade(),
        Err(_) => None,
    };
    let Some(service) = service else {
        return;
    };

    let location = info.location();
    let backtrace = std::backtrace::Backtrace::capture();
    let stack = (backtrace.status() == std::backtrace::BacktraceStatus::Captured)
        .then(|| backtrace.to_string());

    let kind = EntryKind::ScriptError {
        message: panic_message(info.payload()),
        error_type: Some("panic".to_string()),
        filename: location.map(|l| l.file().to_string()),
        line: location.map(std::panic::Location::line),
        column: location.map(std::panic::Location::column),
        stack,
        component: None,
        function: None,
    };
    service.capture_nonblocking(kind, Severity::Critical);
}

/// Outcome of one network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkCall {
    /// Request URL.
    pub url: String,
    /// HTTP method.
    pub method: String,
    /// Response status; `None` when no response arrived.
    pub status: Option<u16>,
    /// Round-trip time.
    pub duration: Duration,
    /// Transport error text.
    pub error: Option<String>,
}

impl NetworkCall {
    /// Whether the call counts as a failure: a transport error, no
    /// response, or a status of 400 or above.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.status.is_none_or(|s| s >= 400)
    }

    /// Error for server failures and missing responses, warning otherwise.
    #[must_use]
    pub fn severity(&self) -> Severity {
        match self.status {
            Some(status) if status < 500 => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

/// Reports host-application events to a [`TelemetryService`].
#[derive(Debug, Clone)]
pub struct Instrumentation {
    service: Arc<TelemetryService>,
}

impl Instrumentation {
    /// Wrap a service.
    #[must_use]
    pub const fn new(service: Arc<TelemetryService>) -> Self {
        Self { service }
    }

    /// Underlying service.
    #[must_use]
    pub const fn service(&self) -> &Arc<TelemetryService> {
        &self.service
    }

    /// Report an error caught by the host.
    ///
    /// The error's source chain is recorded as the stack text.
    pub fn report_error(
        &self,
        error: &(dyn std::error::Error + 'static),
        component: Option<&str>,
        function: Option<&str>,
    ) -> Option<Uuid> {
        let mut chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }

        self.service.capture(
            EntryKind::ScriptError {
                message: error.to_string(),
                error_type: None,
                filename: None,
                line: None,
                column: None,
                stack: (!chain.is_empty()).then(|| chain.join("\n")),
                component: component.map(String::from),
                function: function.map(String::from),
            },
            None,
        )
    }

    /// Report async work that failed with nobody awaiting the result.
    pub fn report_promise_rejection(
        &self,
        reason: impl Into<String>,
        component: Option<&str>,
    ) -> Option<Uuid> {
        self.service.capture(
            EntryKind::PromiseRejection {
                reason: reason.into(),
                component: component.map(String::from),
            },
            None,
        )
    }

    /// Report a finished network call.
    ///
    /// Every call records a latency sample under
    /// [`NETWORK_LATENCY_METRIC`] with the endpoint as source. Failed calls
    /// are also captured as network entries; successful ones return `None`.
    pub fn report_network_result(&self, call: &NetworkCall) -> Option<Uuid> {
        let duration_ms = u64::try_from(call.duration.as_millis()).unwrap_or(u64::MAX);
        #[allow(clippy::cast_precision_loss)]
        self.service.record_metric(
            NETWORK_LATENCY_METRIC,
            strip_query(&call.url),
            duration_ms as f64,
        );

        if !call.is_failure() {
            return None;
        }
        self.service.capture(
            EntryKind::NetworkFailure {
                url: call.url.clone(),
                method: call.method.clone(),
                status: call.status,
                duration_ms: Some(duration_ms),
                message: call.error.clone(),
            },
            Some(call.severity()),
        )
    }

    /// Report a user action.
    pub fn report_interaction(
        &self,
        action: impl Into<String>,
        target: impl Into<String>,
        component: Option<&str>,
    ) -> Option<Uuid> {
        self.service.capture(
            EntryKind::UserInteraction {
                action: action.into(),
                target: target.into(),
                component: component.map(String::from),
            },
            None,
        )
    }

    /// Report a route change.
    pub fn report_navigation(&self, from: Option<&str>, to: impl Into<String>) -> Option<Uuid> {
        self.service.capture(
            EntryKind::Navigation {
                from: from.map(String::from),
                to: to.into(),
            },
            None,
        )
    }
}
