//! The telemetry service.
//!
//! [`TelemetryService`] owns every buffer, the alerter and the hub. It is
//! constructed explicitly and shared by `Arc`; nothing here is global.
//!
//! Data flow for one capture:
//!
//! ```text
//! capture -> fingerprint -> merge or push -> summarize -> evaluate rules -> publish
//! ```
//!
//! The periodic timer (see [`TelemetryService::start`]) repeats the last
//! three steps without new input, so sustained breaches re-trigger once per
//! cooldown window. Entries recorded by the panic hook are evaluated on the
//! next capture or tick.
//!
//! No public operation on the capture path returns an error or panics;
//! failures are logged and the input is dropped.
//!
//! # Example
//!
//! ```
//! use territory_telemetry::config::TelemetryConfig;
//! use territory_telemetry::entry::EntryKind;
//! use territory_telemetry::service::TelemetryService;
//!
//! let service = TelemetryService::new(TelemetryConfig::default());
//! for _ in 0..3 {
//!     service.capture(
//!         EntryKind::PromiseRejection {
//!             reason: "timeout".into(),
//!             component: Some("MapPanel".into()),
//!         },
//!         None,
//!     );
//! }
//! let events = service.events();
//! assert_eq!(events.len(), 1);
//! assert_eq!(events[0].occurrences, 3);
//! ```

mod types;

pub use types::{ExportDocument, LifecycleState, MonitoringState};

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, TryLockError, Weak};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::aggregation::{AggregationEngine, MetricSnapshot};
use crate::alerting::{AlertRecord, ThresholdAlerter};
use crate::buffer::RingBuffer;
use crate::config::{sanitize, TelemetryConfig};
use crate::entry::{
    Breadcrumb, BreadcrumbCategory, Entry, EntryKind, PerformanceSample, Severity,
};
use crate::error::{catch_contained, panic_message, CaptureError, ExportError};
use crate::fingerprint::fingerprint;
use crate::hub::{PublishSubscribeHub, Subscription};
use crate::traits::{RealTimeProvider, TimeProvider};

/// Buffers and alert state guarded by one lock.
#[derive(Debug)]
struct ServiceState {
    events: RingBuffer<Entry>,
    breadcrumbs: RingBuffer<Breadcrumb>,
    samples: RingBuffer<PerformanceSample>,
    alerter: ThresholdAlerter,
    last_timestamp: Option<DateTime<Utc>>,
    revision: u64,
}

impl ServiceState {
    fn new(config: &TelemetryConfig) -> Self {
        Self {
            events: RingBuffer::new(config.event_capacity),
            breadcrumbs: RingBuffer::new(config.breadcrumb_capacity),
            samples: RingBuffer::new(config.sample_capacity),
            alerter: ThresholdAlerter::new(config.thresholds.clone(), config.alert_cooldown()),
            last_timestamp: None,
            revision: 0,
        }
    }

    /// Clamp `now` so timestamps never go backwards.
    fn stamp(&mut self, now: DateTime<Utc>) -> DateTime<Utc> {
        let at = match self.last_timestamp {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_timestamp = Some(at);
        at
    }

    /// Merge or insert an entry and return its id.
    fn record(
        &mut self,
        kind: EntryKind,
        severity: Option<Severity>,
        now: DateTime<Utc>,
        trail_len: usize,
    ) -> Uuid {
        let at = self.stamp(now);
        let severity = severity.unwrap_or_else(|| kind.default_severity());
        let crumb = auto_breadcrumb(&kind, severity, at);
        let key = fingerprint(&kind);

        let merged = self.events.find_mut(|e| e.fingerprint == key).map(|existing| {
            existing.record_occurrence(at, severity);
            existing.id
        });

        let id = merged.unwrap_or_else(|| {
            let mut entry = Entry::new(kind, severity, at);
            if entry.is_error() && trail_len > 0 {
                entry.breadcrumbs = self.breadcrumbs.latest(trail_len);
            }
            let id = entry.id;
            if let Some(evicted) = self.events.push(entry) {
                tracing::trace!(fingerprint = %evicted.fingerprint, "Evicted oldest entry");
            }
            id
        });

        if let Some(crumb) = crumb {
            self.breadcrumbs.push(crumb);
        }
        id
    }
}

/// Breadcrumb left behind by kinds that describe user activity.
fn auto_breadcrumb(kind: &EntryKind, level: Severity, at: DateTime<Utc>) -> Option<Breadcrumb> {
    let category = match kind {
        EntryKind::UserInteraction { .. } => BreadcrumbCategory::Interaction,
        EntryKind::Navigation { .. } => BreadcrumbCategory::Navigation,
        EntryKind::NetworkFailure { .. } => BreadcrumbCategory::Http,
        _ => return None,
    };
    Some(Breadcrumb::new(category, kind.summary(), level, at))
}

#[derive(Debug, Default)]
struct Lifecycle {
    state: LifecycleState,
    shutdown: Option<watch::Sender<bool>>,
    timer: Option<JoinHandle<()>>,
}

/// In-process telemetry core.
pub struct TelemetryService {
    config: TelemetryConfig,
    clock: Arc<dyn TimeProvider>,
    session_id: Uuid,
    engine: AggregationEngine,
    state: Mutex<ServiceState>,
    hub: PublishSubscribeHub<MonitoringState>,
    lifecycle: Mutex<Lifecycle>,
}

impl std::fmt::Debug for TelemetryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryService")
            .field("session_id", &self.session_id)
            .field("config", &self.config)
            .field("hub", &self.hub)
            .finish_non_exhaustive()
    }
}

impl TelemetryService {
    /// Create a service using the system clock.
    #[must_use]
    pub fn new(config: TelemetryConfig) -> Self {
        Self::with_clock(config, Arc::new(RealTimeProvider))
    }

    /// Create a service with an injected clock.
    ///
    /// The configuration is sanitized first; see
    /// [`sanitize`](crate::config::sanitize).
    #[must_use]
    pub fn with_clock(config: TelemetryConfig, clock: Arc<dyn TimeProvider>) -> Self {
        let config = sanitize(config);
        let session_id = Uuid::new_v4();
        let now = clock.now();

        tracing::info!(
            session_id = %session_id,
            event_capacity = config.event_capacity,
            tick_interval_ms = config.tick_interval_ms,
            rules = config.thresholds.len(),
            "Telemetry service created"
        );

        Self {
            engine: AggregationEngine::new(config.top_n),
            state: Mutex::new(ServiceState::new(&config)),
            hub: PublishSubscribeHub::new(MonitoringState::empty(now)),
            lifecycle: Mutex::new(Lifecycle::default()),
            config,
            clock,
            session_id,
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Start the periodic recompute timer.
    ///
    /// Requires a tokio runtime on the calling thread. Without one, a
    /// warning is logged and the service stays `Created`; captures still
    /// work and [`tick`](Self::tick) can be driven manually. A stopped
    /// service cannot be restarted.
    pub fn start(self: &Arc<Self>) -> LifecycleState {
        let mut lifecycle = self.lock_lifecycle();
        match lifecycle.state {
            LifecycleState::Running => return LifecycleState::Running,
            LifecycleState::Stopped => {
                tracing::warn!(session_id = %self.session_id, "Stopped service cannot be restarted");
                return LifecycleState::Stopped;
            }
            LifecycleState::Created => {}
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                session_id = %self.session_id,
                "No tokio runtime available, periodic recompute disabled"
            );
            return LifecycleState::Created;
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let timer = runtime.spawn(run_timer(
            Arc::downgrade(self),
            self.config.tick_interval(),
            shutdown_rx,
        ));
        lifecycle.shutdown = Some(shutdown_tx);
        lifecycle.timer = Some(timer);
        lifecycle.state = LifecycleState::Running;
        drop(lifecycle);

        tracing::info!(
            session_id = %self.session_id,
            interval_ms = self.config.tick_interval_ms,
            "Telemetry service started"
        );
        self.publish_state();
        LifecycleState::Running
    }

    /// Cancel the timer and drop every subscriber.
    ///
    /// Calling this more than once is a no-op. Notifications already being
    /// delivered are not recalled.
    pub fn stop(&self) {
        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.state == LifecycleState::Stopped {
            return;
        }
        lifecycle.state = LifecycleState::Stopped;
        if let Some(shutdown) = lifecycle.shutdown.take() {
            let _ = shutdown.send(true);
        }
        if let Some(timer) = lifecycle.timer.take() {
            timer.abort();
        }
        drop(lifecycle);

        self.hub.clear_subscribers();
        tracing::info!(session_id = %self.session_id, "Telemetry service stopped");
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> LifecycleState {
        self.lock_lifecycle().state
    }

    // ========================================================================
    // Capture
    // ========================================================================

    /// Record an entry.
    ///
    /// A kind whose fingerprint matches a buffered entry is merged into it;
    /// otherwise a new entry is pushed. `severity` defaults to the kind's
    /// default severity. Snapshot rules are evaluated before subscribers
    /// are notified, so the published state already carries any alert the
    /// capture raised. Returns the id of the stored entry, or `None` when
    /// the service is stopped.
    pub fn capture(&self, kind: EntryKind, severity: Option<Severity>) -> Option<Uuid> {
        if self.reject_when_stopped() {
            return None;
        }
        let now = self.clock.now();
        let (id, raised) = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let id = state.record(kind, severity, now, self.config.breadcrumbs_per_entry);
            let snapshot = self.summarize_locked(state, now);
            (id, state.alerter.evaluate_snapshot(&snapshot, now))
        };
        if !raised.is_empty() {
            tracing::debug!(
                session_id = %self.session_id,
                raised = raised.len(),
                "Capture raised alerts"
            );
        }
        self.publish_state();
        Some(id)
    }

    /// Record an entry produced by a fallible builder.
    ///
    /// An `Err` or a panic inside `builder` is logged as a
    /// [`CaptureError`] and nothing is recorded, not even by the panic hook.
    pub fn try_capture<F, E>(&self, builder: F) -> Option<Uuid>
    where
        F: FnOnce() -> Result<EntryKind, E>,
        E: std::fmt::Display,
    {
        let built = catch_contained(builder);
        let failure = match built {
            Ok(Ok(kind)) => return self.capture(kind, None),
            Ok(Err(e)) => CaptureError::BuilderFailed {
                message: e.to_string(),
            },
            Err(payload) => CaptureError::BuilderPanicked {
                message: panic_message(payload.as_ref()),
            },
        };
        tracing::warn!(session_id = %self.session_id, error = %failure, "Entry dropped");
        None
    }

    /// Record an entry without blocking and without notifying.
    ///
    /// Used from contexts that must not wait on the service lock, such as a
    /// panic hook. The entry is dropped when the lock is busy; subscribers
    /// see it on the next publish.
    pub(crate) fn capture_nonblocking(&self, kind: EntryKind, severity: Severity) -> bool {
        let stopped = match self.lifecycle.try_lock() {
            Ok(guard) => guard.state == LifecycleState::Stopped,
            Err(TryLockError::Poisoned(poisoned)) => {
                poisoned.into_inner().state == LifecycleState::Stopped
            }
            Err(TryLockError::WouldBlock) => false,
        };
        if stopped {
            return false;
        }

        let now = self.clock.now();
        let mut state = match self.state.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                tracing::warn!(session_id = %self.session_id, "Service busy, entry dropped");
                return false;
            }
        };
        state.record(kind, Some(severity), now, self.config.breadcrumbs_per_entry);
        true
    }

    /// Append a breadcrumb to the trail.
    pub fn add_breadcrumb(
        &self,
        category: BreadcrumbCategory,
        message: impl Into<String>,
        level: Severity,
        data: BTreeMap<String, String>,
    ) {
        if self.reject_when_stopped() {
            return;
        }
        let now = self.clock.now();
        let mut state = self.lock_state();
        let at = state.stamp(now);
        let mut crumb = Breadcrumb::new(category, message, level, at);
        crumb.data = data;
        state.breadcrumbs.push(crumb);
    }

    /// Record a performance sample and evaluate its thresholds.
    ///
    /// Returns the alert raised by this value, if any. Non-finite values
    /// are dropped.
    pub fn record_metric(
        &self,
        metric: impl Into<String>,
        source: impl Into<String>,
        value: f64,
    ) -> Option<AlertRecord> {
        if self.reject_when_stopped() {
            return None;
        }
        let metric = metric.into();
        let source = source.into();
        if !value.is_finite() {
            tracing::debug!(metric = %metric, source = %source, value, "Non-finite sample dropped");
            return None;
        }

        let now = self.clock.now();
        let alert = {
            let mut state = self.lock_state();
            let at = state.stamp(now);
            let alert = state.alerter.evaluate(&metric, &source, value, at);
            state.samples.push(PerformanceSample {
                metric,
                source,
                value,
                timestamp: at,
            });
            alert
        };
        self.publish_state();
        alert
    }

    // ========================================================================
    // Recompute
    // ========================================================================

    /// Recompute, evaluate thresholds and publish.
    ///
    /// Evaluates the snapshot metrics with source `"global"` and the newest
    /// in-window sample of every `(metric, source)` pair. Returns the
    /// alerts raised by this tick.
    pub fn tick(&self) -> Vec<AlertRecord> {
        if self.lifecycle() == LifecycleState::Stopped {
            return Vec::new();
        }
        let now = self.clock.now();
        let window = self.config.snapshot_window();

        let raised = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let snapshot = self.summarize_locked(state, now);
            let mut raised = state.alerter.evaluate_snapshot(&snapshot, now);

            let cutoff = window.and_then(|w| now.checked_sub_signed(w));
            let mut seen = HashSet::new();
            let latest: Vec<(String, String, f64)> = state
                .samples
                .iter()
                .rev()
                .filter(|s| cutoff.is_none_or(|c| s.timestamp >= c))
                .filter(|s| seen.insert((s.metric.clone(), s.source.clone())))
                .map(|s| (s.metric.clone(), s.source.clone(), s.value))
                .collect();
            for (metric, source, value) in latest {
                raised.extend(state.alerter.evaluate(&metric, &source, value, now));
            }
            raised
        };

        tracing::debug!(
            session_id = %self.session_id,
            raised = raised.len(),
            "Recompute tick"
        );
        self.publish_state();
        raised
    }

    // ========================================================================
    // Consumption
    // ========================================================================

    /// Snapshot over the configured window, computed now.
    #[must_use]
    pub fn snapshot(&self) -> MetricSnapshot {
        self.snapshot_with_window(self.config.snapshot_window())
    }

    /// Snapshot over an explicit window (`None` for the whole buffer).
    #[must_use]
    pub fn snapshot_with_window(&self, window: Option<Duration>) -> MetricSnapshot {
        let now = self.clock.now();
        let mut guard = self.lock_state();
        let state = &mut *guard;
        self.engine.summarize(
            state.events.make_contiguous(),
            state.samples.make_contiguous(),
            window,
            now,
        )
    }

    /// Full monitoring state, computed now.
    #[must_use]
    pub fn state(&self) -> MonitoringState {
        self.build_state().1
    }

    /// Register a subscriber and replay the current state to it.
    pub fn subscribe<F>(&self, id: impl Into<String>, callback: F) -> Subscription<MonitoringState>
    where
        F: Fn(&MonitoringState) + Send + Sync + 'static,
    {
        self.hub.subscribe(id, callback)
    }

    /// Register a handler for future changes only.
    pub fn on_change<F>(&self, handler: F) -> Subscription<MonitoringState>
    where
        F: Fn(&MonitoringState) + Send + Sync + 'static,
    {
        self.hub.on_change(handler)
    }

    /// Last published state.
    #[must_use]
    pub fn current(&self) -> MonitoringState {
        self.hub.current()
    }

    /// Remove an alert from the active list. Returns whether it was there.
    pub fn dismiss_alert(&self, id: Uuid) -> bool {
        let removed = self.lock_state().alerter.dismiss(id);
        if removed {
            self.publish_state();
        }
        removed
    }

    /// Empty every buffer and forget every alert.
    pub fn clear_all(&self) {
        {
            let mut state = self.lock_state();
            state.events.clear();
            state.breadcrumbs.clear();
            state.samples.clear();
            state.alerter.clear();
        }
        tracing::info!(session_id = %self.session_id, "Telemetry buffers cleared");
        self.publish_state();
    }

    /// Build the export document.
    #[must_use]
    pub fn export_document(&self) -> ExportDocument {
        let now = self.clock.now();
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let metrics = self.summarize_locked(state, now);
        ExportDocument {
            events: state.events.to_vec(),
            metrics,
            alerts: state.alerter.active(),
            exported_at: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    /// Serialize the export document as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Serialize`] if serialization fails.
    pub fn export_snapshot(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(&self.export_document())?)
    }

    /// Write the export document to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError::Write`] if the file cannot be written.
    pub fn export_to_path(&self, path: impl AsRef<Path>) -> Result<(), ExportError> {
        let path = path.as_ref();
        let json = self.export_snapshot()?;
        std::fs::write(path, json).map_err(|source| ExportError::Write {
            path: path.display().to_string(),
            source,
        })?;
        tracing::info!(session_id = %self.session_id, path = %path.display(), "Snapshot exported");
        Ok(())
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Buffered entries, newest first.
    #[must_use]
    pub fn events(&self) -> Vec<Entry> {
        self.lock_state().events.to_vec()
    }

    /// Buffered breadcrumbs, newest first.
    #[must_use]
    pub fn breadcrumbs(&self) -> Vec<Breadcrumb> {
        self.lock_state().breadcrumbs.to_vec()
    }

    /// Active alerts, newest first.
    #[must_use]
    pub fn active_alerts(&self) -> Vec<AlertRecord> {
        self.lock_state().alerter.active()
    }

    /// Auto-resolved alerts, newest first.
    #[must_use]
    pub fn resolved_alerts(&self) -> Vec<AlertRecord> {
        self.lock_state().alerter.resolved()
    }

    /// Per-instance session id.
    #[must_use]
    pub const fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Effective (sanitized) configuration.
    #[must_use]
    pub const fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.hub.subscriber_count()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Snapshot over the configured window. Called with the state lock held.
    fn summarize_locked(&self, state: &mut ServiceState, now: DateTime<Utc>) -> MetricSnapshot {
        self.engine.summarize(
            state.events.make_contiguous(),
            state.samples.make_contiguous(),
            self.config.snapshot_window(),
            now,
        )
    }

    /// Build the monitoring state and the revision it was built at.
    ///
    /// Revisions increase under the state lock, so a higher revision always
    /// reflects a later view of the buffers.
    fn build_state(&self) -> (u64, MonitoringState) {
        let lifecycle = self.lifecycle();
        let now = self.clock.now();
        let mut guard = self.lock_state();
        let state = &mut *guard;
        state.revision += 1;
        let revision = state.revision;
        let snapshot = self.summarize_locked(state, now);
        let mut recent_events = state.events.latest(self.config.top_n);
        recent_events.reverse();
        let mut recent_breadcrumbs = state.breadcrumbs.latest(self.config.breadcrumbs_per_entry);
        recent_breadcrumbs.reverse();

        let monitoring = MonitoringState {
            snapshot,
            active_alerts: state.alerter.active(),
            recent_events,
            recent_breadcrumbs,
            lifecycle,
        };
        (revision, monitoring)
    }

    /// Publish a fresh state. Never called with the state lock held.
    ///
    /// Concurrent publishers race only on delivery order: the hub keeps the
    /// highest revision, so [`current`](Self::current) never goes back to an
    /// older view, but a subscriber on one thread may still observe states
    /// out of order while another thread is delivering.
    fn publish_state(&self) {
        let (revision, state) = self.build_state();
        self.hub.publish_revision(revision, state);
    }

    fn reject_when_stopped(&self) -> bool {
        if self.lifecycle() == LifecycleState::Stopped {
            tracing::warn!(
                session_id = %self.session_id,
                error = %CaptureError::Stopped,
                "Entry dropped"
            );
            true
        } else {
            false
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, ServiceState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(session_id = %self.session_id, "Service state lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn lock_lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        match self.lifecycle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::warn!(session_id = %self.session_id, "Lifecycle lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

impl Drop for TelemetryService {
    fn drop(&mut self) {
        let lifecycle = match self.lifecycle.get_mut() {
            Ok(lifecycle) => lifecycle,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(timer) = lifecycle.timer.take() {
            timer.abort();
        }
    }
}

/// Periodic recompute loop. Exits when the service is dropped or stopped.
async fn run_timer(
    service: Weak<TelemetryService>,
    period: std::time::Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    // Skip the first immediate tick
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let Some(service) = service.upgrade() else {
                    break;
                };
                service.tick();
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("Recompute timer exited");
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
    use crate::alerting::ThresholdRule;
    use crate::traits::{ManualTimeProvider, MockTimeProvider};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use static_assertions::assert_impl_all;

    assert_impl_all!(TelemetryService: Send, Sync);

    fn service_with_clock(config: TelemetryConfig) -> (TelemetryService, ManualTimeProvider) {
        let clock = ManualTimeProvider::default();
        let service = TelemetryService::with_clock(config, Arc::new(clock.clone()));
        (service, clock)
    }

    fn script_error(message: &str) -> EntryKind {
        EntryKind::ScriptError {
            message: message.to_string(),
            error_type: Some("TypeError".to_string()),
            filename: None,
            line: None,
            column: None,
            stack: None,
            component: Some("AssignmentTable".to_string()),
            function: Some("render".to_string()),
        }
    }

    fn click(target: &str) -> EntryKind {
        EntryKind::UserInteraction {
            action: "click".to_string(),
            target: target.to_string(),
            component: None,
        }
    }

    #[test]
    fn test_identical_captures_merge() {
        let (service, clock) = service_with_clock(TelemetryConfig::default());
        let first = service.capture(script_error("boom"), None).unwrap();
        for _ in 0..4 {
            clock.advance(Duration::seconds(10));
            assert_eq!(service.capture(script_error("boom"), None), Some(first));
        }

        let events = service.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].occurrences, 5);
        assert_eq!(events[0].last_seen - events[0].timestamp, Duration::seconds(40));
    }

    #[test]
    fn test_merge_raises_severity() {
        let (service, _) = service_with_clock(TelemetryConfig::default());
        service.capture(script_error("boom"), Some(Severity::Warning));
        service.capture(script_error("boom"), Some(Severity::Critical));
        service.capture(script_error("boom"), Some(Severity::Info));
        assert_eq!(service.events()[0].severity, Severity::Critical);
    }

    #[test]
    fn test_timestamps_monotonic() {
        let (service, clock) = service_with_clock(TelemetryConfig::default());
        service.capture(script_error("first"), None);
        clock.advance(Duration::seconds(-30));
        service.capture(script_error("second"), None);

        let events = service.events();
        assert!(events[0].timestamp >= events[1].timestamp);
    }

    #[test]
    fn test_error_entries_carry_breadcrumb_trail() {
        let config = TelemetryConfig {
            breadcrumbs_per_entry: 2,
            ..TelemetryConfig::default()
        };
        let (service, _) = service_with_clock(config);
        service.capture(click("save"), None);
        service.capture(
            EntryKind::Navigation {
                from: Some("/".to_string()),
                to: "/territories".to_string(),
            },
            None,
        );
        service.add_breadcrumb(
            BreadcrumbCategory::Console,
            "loading",
            Severity::Debug,
            BTreeMap::new(),
        );
        service.capture(script_error("boom"), None);

        let error = service
            .events()
            .into_iter()
            .find(|e| e.category == crate::entry::Category::Javascript)
            .unwrap();
        let messages: Vec<&str> = error.breadcrumbs.iter().map(|b| b.message.as_str()).collect();
        assert_eq!(messages, vec!["/ -> /territories", "loading"]);

        let interaction = service
            .events()
            .into_iter()
            .find(|e| e.category == crate::entry::Category::Interaction)
            .unwrap();
        assert!(interaction.breadcrumbs.is_empty());
        assert_eq!(service.breadcrumbs().len(), 3);
    }

    #[test]
    fn test_record_metric_cpu_sequence() {
        let config = TelemetryConfig {
            thresholds: vec![ThresholdRule::above("cpu", 80.0, Severity::Warning)],
            ..TelemetryConfig::default()
        };
        let (service, clock) = service_with_clock(config);

        let mut alerts = Vec::new();
        for value in [50.0, 85.0, 90.0, 40.0, 95.0] {
            alerts.extend(service.record_metric("cpu", "worker-1", value));
            clock.advance(Duration::minutes(1));
        }

        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].current_value, 85.0);
        assert_eq!(service.active_alerts().len(), 1);
    }

    #[test]
    fn test_record_metric_drops_non_finite() {
        let (service, _) = service_with_clock(TelemetryConfig::default());
        assert!(service.record_metric("cpu", "host", f64::NAN).is_none());
        assert!(service.snapshot().performance.is_empty());
    }

    #[test]
    fn test_capture_raises_snapshot_alert() {
        let (service, _) = service_with_clock(TelemetryConfig::default());
        service.capture(script_error("fatal"), Some(Severity::Critical));

        let alerts = service.active_alerts();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metric, "critical_errors");
        assert_eq!(alerts[0].source, crate::alerting::GLOBAL_SOURCE);
        assert_eq!(service.current().active_alerts, alerts);

        // Still crossing, but inside the cooldown window
        service.capture(script_error("fatal"), Some(Severity::Critical));
        assert!(service.tick().is_empty());
        assert_eq!(service.active_alerts().len(), 1);
    }

    #[test]
    fn test_tick_retriggers_sustained_snapshot_alert() {
        let (service, clock) = service_with_clock(TelemetryConfig::default());
        service.capture(script_error("fatal"), Some(Severity::Critical));

        clock.advance(Duration::minutes(6));
        let raised = service.tick();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].metric, "critical_errors");
    }

    #[test]
    fn test_oversized_window_does_not_break_capture() {
        let (service, _) = service_with_clock(TelemetryConfig {
            snapshot_window_ms: Some(u64::MAX >> 1),
            ..TelemetryConfig::default()
        });
        assert_eq!(
            service.config().snapshot_window_ms,
            Some(crate::config::DEFAULT_SNAPSHOT_WINDOW_MS)
        );

        assert!(service.capture(script_error("boom"), None).is_some());
        assert_eq!(service.snapshot().total, 1);
        assert!(service.export_snapshot().is_ok());

        let whole = service.snapshot_with_window(Some(Duration::milliseconds(i64::MAX)));
        assert_eq!(whole.total, 1);
    }

    #[test]
    fn test_tick_reevaluates_latest_sample() {
        let config = TelemetryConfig {
            thresholds: vec![ThresholdRule::above("cpu", 80.0, Severity::Warning)],
            ..TelemetryConfig::default()
        };
        let (service, clock) = service_with_clock(config);
        assert!(service.record_metric("cpu", "host", 90.0).is_some());

        clock.advance(Duration::minutes(6));
        let raised = service.tick();
        assert_eq!(raised.len(), 1);
        assert_eq!(service.active_alerts().len(), 1);
    }

    #[test]
    fn test_dismiss_alert() {
        let (service, _) = service_with_clock(TelemetryConfig::default());
        service.capture(script_error("fatal"), Some(Severity::Critical));
        let alert = service.active_alerts().pop().unwrap();

        assert!(service.dismiss_alert(alert.id));
        assert!(!service.dismiss_alert(alert.id));
        assert!(service.active_alerts().is_empty());
    }

    #[test]
    fn test_clear_all() {
        let (service, _) = service_with_clock(TelemetryConfig::default());
        service.capture(script_error("boom"), None);
        service.record_metric("cpu", "host", 1.0);
        service.clear_all();

        assert!(service.events().is_empty());
        assert!(service.breadcrumbs().is_empty());
        assert_eq!(service.snapshot().total, 0);
        assert!(service.snapshot().performance.is_empty());
    }

    #[test]
    fn test_try_capture_swallows_failures() {
        let (service, _) = service_with_clock(TelemetryConfig::default());
        assert!(service
            .try_capture(|| Err::<EntryKind, _>("missing field"))
            .is_none());
        assert!(service
            .try_capture(|| -> Result<EntryKind, String> { panic!("builder exploded") })
            .is_none());
        assert!(service
            .try_capture(|| Ok::<_, String>(script_error("ok")))
            .is_some());
        assert_eq!(service.events().len(), 1);
    }

    #[test]
    fn test_subscribers_receive_updates() {
        let (service, _) = service_with_clock(TelemetryConfig::default());
        let totals = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&totals);
        let subscription = service.subscribe("dashboard", move |state: &MonitoringState| {
            sink.lock().unwrap().push(state.snapshot.total);
        });

        service.capture(script_error("boom"), None);
        service.capture(script_error("boom"), None);
        subscription.unsubscribe();
        service.capture(script_error("boom"), None);

        assert_eq!(*totals.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_capture_from_other_service_subscriber_notifies_it() {
        let (upstream, _) = service_with_clock(TelemetryConfig::default());
        let downstream = Arc::new(service_with_clock(TelemetryConfig::default()).0);

        let totals = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&totals);
        let _audit = downstream.on_change(move |state: &MonitoringState| {
            sink.lock().unwrap().push(state.snapshot.total);
        });

        let forward = Arc::clone(&downstream);
        let _relay = upstream.on_change(move |_| {
            forward.capture(click("#relay"), None);
        });

        upstream.capture(script_error("boom"), None);
        assert_eq!(downstream.events().len(), 1);
        assert_eq!(*totals.lock().unwrap(), vec![1]);
    }

    #[test]
    fn test_concurrent_captures_never_roll_back_published_state() {
        let service = Arc::new(service_with_clock(TelemetryConfig::default()).0);
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let service = Arc::clone(&service);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        service.capture(click(&format!("#t{t}-{i}")), None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(service.current().snapshot.total, 100);
    }

    #[test]
    fn test_stop_rejects_captures_and_clears_subscribers() {
        let (service, _) = service_with_clock(TelemetryConfig::default());
        let _subscription = service.on_change(|_| {});
        assert_eq!(service.subscriber_count(), 1);

        service.stop();
        service.stop();
        assert_eq!(service.lifecycle(), LifecycleState::Stopped);
        assert_eq!(service.subscriber_count(), 0);
        assert!(service.capture(script_error("late"), None).is_none());
        assert!(service.record_metric("cpu", "host", 99.0).is_none());
        assert!(service.tick().is_empty());
    }

    #[test]
    fn test_start_without_runtime_stays_created() {
        let service = Arc::new(TelemetryService::new(TelemetryConfig::default()));
        assert_eq!(service.start(), LifecycleState::Created);
        assert_eq!(service.lifecycle(), LifecycleState::Created);
    }

    #[tokio::test]
    async fn test_start_and_stop_with_runtime() {
        let service = Arc::new(TelemetryService::new(TelemetryConfig::default()));
        assert_eq!(service.start(), LifecycleState::Running);
        assert_eq!(service.start(), LifecycleState::Running);
        assert_eq!(service.current().lifecycle, LifecycleState::Running);

        service.stop();
        assert_eq!(service.start(), LifecycleState::Stopped);
    }

    #[test]
    fn test_start_inside_block_on() {
        let service = Arc::new(TelemetryService::new(TelemetryConfig::default()));
        let started = tokio_test::block_on(async { service.start() });
        assert_eq!(started, LifecycleState::Running);
        service.stop();
        assert_eq!(service.lifecycle(), LifecycleState::Stopped);
    }

    #[test]
    fn test_export_document_shape() {
        let (service, _) = service_with_clock(TelemetryConfig::default());
        service.capture(script_error("boom"), None);

        let json: serde_json::Value =
            serde_json::from_str(&service.export_snapshot().unwrap()).unwrap();
        assert_eq!(json["events"].as_array().unwrap().len(), 1);
        assert_eq!(json["metrics"]["total"], 1);
        assert!(json["alerts"].as_array().unwrap().is_empty());
        assert_eq!(json["exportedAt"], "2024-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_export_to_missing_directory_fails() {
        let (service, _) = service_with_clock(TelemetryConfig::default());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.json");
        let err = service.export_to_path(&path).unwrap_err();
        assert!(matches!(err, ExportError::Write { .. }));
    }

    #[test]
    fn test_mock_clock_drives_snapshot_time() {
        let fixed = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let mut clock = MockTimeProvider::new();
        clock.expect_now().returning(move || fixed);

        let service = TelemetryService::with_clock(TelemetryConfig::default(), Arc::new(clock));
        assert_eq!(service.snapshot().computed_at, fixed);
    }

    #[test]
    fn test_capture_nonblocking_records_without_publishing() {
        let (service, _) = service_with_clock(TelemetryConfig::default());
        let calls = Arc::new(Mutex::new(0_u32));
        let sink = Arc::clone(&calls);
        let _subscription = service.on_change(move |_| *sink.lock().unwrap() += 1);

        assert!(service.capture_nonblocking(script_error("hook"), Severity::Critical));
        assert_eq!(service.events().len(), 1);
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_sanitizes_config() {
        let (service, _) = service_with_clock(TelemetryConfig {
            event_capacity: 0,
            ..TelemetryConfig::default()
        });
        assert_eq!(service.config().event_capacity, 1000);
    }
}
