//! Territory Telemetry
//!
//! In-process error and event tracking for the territory assignment
//! dashboards: capture, deduplication, rolling aggregation, threshold
//! alerting and change notification.
//!
//! # Features
//!
//! - Fixed-capacity ring buffers for entries, breadcrumbs and samples
//! - Fingerprint-based merging of recurring issues
//! - Snapshots with counts, rates, top issues and metric rollups
//! - Per-`(metric, source)` threshold alerts with cooldown and auto-resolve
//! - Replay-on-join publish/subscribe for UI consumers
//! - JSON export of events, metrics and alerts
//!
//! # Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use territory_telemetry::config::TelemetryConfig;
//! use territory_telemetry::instrument::Instrumentation;
//! use territory_telemetry::service::TelemetryService;
//!
//! let service = Arc::new(TelemetryService::new(TelemetryConfig::default()));
//! let instrumentation = Instrumentation::new(Arc::clone(&service));
//! instrumentation.report_promise_rejection("quota exceeded", Some("AssignmentForm"));
//!
//! let snapshot = service.snapshot();
//! assert_eq!(snapshot.error_count, 1);
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐ capture ┌──────────────────────────────────┐
//! │ Instrumentation │────────▶│ TelemetryService                 │
//! │ (hooks, panics) │         │  RingBuffer ─▶ AggregationEngine │
//! └─────────────────┘         │       │              │           │
//!                             │       ▼              ▼           │
//!                             │  ThresholdAlerter ─▶ Hub ────────┼──▶ subscribers
//!                             └──────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod aggregation;
pub mod alerting;
pub mod buffer;
pub mod config;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod hub;
pub mod ingest;
pub mod instrument;
pub mod service;
pub mod traits;
