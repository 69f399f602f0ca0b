//! Integration tests for the telemetry core.
//!
//! These tests verify multi-step workflows including:
//! - Subscriber notification and failure isolation
//! - Export document schema
//! - Service lifecycle with the tokio timer
//! - Replay command processing
//! - Panic capture through the process-wide hook

mod export_workflow;
mod lifecycle_workflow;
mod panic_hook_workflow;
mod replay_workflow;
mod subscription_workflow;
