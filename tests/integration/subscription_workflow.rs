//! Subscription workflow tests.
//!
//! Tests replay-on-join, change notification, unsubscribe idempotence and
//! isolation of failing subscribers.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use territory_telemetry::config::TelemetryConfig;
use territory_telemetry::entry::EntryKind;
use territory_telemetry::error::SubscriberError;
use territory_telemetry::hub::PublishSubscribeHub;
use territory_telemetry::service::{MonitoringState, TelemetryService};
use territory_telemetry::traits::ManualTimeProvider;

fn create_service() -> TelemetryService {
    TelemetryService::with_clock(
        TelemetryConfig::default(),
        Arc::new(ManualTimeProvider::default()),
    )
}

fn rejection(reason: &str) -> EntryKind {
    EntryKind::PromiseRejection {
        reason: reason.to_string(),
        component: Some("ScheduleBoard".to_string()),
    }
}

#[test]
fn test_subscribe_replays_current_state() {
    let service = create_service();
    service.capture(rejection("timeout"), None);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _subscription = service.subscribe("late-joiner", move |state: &MonitoringState| {
        sink.lock().unwrap().push(state.snapshot.total);
    });

    assert_eq!(*seen.lock().unwrap(), vec![1]);
}

#[test]
fn test_on_change_does_not_replay() {
    let service = create_service();
    service.capture(rejection("timeout"), None);

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _subscription = service.on_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(service.current().snapshot.total, 1);

    service.capture(rejection("timeout"), None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_unsubscribe_twice_equals_once() {
    let service = create_service();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let subscription = service.subscribe("panel", move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let _other = service.on_change(|_| {});

    subscription.unsubscribe();
    let after_first = service.subscriber_count();
    subscription.unsubscribe();

    assert_eq!(service.subscriber_count(), after_first);
    assert_eq!(after_first, 1);
    assert!(!subscription.is_active());

    service.capture(rejection("timeout"), None);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_resubscribing_same_id_replaces_registration() {
    let service = create_service();
    let first = service.subscribe("panel", |_| {});
    let second = service.subscribe("panel", |_| {});
    assert_eq!(service.subscriber_count(), 1);

    // The stale handle must not remove the newer registration
    first.unsubscribe();
    assert_eq!(service.subscriber_count(), 1);
    second.unsubscribe();
    assert_eq!(service.subscriber_count(), 0);
}

#[test]
fn test_panicking_subscriber_does_not_block_others() {
    let hub = PublishSubscribeHub::new(0_u32);
    let delivered = Arc::new(AtomicUsize::new(0));

    let _bad = hub.on_change(|value: &u32| {
        if *value > 0 {
            panic!("subscriber exploded");
        }
    });
    let counter = Arc::clone(&delivered);
    let _good = hub.on_change(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let failures = hub.publish(1);
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    assert_eq!(failures.len(), 1);
    match &failures[0] {
        SubscriberError::Panicked { message, .. } => assert_eq!(message, "subscriber exploded"),
    }
    assert_eq!(hub.current(), 1);
}

#[test]
fn test_publish_from_callback_does_not_recurse() {
    let hub = PublishSubscribeHub::new(0_u32);
    let calls = Arc::new(AtomicUsize::new(0));

    let inner_hub = hub.clone();
    let counter = Arc::clone(&calls);
    let _subscription = hub.on_change(move |value: &u32| {
        counter.fetch_add(1, Ordering::SeqCst);
        inner_hub.publish(value + 100);
    });

    hub.publish(1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(hub.current(), 101);
}
