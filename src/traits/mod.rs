//! Trait definitions for mockable dependencies.
//!
//! This module defines:
//! - [`TimeProvider`]: Time abstraction for testing
//!
//! along with two implementations: [`RealTimeProvider`] for production and
//! [`ManualTimeProvider`] for deterministic clock advancement.
//!
//! # Mocking
//!
//! Traits are annotated with `#[cfg_attr(test, mockall::automock)]`
//! which generates mock implementations automatically for testing.
//!
//! # Example
//!
//! ```
//! use territory_telemetry::traits::{ManualTimeProvider, TimeProvider};
//! use chrono::Duration;
//!
//! let clock = ManualTimeProvider::default();
//! let before = clock.now();
//! clock.advance(Duration::minutes(1));
//! assert_eq!(clock.now() - before, Duration::minutes(1));
//! ```

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, TimeZone, Utc};

/// Time provider trait for testing.
///
/// Allows injecting a fake clock so cooldown windows and rolling metric
/// windows can be tested without sleeping.
#[cfg_attr(test, mockall::automock)]
pub trait TimeProvider: Send + Sync {
    /// Get the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Real time provider using system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealTimeProvider;

impl TimeProvider for RealTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock.
///
/// Clones share the same underlying instant, so a test can keep one handle
/// and hand another to the service.
#[derive(Debug, Clone)]
pub struct ManualTimeProvider {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualTimeProvider {
    /// Create a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Move the clock forward (or backward, for negative durations).
    pub fn advance(&self, by: Duration) {
        let mut guard = match self.now.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard += by;
    }

    /// Jump to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut guard = match self.now.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = to;
    }
}

impl Default for ManualTimeProvider {
    /// Starts at 2024-01-01T00:00:00Z.
    fn default() -> Self {
        let start = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .unwrap_or_else(Utc::now);
        Self::new(start)
    }
}

impl TimeProvider for ManualTimeProvider {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(RealTimeProvider: Send, Sync, Clone, Copy, Default);
    assert_impl_all!(ManualTimeProvider: Send, Sync, Clone, Default);

    #[test]
    fn test_real_time_provider_returns_current_time() {
        let before = Utc::now();
        let now = RealTimeProvider.now();
        let after = Utc::now();
        assert!(now >= before && now <= after);
    }

    #[test]
    fn test_manual_time_provider_advance() {
        let clock = ManualTimeProvider::default();
        let start = clock.now();
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now() - start, Duration::seconds(90));
    }

    #[test]
    fn test_manual_time_provider_clones_share_state() {
        let clock = ManualTimeProvider::default();
        let handle = clock.clone();
        handle.advance(Duration::minutes(5));
        assert_eq!(clock.now(), handle.now());
    }

    #[test]
    fn test_manual_time_provider_set() {
        let clock = ManualTimeProvider::default();
        let target = Utc.with_ymd_and_hms(2030, 6, 1, 12, 0, 0).unwrap();
        clock.set(target);
        assert_eq!(clock.now(), target);
    }

    #[test]
    fn test_mock_time_provider() {
        let fixed = Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap();
        let mut mock = MockTimeProvider::new();
        mock.expect_now().times(2).returning(move || fixed);
        assert_eq!(mock.now(), fixed);
        assert_eq!(mock.now(), fixed);
    }
}
