//! Fixed-window limiter configuration and records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Immutable configuration for one limiter instance.
///
/// Built once at startup and handed to the pipeline by reference; there is
/// no global limiter state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterConfig {
    /// Limiter name, used as the store key prefix
    name: String,
    /// Maximum admitted requests per window
    max_requests: u64,
    /// Length of each window
    window: Duration,
}

impl LimiterConfig {
    /// Create a new limiter configuration.
    ///
    /// Returns `None` if `max_requests` or the window is zero.
    pub fn new(name: impl Into<String>, max_requests: u64, window: Duration) -> Option<Self> {
        if max_requests == 0 || window.is_zero() {
            return None;
        }
        Some(Self {
            name: name.into(),
            max_requests,
            window,
        })
    }

    /// Get the limiter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the maximum admitted requests per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Get the window duration.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Compute the end of a window opened at `now`.
    pub fn window_end_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        // Windows are validated non-zero and configured in seconds, so this
        // cannot overflow chrono's range in practice.
        let window = chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX);
        now.checked_add_signed(window).unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// A stored admission window for one `(limiter, key)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowRecord {
    /// Admitted calls in this window
    pub count: u64,
    /// When this window stops counting
    pub window_end: DateTime<Utc>,
}

impl WindowRecord {
    /// Open a fresh window holding the first admitted call.
    pub fn open(config: &LimiterConfig, now: DateTime<Utc>) -> Self {
        Self {
            count: 1,
            window_end: config.window_end_from(now),
        }
    }

    /// A record whose window has passed is treated as absent.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.window_end
    }
}

/// The outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the call must be rejected
    pub limited: bool,
    /// The configured maximum for the limiter
    pub limit: u64,
    /// Calls left in the current window
    pub remaining: u64,
    /// When the current window resets
    pub reset_at: DateTime<Utc>,
}

impl Decision {
    /// An admitted call.
    pub fn admitted(limit: u64, remaining: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            limited: false,
            limit,
            remaining,
            reset_at,
        }
    }

    /// A rejected call.
    pub fn limited(limit: u64, reset_at: DateTime<Utc>) -> Self {
        Self {
            limited: true,
            limit,
            remaining: 0,
            reset_at,
        }
    }
}
