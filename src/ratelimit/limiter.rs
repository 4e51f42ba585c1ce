//! Core rate limiter implementation.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, trace, warn};

use super::key::{AdmissionKey, StoreKey};
use super::store::{IncrementOutcome, StoreError, WindowStore};
use super::window::{Decision, LimiterConfig, WindowRecord};

/// Default deadline for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_millis(250);

/// How many times a call re-attempts after losing a window-creation race.
const MAX_ADMIT_ATTEMPTS: usize = 4;

/// A fixed-window rate limiter over a shared [`WindowStore`].
///
/// The limiter itself holds no per-key state, so any number of independent
/// instances may share one store. Counting correctness rests on the store's
/// per-key atomic operations.
pub struct RateLimiter {
    /// The shared record store
    store: Arc<dyn WindowStore>,
    /// Deadline applied to each store call
    store_timeout: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter over the given store.
    pub fn new(store: Arc<dyn WindowStore>) -> Self {
        Self {
            store,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Set the deadline applied to each store call.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Check and record one call for `key` against `config`.
    pub async fn admit(&self, config: &LimiterConfig, key: &AdmissionKey) -> Decision {
        self.admit_at(config, key, Utc::now()).await
    }

    /// Check and record one call as if the current time were `now`.
    ///
    /// If the store fails or times out the call is admitted (fail-open) and
    /// the failure is logged for alerting.
    pub async fn admit_at(
        &self,
        config: &LimiterConfig,
        key: &AdmissionKey,
        now: DateTime<Utc>,
    ) -> Decision {
        let store_key = StoreKey::new(config.name(), key);

        trace!(
            key = %store_key,
            max_requests = config.max_requests(),
            "Checking rate limit"
        );

        match self.try_admit(config, &store_key, now).await {
            Ok(decision) => {
                if decision.limited {
                    debug!(
                        key = %store_key,
                        reset_at = %decision.reset_at,
                        "Rate limit exceeded"
                    );
                }
                decision
            }
            Err(StoreError::Contention(_)) => {
                // Never over-admit under contention.
                warn!(key = %store_key, "Window contention, denying call");
                Decision::limited(config.max_requests(), config.window_end_from(now))
            }
            Err(e) => {
                error!(
                    alert = true,
                    key = %store_key,
                    error = %e,
                    "Rate limit store failed, admitting call (fail-open)"
                );
                Decision::admitted(
                    config.max_requests(),
                    config.max_requests(),
                    config.window_end_from(now),
                )
            }
        }
    }

    async fn try_admit(
        &self,
        config: &LimiterConfig,
        key: &StoreKey,
        now: DateTime<Utc>,
    ) -> Result<Decision, StoreError> {
        let max = config.max_requests();

        for _ in 0..MAX_ADMIT_ATTEMPTS {
            match self.call(self.store.atomic_increment(key, max, now)).await? {
                IncrementOutcome::Incremented(record) => {
                    return Ok(Decision::admitted(
                        max,
                        max.saturating_sub(record.count),
                        record.window_end,
                    ));
                }
                IncrementOutcome::AtCapacity(record) => {
                    return Ok(Decision::limited(max, record.window_end));
                }
                IncrementOutcome::Missing => {
                    let record = WindowRecord::open(config, now);
                    if self.call(self.store.create_if_absent(key, record, now)).await? {
                        trace!(key = %key, window_end = %record.window_end, "Opened new window");
                        return Ok(Decision::admitted(max, max - 1, record.window_end));
                    }
                    // Another caller opened the window first; count against it.
                }
            }
        }

        Err(StoreError::Contention(key.to_string()))
    }

    /// Delete up to `batch_size` expired records.
    ///
    /// Returns how many records were removed. Expired records are already
    /// ignored by [`admit`](Self::admit), so this only reclaims space.
    pub async fn cleanup(&self, batch_size: usize) -> Result<usize, StoreError> {
        self.cleanup_at(batch_size, Utc::now()).await
    }

    /// Run [`cleanup`](Self::cleanup) as if the current time were `now`.
    pub async fn cleanup_at(&self, batch_size: usize, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let keys = self.call(self.store.expired_keys(now, batch_size)).await?;
        let mut removed = 0;

        for key in &keys {
            if self.call(self.store.delete_expired(key, now)).await? {
                removed += 1;
            }
        }

        if removed > 0 {
            info!(removed = removed, scanned = keys.len(), "Swept expired rate limit windows");
        }
        Ok(removed)
    }

    /// Apply the store deadline to a single store call.
    async fn call<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(
                u64::try_from(self.store_timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}
