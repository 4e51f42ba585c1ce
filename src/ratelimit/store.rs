//! Durable window store abstraction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::key::StoreKey;
use super::window::WindowRecord;

/// Errors raised by a window store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached or rejected the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The store did not answer within the configured deadline
    #[error("store call timed out after {0}ms")]
    Timeout(u64),
    /// Concurrent writers kept racing past the retry bound
    #[error("store contention on {0}")]
    Contention(String),
}

/// Result of a conditional increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementOutcome {
    /// The count was below the cap and has been incremented; holds the new record.
    Incremented(WindowRecord),
    /// The count had already reached the cap; the record is unchanged.
    AtCapacity(WindowRecord),
    /// No live record exists (absent or expired at `now`).
    Missing,
}

/// Trait for the shared keyed-record store backing the limiter.
///
/// Each method must be atomic with respect to every other call on the same
/// key, across every process sharing the store. The limiter never performs
/// a separate read followed by a write.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Read a record, expired or not.
    async fn get(&self, key: &StoreKey) -> Result<Option<WindowRecord>, StoreError>;

    /// Store `record` if no live record exists for `key` at `now`.
    ///
    /// An expired record counts as absent and is replaced. Returns `false`
    /// if a live record was already present.
    async fn create_if_absent(
        &self,
        key: &StoreKey,
        record: WindowRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Increment `count` only while the record is live at `now` and below `cap`.
    async fn atomic_increment(
        &self,
        key: &StoreKey,
        cap: u64,
        now: DateTime<Utc>,
    ) -> Result<IncrementOutcome, StoreError>;

    /// Remove a record if it is still expired at `now`.
    ///
    /// A record that was replaced by a fresh window after being listed by
    /// [`expired_keys`](Self::expired_keys) is left alone. Returns whether a
    /// record was removed.
    async fn delete_expired(&self, key: &StoreKey, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Range query: up to `limit` keys whose window ended at or before `now`.
    async fn expired_keys(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StoreKey>, StoreError>;
}
