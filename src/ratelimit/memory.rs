//! In-process window store.
//!
//! Backed by a sharded concurrent map. Every operation runs under the shard
//! lock for its key, which gives the per-key atomicity the limiter requires.
//! Suitable for single-node deployments and tests; multi-instance deployments
//! plug a networked [`WindowStore`] into the same limiter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::trace;

use super::key::StoreKey;
use super::store::{IncrementOutcome, StoreError, WindowStore};
use super::window::WindowRecord;

/// A concurrent in-memory [`WindowStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<StoreKey, WindowRecord>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored records, live or expired.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl WindowStore for MemoryStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<WindowRecord>, StoreError> {
        Ok(self.records.get(key).map(|r| *r.value()))
    }

    async fn create_if_absent(
        &self,
        key: &StoreKey,
        record: WindowRecord,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        match self.records.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired(now) {
                    trace!(key = %key, "Replacing expired window");
                    occupied.insert(record);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(record);
                Ok(true)
            }
        }
    }

    async fn atomic_increment(
        &self,
        key: &StoreKey,
        cap: u64,
        now: DateTime<Utc>,
    ) -> Result<IncrementOutcome, StoreError> {
        let Some(mut record) = self.records.get_mut(key) else {
            return Ok(IncrementOutcome::Missing);
        };

        if record.is_expired(now) {
            return Ok(IncrementOutcome::Missing);
        }
        if record.count >= cap {
            return Ok(IncrementOutcome::AtCapacity(*record));
        }

        record.count += 1;
        Ok(IncrementOutcome::Incremented(*record))
    }

    async fn delete_expired(&self, key: &StoreKey, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self
            .records
            .remove_if(key, |_, record| record.is_expired(now))
            .is_some())
    }

    async fn expired_keys(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<StoreKey>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .take(limit)
            .collect())
    }
}
