//! Expiring counter storage for rate limit buckets.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::trace;

use super::key::BucketKey;

/// Failure of the underlying counter storage.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing storage could not be reached or mutated
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Storage for per-bucket request counters.
///
/// Implementations must make `increment_and_get` atomic per key: concurrent
/// callers for the same key observe a gap-free, duplicate-free sequence.
pub trait QuotaStore: Send + Sync {
    /// Increment the counter for `key`, creating it at zero first if absent,
    /// and return the post-increment value.
    fn increment_and_get(&self, key: &BucketKey, now_ms: u64) -> Result<u64, StoreError>;

    /// Drop entries whose time-to-live has elapsed, returning how many were removed.
    fn purge_expired(&self, _now_ms: u64) -> usize {
        0
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    written_at_ms: u64,
}

impl Slot {
    fn is_expired(&self, now_ms: u64, ttl_ms: u64) -> bool {
        now_ms.saturating_sub(self.written_at_ms) >= ttl_ms
    }
}

/// A bounded, in-memory counter store with write-based expiry.
///
/// Entries expire `ttl` after they were created, regardless of how often they
/// are incremented. When an insertion pushes the store over capacity, expired
/// entries are purged first and then the oldest-written ones are evicted.
pub struct ExpiringCounterStore {
    /// Label used in logs
    name: &'static str,
    slots: DashMap<BucketKey, Slot>,
    /// Keys in write order, oldest first. An entry whose timestamp no longer
    /// matches its slot is stale and skipped when popped.
    order: Mutex<VecDeque<(u64, BucketKey)>>,
    capacity: usize,
    ttl_ms: u64,
}

impl ExpiringCounterStore {
    /// Create a new store holding at most `capacity` live counters.
    pub fn new(name: &'static str, capacity: usize, ttl: Duration) -> Self {
        Self {
            name,
            slots: DashMap::with_capacity(capacity.min(4096)),
            order: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity: capacity.max(1),
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Number of entries currently held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Read a counter without incrementing it.
    ///
    /// Returns `None` if no live counter exists for the key.
    pub fn get(&self, key: &BucketKey, now_ms: u64) -> Option<u64> {
        self.slots
            .get(key)
            .filter(|slot| !slot.is_expired(now_ms, self.ttl_ms))
            .map(|slot| slot.count)
    }

    /// Clear all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.order.lock().clear();
        self.slots.clear();
    }

    /// Remove the slot written at `written_at_ms`, unless it was rewritten since.
    fn remove_written(&self, written_at_ms: u64, key: &BucketKey) -> bool {
        self.slots
            .remove_if(key, |_, slot| slot.written_at_ms == written_at_ms)
            .is_some()
    }

    fn evict_overflow(&self, now_ms: u64) {
        let purged = self.purge_expired(now_ms);

        let mut evicted = 0usize;
        while self.slots.len() > self.capacity {
            // The order lock is never held while touching a shard.
            let Some((written_at_ms, key)) = self.order.lock().pop_front() else {
                break;
            };
            if self.remove_written(written_at_ms, &key) {
                evicted += 1;
            }
        }

        trace!(
            store = self.name,
            purged = purged,
            evicted = evicted,
            "Evicted counters over capacity"
        );
    }
}

impl QuotaStore for ExpiringCounterStore {
    fn increment_and_get(&self, key: &BucketKey, now_ms: u64) -> Result<u64, StoreError> {
        // The entry guard holds the shard write lock for the whole
        // read-modify-write, so creation and increment cannot interleave.
        let (used, written, inserted) = match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let slot = occupied.get_mut();
                let expired = slot.is_expired(now_ms, self.ttl_ms);
                if expired {
                    trace!(store = self.name, key = %key, "Recreating expired counter");
                    *slot = Slot {
                        count: 0,
                        written_at_ms: now_ms,
                    };
                }
                slot.count += 1;
                (slot.count, expired, false)
            }
            Entry::Vacant(vacant) => {
                trace!(store = self.name, key = %key, "Creating new counter");
                vacant.insert(Slot {
                    count: 1,
                    written_at_ms: now_ms,
                });
                (1, true, true)
            }
        };

        if written {
            self.order.lock().push_back((now_ms, key.clone()));
        }

        if inserted && self.slots.len() > self.capacity {
            self.evict_overflow(now_ms);
        }

        Ok(used)
    }

    fn purge_expired(&self, now_ms: u64) -> usize {
        let expired: Vec<(u64, BucketKey)> = {
            let mut order = self.order.lock();
            let mut expired = Vec::new();
            while order
                .front()
                .is_some_and(|(written_at_ms, _)| now_ms.saturating_sub(*written_at_ms) >= self.ttl_ms)
            {
                expired.extend(order.pop_front());
            }
            expired
        };

        expired
            .iter()
            .filter(|(written_at_ms, key)| self.remove_written(*written_at_ms, key))
            .count()
    }
}
