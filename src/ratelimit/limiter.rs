//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::key::BucketKey;
use super::store::{ExpiringCounterStore, QuotaStore, StoreError};
use super::window::{RateSpec, TimeUnit};
use crate::clock::Clock;
use crate::config::{RateLimitingConfig, StoreConfig};

/// The outcome of a single rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDecision {
    /// The bucket this request was counted against
    pub key: BucketKey,
    /// Requests allowed per window
    pub quota: u64,
    /// Requests seen in this window, including this one
    pub used: u64,
    /// `quota - used`; negative once the caller has overshot
    pub remaining: i64,
    /// Start of the next window, in epoch milliseconds
    pub reset_at_ms: u64,
    pub exceeded: bool,
    /// When the caller may retry; only set when exceeded
    pub wait_until_ms: Option<u64>,
    /// How long the caller should wait; only set when exceeded
    pub wait_ms: Option<u64>,
}

/// The three per-granularity counter stores.
#[derive(Clone)]
pub struct QuotaStores {
    pub second: Arc<dyn QuotaStore>,
    pub minute: Arc<dyn QuotaStore>,
    pub hour: Arc<dyn QuotaStore>,
}

impl QuotaStores {
    /// Build in-memory stores sized by configuration.
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        let build = |name: &'static str, settings: &StoreConfig| {
            Arc::new(ExpiringCounterStore::new(
                name,
                settings.capacity,
                Duration::from_secs(settings.ttl_secs),
            )) as Arc<dyn QuotaStore>
        };

        Self {
            second: build("second", &config.second),
            minute: build("minute", &config.minute),
            hour: build("hour", &config.hour),
        }
    }

    /// The store that holds counters of the given granularity.
    pub fn for_unit(&self, unit: TimeUnit) -> &Arc<dyn QuotaStore> {
        match unit {
            TimeUnit::Second => &self.second,
            TimeUnit::Minute => &self.minute,
            TimeUnit::Hour => &self.hour,
        }
    }

    /// Purge expired entries from every store.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        [&self.second, &self.minute, &self.hour]
            .iter()
            .map(|store| store.purge_expired(now_ms))
            .sum()
    }
}

impl Default for QuotaStores {
    fn default() -> Self {
        Self::from_config(&RateLimitingConfig::default())
    }
}

/// The core rate limiter: fixed-window counting over the quota stores.
///
/// This struct is thread-safe and can be shared across multiple tasks.
#[derive(Clone, Default)]
pub struct RateLimiter {
    stores: QuotaStores,
}

impl RateLimiter {
    /// Create a new rate limiter with default store settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a rate limiter over the given stores.
    pub fn with_stores(stores: QuotaStores) -> Self {
        Self { stores }
    }

    pub fn stores(&self) -> &QuotaStores {
        &self.stores
    }

    /// Periodically drop expired counters from every store.
    ///
    /// Expired counters are already ignored on access; sweeping only keeps
    /// idle buckets from holding memory until capacity pressure evicts them.
    pub fn spawn_expiry_sweeper(&self, clock: Arc<dyn Clock>, period: Duration) -> JoinHandle<()> {
        let stores = self.stores.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let purged = stores.purge_expired(clock.now_millis());
                if purged > 0 {
                    trace!(purged = purged, "Swept expired counters");
                }
            }
        })
    }

    /// Count one request against `(path, group)` and decide whether it fits the quota.
    pub fn check(
        &self,
        path: &str,
        group: &str,
        spec: RateSpec,
        now_ms: u64,
    ) -> Result<QuotaDecision, StoreError> {
        let window = spec.resolve(now_ms);
        let key = BucketKey::new(window.window_index, path, group);

        trace!(key = %key, spec = %spec, "Checking rate limit");

        let used = self.stores.for_unit(spec.unit).increment_and_get(&key, now_ms)?;
        let exceeded = used > spec.quota;
        let remaining = i64::try_from(spec.quota)
            .unwrap_or(i64::MAX)
            .saturating_sub(i64::try_from(used).unwrap_or(i64::MAX));

        let (wait_until_ms, wait_ms) = if exceeded {
            (Some(window.reset_at_ms), Some(window.reset_at_ms - now_ms))
        } else {
            (None, None)
        };

        debug!(
            key = %key,
            quota = spec.quota,
            used = used,
            exceeded = exceeded,
            "Rate limit decision made"
        );

        Ok(QuotaDecision {
            key,
            quota: spec.quota,
            used,
            remaining,
            reset_at_ms: window.reset_at_ms,
            exceeded,
            wait_until_ms,
            wait_ms,
        })
    }
}
