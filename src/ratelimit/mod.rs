//! Rate limiting logic and state management.

mod key;
mod limiter;
mod store;
mod window;

pub use key::{BucketKey, DEFAULT_GROUP};
pub use limiter::{QuotaDecision, QuotaStores, RateLimiter};
pub use store::{ExpiringCounterStore, QuotaStore, StoreError};
pub use window::{RateSpec, TimeUnit, WindowSpec};
