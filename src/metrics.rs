//! Request counters.

use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde_json::Value;

/// Counter incremented for every rate-limited request.
pub const REQUESTS_TOTAL: &str = "req.total";
/// Counter incremented for every request rejected over quota.
pub const REQUESTS_EXCEEDED: &str = "req.exceeded";

/// Sink for named monotonic counters.
pub trait MetricsSink: Send + Sync {
    fn increment(&self, name: &str);
}

/// Counters held in process memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    counters: RwLock<BTreeMap<String, u64>>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        let metrics = Self::default();
        {
            let mut counters = metrics.counters.write();
            counters.insert(REQUESTS_TOTAL.to_string(), 0);
            counters.insert(REQUESTS_EXCEEDED.to_string(), 0);
        }
        metrics
    }

    /// Current value of a counter, zero if never incremented.
    pub fn get(&self, name: &str) -> u64 {
        self.counters.read().get(name).copied().unwrap_or(0)
    }

    /// All counters as a JSON object.
    pub fn snapshot(&self) -> Value {
        let counters = self.counters.read();
        Value::Object(
            counters
                .iter()
                .map(|(name, value)| (name.clone(), Value::from(*value)))
                .collect(),
        )
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, name: &str) {
        let mut counters = self.counters.write();
        *counters.entry(name.to_string()).or_insert(0) += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_counters_start_at_zero() {
        let metrics = InMemoryMetrics::new();
        assert_eq!(metrics.get(REQUESTS_TOTAL), 0);
        assert_eq!(metrics.snapshot(), json!({"req.exceeded": 0, "req.total": 0}));
    }

    #[test]
    fn test_increment() {
        let metrics = InMemoryMetrics::new();
        metrics.increment(REQUESTS_TOTAL);
        metrics.increment(REQUESTS_TOTAL);
        metrics.increment(REQUESTS_EXCEEDED);

        assert_eq!(metrics.get(REQUESTS_TOTAL), 2);
        assert_eq!(metrics.get(REQUESTS_EXCEEDED), 1);
        assert_eq!(metrics.get("unknown"), 0);
    }
}
