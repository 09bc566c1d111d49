use std::collections::BTreeMap;
use std::sync::Mutex;

pub const LAUNCHES: &str = "launches";
pub const DECISIONS: &str = "decisions";
pub const DECISIONS_STALE: &str = "decisions_stale";
pub const REVISIONS: &str = "revisions";
pub const STOPS: &str = "stops";
pub const SLACK_INTERACTIONS: &str = "slack_interactions";
pub const POLL_TICKS: &str = "poll_ticks";
pub const POLL_FAILURES: &str = "poll_failures";

/// Named request counters shared by the HTTP handlers and the poller.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, amount: u64) {
        let mut counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        *counters.entry(name.to_string()).or_insert(0) += amount;
    }

    #[cfg(test)]
    pub fn get(&self, name: &str) -> u64 {
        let counters = self.counters.lock().unwrap_or_else(|e| e.into_inner());
        counters.get(name).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
