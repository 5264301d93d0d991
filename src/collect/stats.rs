//! Lock-free run counters, reported once at shutdown.

use std::sync::atomic::{AtomicU64, Ordering};

/// A relaxed atomic counter; values are only read for reporting.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counters accumulated over one collection run.
///
/// Per-worker failures never propagate; they only show up here and as
/// reduced coverage in the output stream.
#[derive(Debug, Default)]
pub struct RunStats {
    pub ticks: Counter,
    pub workers_seen: Counter,
    pub metrics_fetches_ok: Counter,
    pub metrics_fetches_failed: Counter,
    pub stat_fetches_ok: Counter,
    pub stat_fetches_empty: Counter,
    pub families_collected: Counter,
    pub profiles_captured: Counter,
    pub profiles_failed: Counter,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_inc_and_add() {
        let c = Counter::default();
        c.inc();
        c.inc();
        c.add(40);
        assert_eq!(c.get(), 42);
    }

    #[test]
    fn test_run_stats_starts_zeroed() {
        let stats = RunStats::new();
        assert_eq!(stats.ticks.get(), 0);
        assert_eq!(stats.families_collected.get(), 0);
    }
}
