use crate::utils::time::current_timestamp;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Counters across all passes of this process
pub struct Metrics {
    pub passes: AtomicU64,
    pub failed_passes: AtomicU64,
    pub decisions: AtomicU64,
    pub admissions: AtomicU64,
    pub evictions: AtomicU64,
    pub partial_selections: AtomicU64,
    pub transport_errors: AtomicU64,
    pub last_free_space: AtomicI64,
    pub last_pass_at: AtomicI64,
    pub start_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub passes: u64,
    pub failed_passes: u64,
    pub decisions: u64,
    pub admissions: u64,
    pub evictions: u64,
    pub partial_selections: u64,
    pub transport_errors: u64,
    /// Free space in bytes after the last pass, negative when overcommitted
    pub last_free_space: i64,
    /// Unix seconds, 0 before the first pass
    pub last_pass_at: i64,
    pub uptime_seconds: i64,
    pub evictions_per_pass: f64,
}

/// Totals of one pass, added to [`Metrics`] when the pass ends
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassTotals {
    pub decisions: u64,
    pub admissions: u64,
    pub evictions: u64,
    pub partial_selections: u64,
    pub transport_errors: u64,
    pub free_space: i64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            passes: AtomicU64::new(0),
            failed_passes: AtomicU64::new(0),
            decisions: AtomicU64::new(0),
            admissions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            partial_selections: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            last_free_space: AtomicI64::new(0),
            last_pass_at: AtomicI64::new(0),
            start_time: current_timestamp(),
        }
    }

    pub fn record_pass(&self, totals: PassTotals, now: i64) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.decisions.fetch_add(totals.decisions, Ordering::Relaxed);
        self.admissions.fetch_add(totals.admissions, Ordering::Relaxed);
        self.evictions.fetch_add(totals.evictions, Ordering::Relaxed);
        self.partial_selections
            .fetch_add(totals.partial_selections, Ordering::Relaxed);
        self.transport_errors
            .fetch_add(totals.transport_errors, Ordering::Relaxed);
        self.last_free_space.store(totals.free_space, Ordering::Relaxed);
        self.last_pass_at.store(now, Ordering::Relaxed);
    }

    /// A pass that could not fetch the torrent list
    pub fn record_failed_pass(&self, now: i64) {
        self.failed_passes.fetch_add(1, Ordering::Relaxed);
        self.transport_errors.fetch_add(1, Ordering::Relaxed);
        self.last_pass_at.store(now, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        let passes = self.passes.load(Ordering::Relaxed);
        let evictions = self.evictions.load(Ordering::Relaxed);

        let evictions_per_pass = if passes > 0 {
            evictions as f64 / passes as f64
        } else {
            0.0
        };

        MetricsSnapshot {
            passes,
            failed_passes: self.failed_passes.load(Ordering::Relaxed),
            decisions: self.decisions.load(Ordering::Relaxed),
            admissions: self.admissions.load(Ordering::Relaxed),
            evictions,
            partial_selections: self.partial_selections.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            last_free_space: self.last_free_space.load(Ordering::Relaxed),
            last_pass_at: self.last_pass_at.load(Ordering::Relaxed),
            uptime_seconds: current_timestamp() - self.start_time,
            evictions_per_pass,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
