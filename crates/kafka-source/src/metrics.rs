//! Telemetry for a single partition consumer

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Counters and gauges for one partition consumer.
///
/// Updates are fire-and-forget; readers take a [`MetricsSnapshot`].
#[derive(Debug, Default)]
pub struct PartitionMetrics {
    lag_ms: AtomicI64,
    read_offset: AtomicI64,
    commit_offset: AtomicI64,
    backlog: AtomicI64,
    messages_in: AtomicU64,
    started: AtomicU64,
    stopped: AtomicU64,
    capacity_exceeded: AtomicU64,
    dead_lettered: AtomicU64,
}

/// Point-in-time copy of [`PartitionMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub lag_ms: i64,
    pub read_offset: i64,
    pub commit_offset: i64,
    pub backlog: i64,
    pub messages_in: u64,
    pub started: u64,
    pub stopped: u64,
    pub capacity_exceeded: u64,
    pub dead_lettered: u64,
}

impl PartitionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self, offset: i64, lag: Duration) {
        let lag_ms = i64::try_from(lag.as_millis()).unwrap_or(i64::MAX);
        self.lag_ms.store(lag_ms, Ordering::Relaxed);
        self.read_offset.store(offset, Ordering::Relaxed);
        self.messages_in.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a checkpoint and the resulting backlog against the high water mark.
    pub fn record_commit(&self, offset: i64, high_water_mark: i64) {
        self.commit_offset.store(offset, Ordering::Relaxed);
        self.backlog
            .store((high_water_mark - offset).max(0), Ordering::Relaxed);
    }

    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stopped(&self) {
        self.stopped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capacity_exceeded(&self) {
        self.capacity_exceeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            lag_ms: self.lag_ms.load(Ordering::Relaxed),
            read_offset: self.read_offset.load(Ordering::Relaxed),
            commit_offset: self.commit_offset.load(Ordering::Relaxed),
            backlog: self.backlog.load(Ordering::Relaxed),
            messages_in: self.messages_in.load(Ordering::Relaxed),
            started: self.started.load(Ordering::Relaxed),
            stopped: self.stopped.load(Ordering::Relaxed),
            capacity_exceeded: self.capacity_exceeded.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
        }
    }
}
