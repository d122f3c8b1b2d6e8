//! Upload counters

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics handle for recording upload counters
#[derive(Debug, Default)]
pub struct Metrics {
    transfers_started: AtomicU64,
    uploads_succeeded: AtomicU64,
    transfers_failed: AtomicU64,
    uploads_cancelled: AtomicU64,
    uploads_abandoned: AtomicU64,
    cycles_completed: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transfer_started(&self) {
        self.transfers_started.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "transfers_started", "Metric incremented");
    }

    pub fn upload_succeeded(&self) {
        self.uploads_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "uploads_succeeded", "Metric incremented");
    }

    pub fn transfer_failed(&self) {
        self.transfers_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "transfers_failed", "Metric incremented");
    }

    pub fn upload_cancelled(&self) {
        self.uploads_cancelled.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "uploads_cancelled", "Metric incremented");
    }

    pub fn upload_abandoned(&self) {
        self.uploads_abandoned.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "uploads_abandoned", "Metric incremented");
    }

    pub fn cycle_completed(&self) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "cycles_completed", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            transfers_started: self.transfers_started.load(Ordering::Relaxed),
            uploads_succeeded: self.uploads_succeeded.load(Ordering::Relaxed),
            transfers_failed: self.transfers_failed.load(Ordering::Relaxed),
            uploads_cancelled: self.uploads_cancelled.load(Ordering::Relaxed),
            uploads_abandoned: self.uploads_abandoned.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub transfers_started: u64,
    pub uploads_succeeded: u64,
    pub transfers_failed: u64,
    pub uploads_cancelled: u64,
    pub uploads_abandoned: u64,
    pub cycles_completed: u64,
}
