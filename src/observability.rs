use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{info, warn};

/// Process-wide counters for the coordinator
#[derive(Debug, Default)]
pub struct FlowMetrics {
    pub inputs_accepted: AtomicU64,
    pub inputs_rejected: AtomicU64,
    pub inputs_duplicate: AtomicU64,
    pub dispatches_succeeded: AtomicU64,
    pub dispatches_failed: AtomicU64,
    pub dispatches_replayed: AtomicU64,
    pub timeouts_fired: AtomicU64,
    pub timeouts_discarded: AtomicU64,
    pub store_degradations: AtomicU64,
    pub approvals_resolved: AtomicU64,
    pub approvals_lost: AtomicU64,
}

impl FlowMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        self.inputs_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.inputs_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_duplicate(&self) {
        self.inputs_duplicate.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_success(&self) {
        self.dispatches_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_failure(&self) {
        self.dispatches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatch_replay(&self) {
        self.dispatches_replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout_fired(&self) {
        self.timeouts_fired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout_discarded(&self) {
        self.timeouts_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store_degradation(&self) {
        self.store_degradations.fetch_add(1, Ordering::Relaxed);
        warn!("session store degraded to volatile fallback");
    }

    pub fn record_approval_resolved(&self) {
        self.approvals_resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_approval_lost(&self) {
        self.approvals_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> FlowStats {
        FlowStats {
            inputs_accepted: self.inputs_accepted.load(Ordering::Relaxed),
            inputs_rejected: self.inputs_rejected.load(Ordering::Relaxed),
            inputs_duplicate: self.inputs_duplicate.load(Ordering::Relaxed),
            dispatches_succeeded: self.dispatches_succeeded.load(Ordering::Relaxed),
            dispatches_failed: self.dispatches_failed.load(Ordering::Relaxed),
            dispatches_replayed: self.dispatches_replayed.load(Ordering::Relaxed),
            timeouts_fired: self.timeouts_fired.load(Ordering::Relaxed),
            timeouts_discarded: self.timeouts_discarded.load(Ordering::Relaxed),
            store_degradations: self.store_degradations.load(Ordering::Relaxed),
            approvals_resolved: self.approvals_resolved.load(Ordering::Relaxed),
            approvals_lost: self.approvals_lost.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            inputs_accepted = stats.inputs_accepted,
            inputs_rejected = stats.inputs_rejected,
            inputs_duplicate = stats.inputs_duplicate,
            dispatches_succeeded = stats.dispatches_succeeded,
            dispatches_failed = stats.dispatches_failed,
            dispatches_replayed = stats.dispatches_replayed,
            timeouts_fired = stats.timeouts_fired,
            timeouts_discarded = stats.timeouts_discarded,
            store_degradations = stats.store_degradations,
            approvals_resolved = stats.approvals_resolved,
            approvals_lost = stats.approvals_lost,
            "fieldflow metrics"
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStats {
    pub inputs_accepted: u64,
    pub inputs_rejected: u64,
    pub inputs_duplicate: u64,
    pub dispatches_succeeded: u64,
    pub dispatches_failed: u64,
    pub dispatches_replayed: u64,
    pub timeouts_fired: u64,
    pub timeouts_discarded: u64,
    pub store_degradations: u64,
    pub approvals_resolved: u64,
    pub approvals_lost: u64,
}

/// Global metrics instance
static FLOW_METRICS: std::sync::LazyLock<FlowMetrics> = std::sync::LazyLock::new(FlowMetrics::new);

pub fn flow_metrics() -> &'static FlowMetrics {
    &FLOW_METRICS
}

/// Time an operation and log its duration on finish
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        tracing::debug!(
            operation = self.operation,
            duration_ms = duration.as_millis() as u64,
            "operation completed"
        );
    }
}
