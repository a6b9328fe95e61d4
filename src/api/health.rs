//! Shared health state for the /health endpoint.
//! Updated by the pipeline and the output consumer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared health metrics. Updated by screening components, read by API.
#[derive(Default)]
pub struct HealthState {
    /// True while the source loops are running.
    pub pipeline_running: AtomicBool,
    /// Millisecond timestamp of the last queued event (0 = none).
    pub last_queued_at_ms: AtomicU64,
    /// Events pushed onto the output queue and not yet taken by the consumer.
    pub queue_pending: AtomicU64,
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pipeline_running(&self, v: bool) {
        self.pipeline_running.store(v, Ordering::Relaxed);
    }

    pub fn set_last_queued_at_ms(&self, ms: u64) {
        self.last_queued_at_ms.store(ms, Ordering::Relaxed);
    }

    pub fn inc_queue_pending(&self) {
        self.queue_pending.fetch_add(1, Ordering::Relaxed);
    }

    /// Saturates at zero.
    pub fn dec_queue_pending(&self) {
        let _ = self
            .queue_pending
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(1)));
    }

    pub fn pipeline_running(&self) -> bool {
        self.pipeline_running.load(Ordering::Relaxed)
    }

    pub fn last_queued_at_ms(&self) -> Option<u64> {
        match self.last_queued_at_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub fn queue_pending(&self) -> u64 {
        self.queue_pending.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_never_underflows() {
        let h = HealthState::new();
        h.dec_queue_pending();
        assert_eq!(h.queue_pending(), 0);
        h.inc_queue_pending();
        h.inc_queue_pending();
        h.dec_queue_pending();
        assert_eq!(h.queue_pending(), 1);
    }

    #[test]
    fn zero_timestamp_reads_as_none() {
        let h = HealthState::new();
        assert_eq!(h.last_queued_at_ms(), None);
        h.set_last_queued_at_ms(42);
        assert_eq!(h.last_queued_at_ms(), Some(42));
    }
}
