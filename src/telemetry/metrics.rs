use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub sessions_started: u64,
    pub sessions_ended: u64,
    pub events_enqueued: u64,
    /// Rejected because no session was active.
    pub events_dropped_inactive: u64,
    pub events_persisted: u64,
    pub events_requeued: u64,
    /// Explicit data loss: teardown leftovers, orphaned batches, queue-cap evictions.
    pub events_discarded: u64,
    pub flush_attempts: u64,
    pub flush_failures: u64,
    pub page_visits_written: u64,
    pub page_visit_failures: u64,
}

impl PipelineStats {
    pub fn delivery_ratio(&self) -> f64 {
        if self.events_enqueued == 0 {
            return 1.0;
        }
        self.events_persisted as f64 / self.events_enqueued as f64
    }
}

#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    sessions_started: AtomicU64,
    sessions_ended: AtomicU64,
    events_enqueued: AtomicU64,
    events_dropped_inactive: AtomicU64,
    events_persisted: AtomicU64,
    events_requeued: AtomicU64,
    events_discarded: AtomicU64,
    flush_attempts: AtomicU64,
    flush_failures: AtomicU64,
    page_visits_written: AtomicU64,
    page_visit_failures: AtomicU64,
}

macro_rules! counter {
    ($name:ident) => {
        pub(crate) fn $name(&self, n: u64) {
            self.$name.fetch_add(n, Ordering::Relaxed);
        }
    };
}

impl PipelineCounters {
    counter!(sessions_started);
    counter!(sessions_ended);
    counter!(events_enqueued);
    counter!(events_dropped_inactive);
    counter!(events_persisted);
    counter!(events_requeued);
    counter!(events_discarded);
    counter!(flush_attempts);
    counter!(flush_failures);
    counter!(page_visits_written);
    counter!(page_visit_failures);

    pub(crate) fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_ended: self.sessions_ended.load(Ordering::Relaxed),
            events_enqueued: self.events_enqueued.load(Ordering::Relaxed),
            events_dropped_inactive: self.events_dropped_inactive.load(Ordering::Relaxed),
            events_persisted: self.events_persisted.load(Ordering::Relaxed),
            events_requeued: self.events_requeued.load(Ordering::Relaxed),
            events_discarded: self.events_discarded.load(Ordering::Relaxed),
            flush_attempts: self.flush_attempts.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            page_visits_written: self.page_visits_written.load(Ordering::Relaxed),
            page_visit_failures: self.page_visit_failures.load(Ordering::Relaxed),
        }
    }
}
