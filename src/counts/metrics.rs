use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::rotation::RotationOutcome;

/// Hooks for observing counts tracker activity.
///
/// Implementations must be cheap; they are called on the update and read
/// paths of the tracker.
pub trait CountsMetrics: Send + Sync {
    /// Records a delta applied to the live overlay.
    fn update_applied(&self);

    /// Records a read.
    ///
    /// # Parameters
    /// * `overlay_hit` - Whether any overlay generation contributed to the value.
    fn count_read(&self, overlay_hit: bool);

    /// Records a read that produced a negative value.
    fn negative_count(&self);

    /// Records the start of a rotation attempt.
    fn rotation_started(&self);

    /// Records the end of a rotation attempt.
    fn rotation_finished(&self, outcome: RotationOutcome, entries_written: u64);
}

/// Discards every event.
#[derive(Default)]
pub struct NoopMetrics;

impl CountsMetrics for NoopMetrics {
    fn update_applied(&self) {}
    fn count_read(&self, _overlay_hit: bool) {}
    fn negative_count(&self) {}
    fn rotation_started(&self) {}
    fn rotation_finished(&self, _outcome: RotationOutcome, _entries_written: u64) {}
}

/// Atomic counters for every [`CountsMetrics`] event.
#[derive(Default)]
pub struct CounterMetrics {
    /// Deltas applied.
    pub updates_applied: AtomicU64,

    /// Reads served.
    pub reads: AtomicU64,

    /// Reads where an overlay generation held the key.
    pub overlay_hits: AtomicU64,

    /// Reads that returned a negative count.
    pub negative_counts: AtomicU64,

    /// Rotation attempts started.
    pub rotations_started: AtomicU64,

    /// Rotations that published a new snapshot.
    pub rotations_succeeded: AtomicU64,

    /// Rotations that failed and kept the previous snapshot.
    pub rotations_failed: AtomicU64,

    /// Entries written across successful rotations.
    pub entries_written: AtomicU64,
}

impl CountsMetrics for CounterMetrics {
    fn update_applied(&self) {
        self.updates_applied.fetch_add(1, Ordering::Relaxed);
    }

    fn count_read(&self, overlay_hit: bool) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        if overlay_hit {
            self.overlay_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn negative_count(&self) {
        self.negative_counts.fetch_add(1, Ordering::Relaxed);
    }

    fn rotation_started(&self) {
        self.rotations_started.fetch_add(1, Ordering::Relaxed);
    }

    fn rotation_finished(&self, outcome: RotationOutcome, entries_written: u64) {
        match outcome {
            RotationOutcome::Succeeded => {
                self.rotations_succeeded.fetch_add(1, Ordering::Relaxed);
                self.entries_written
                    .fetch_add(entries_written, Ordering::Relaxed);
            }
            RotationOutcome::Failed => {
                self.rotations_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Returns [`NoopMetrics`] behind an [`Arc`].
pub fn default_metrics() -> Arc<dyn CountsMetrics> {
    Arc::new(NoopMetrics)
}
