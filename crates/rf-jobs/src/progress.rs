//! Job progress as a function of phase and processed-format count.
//!
//! | Phase | Progress |
//! |---|---|
//! | created | 0 |
//! | A done (pre-processing) | 30 |
//! | B, after each task | `30 + round(60 * processed / total)` |
//! | C (completed) | 100 |

use std::sync::atomic::{AtomicUsize, Ordering};

/// Checkpoint reached when pre-processing ends, whether or not analysis ran.
pub const PHASE_A_CHECKPOINT: u8 = 30;

/// Width of the format-task phase.
pub const PHASE_B_SPAN: u8 = 60;

/// Progress after `processed` of `total` format tasks have finished.
///
/// Rounds half up. `total == 0` yields the end of phase B.
pub fn phase_b_progress(processed: usize, total: usize) -> u8 {
    if total == 0 {
        return PHASE_A_CHECKPOINT + PHASE_B_SPAN;
    }
    let processed = processed.min(total) as u64;
    let total = total as u64;
    let span = PHASE_B_SPAN as u64;
    let step = (2 * span * processed + total) / (2 * total);
    PHASE_A_CHECKPOINT + step as u8
}

/// Counts finished format tasks of one job.
///
/// Tasks are counted with an atomic increment, and the returned progress is
/// computed from the count rather than from per-task deltas, so completion
/// order does not matter.
#[derive(Debug)]
pub struct ProgressTracker {
    total: usize,
    processed: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            processed: AtomicUsize::new(0),
        }
    }

    /// Count one finished task (success or failure) and return the progress
    /// it implies.
    pub fn record(&self) -> u8 {
        let processed = self.processed.fetch_add(1, Ordering::AcqRel) + 1;
        phase_b_progress(processed, self.total)
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Acquire)
    }

    pub fn is_done(&self) -> bool {
        self.processed() >= self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn three_formats() {
        assert_eq!(phase_b_progress(1, 3), 50);
        assert_eq!(phase_b_progress(2, 3), 70);
        assert_eq!(phase_b_progress(3, 3), 90);
    }

    #[test]
    fn half_rounds_up() {
        // 60 * 1 / 8 = 7.5
        assert_eq!(phase_b_progress(1, 8), 38);
        // 60 * 1 / 24 = 2.5
        assert_eq!(phase_b_progress(1, 24), 33);
    }

    #[test]
    fn last_task_always_lands_on_ninety() {
        for total in 1..=50 {
            assert_eq!(phase_b_progress(total, total), 90, "total = {total}");
        }
    }

    #[test]
    fn never_decreases_with_count() {
        for total in 1..=20 {
            let mut last = PHASE_A_CHECKPOINT;
            for processed in 0..=total {
                let p = phase_b_progress(processed, total);
                assert!(p >= last);
                last = p;
            }
        }
    }

    #[test]
    fn zero_total_skips_to_phase_end() {
        assert_eq!(phase_b_progress(0, 0), 90);
    }

    #[test]
    fn concurrent_records_reach_total() {
        let tracker = Arc::new(ProgressTracker::new(64));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = tracker.clone();
                std::thread::spawn(move || {
                    let mut seen = Vec::new();
                    for _ in 0..8 {
                        seen.push(t.record());
                    }
                    seen
                })
            })
            .collect();
        let mut all: Vec<u8> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        assert_eq!(all.len(), 64);
        assert_eq!(*all.last().unwrap(), 90);
        assert!(tracker.is_done());
    }
}
