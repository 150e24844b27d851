//! Progress accounting.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use crate::job::JobResult;

/// Counts finished jobs. Safe to update from many workers at once.
///
/// Every job result gets recorded exactly once, into exactly one of the
/// completed, skipped or failed counters.
#[derive(Debug, Default)]
pub struct ProgressTracker {
    total: AtomicUsize,
    completed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
}

/// Point-in-time view of a [`ProgressTracker`].
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl ProgressSnapshot {
    pub fn done(&self) -> usize {
        self.completed + self.skipped + self.failed
    }

    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.done())
    }

    /// Fraction of finished jobs, an empty run counts as finished.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            self.done() as f64 / self.total as f64
        }
    }
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} ({:.1}%)",
            self.done(),
            self.total,
            self.fraction() * 100.0
        )
    }
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        let tracker = ProgressTracker::default();
        tracker.set_total(total);
        tracker
    }

    pub fn set_total(&self, total: usize) {
        self.total.store(total, Ordering::SeqCst);
    }

    pub fn record(&self, result: &JobResult) {
        let counter = match result {
            JobResult::Completed { .. } => &self.completed,
            JobResult::Skipped { .. } => &self.skipped,
            JobResult::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            total: self.total.load(Ordering::SeqCst),
            completed: self.completed.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            failed: self.failed.load(Ordering::SeqCst),
        }
    }

    /// Observes the tracker until `stop` is set, calling `render` every time
    /// the number of finished jobs changes.
    ///
    /// Blocks the calling thread, meant to be run next to the dispatcher.
    /// After `stop` is observed, the final state is rendered once more if it
    /// wasn't rendered already.
    pub fn watch<F>(&self, interval: Duration, stop: &AtomicBool, mut render: F)
    where
        F: FnMut(&ProgressSnapshot),
    {
        let mut last: Option<ProgressSnapshot> = None;
        loop {
            let stopping = stop.load(Ordering::SeqCst);
            let snapshot = self.snapshot();
            if last.map(|l| l != snapshot).unwrap_or(true) {
                render(&snapshot);
                last = Some(snapshot);
            }
            if stopping {
                break;
            }
            thread::sleep(interval);
        }
    }
}

#[test]
fn record_counts_each_result_once() {
    use crate::job::{ExecutionError, SkipReason};
    use std::path::PathBuf;

    let tracker = ProgressTracker::new(3);
    tracker.record(&JobResult::Completed {
        exit_code: 0,
        output: PathBuf::from("a.txt"),
    });
    tracker.record(&JobResult::Skipped {
        reason: SkipReason::PriorResult {
            output: PathBuf::from("b.txt"),
        },
    });
    tracker.record(&JobResult::Failed(ExecutionError::Cancelled));
    let snapshot = tracker.snapshot();
    assert_eq!(
        snapshot,
        ProgressSnapshot {
            total: 3,
            completed: 1,
            skipped: 1,
            failed: 1
        }
    );
    assert_eq!(snapshot.done(), 3);
    assert_eq!(snapshot.remaining(), 0);
    assert_eq!(snapshot.to_string(), "3/3 (100.0%)");
}

#[test]
fn concurrent_records_are_not_lost() {
    use crate::job::ExecutionError;
    use std::sync::Arc;

    let tracker = Arc::new(ProgressTracker::new(8 * 1000));
    let handles = (0..8)
        .map(|n| {
            let tracker = tracker.clone();
            thread::spawn(move || {
                for _ in 0..1000 {
                    if n % 2 == 0 {
                        tracker.record(&JobResult::Failed(ExecutionError::Cancelled));
                    } else {
                        tracker.record(&JobResult::Completed {
                            exit_code: 0,
                            output: Default::default(),
                        });
                    }
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap();
    }
    let snapshot = tracker.snapshot();
    assert_eq!(snapshot.failed, 4000);
    assert_eq!(snapshot.completed, 4000);
    assert_eq!(snapshot.done(), snapshot.total);
}

#[test]
fn watch_renders_final_state() {
    let tracker = ProgressTracker::new(1);
    let stop = AtomicBool::new(true);
    tracker.record(&JobResult::Completed {
        exit_code: 0,
        output: Default::default(),
    });
    let mut rendered = Vec::new();
    tracker.watch(Duration::from_millis(1), &stop, |s| rendered.push(*s));
    assert_eq!(rendered.len(), 1);
    assert_eq!(rendered[0].done(), 1);
}
