//! Bounded-concurrency job execution.

use std::any::Any;
use std::fs;
use std::io::Write;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::job::{ExecutionError, Job, JobResult};
use crate::progress::ProgressTracker;
use crate::runner::{ProcessRunner, RunContext};

/// Fixed-width pool of worker threads sharing a single job queue.
///
/// Each worker repeatedly takes the next job off the queue, runs it to
/// completion and records the result. The queue hands every job to exactly
/// one worker. Jobs are offered in submission order, completion order is
/// unconstrained.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    width: usize,
    in_flight_markers: bool,
}

impl WorkerPool {
    pub fn new(width: usize) -> Result<Self> {
        if width == 0 {
            return Err(Error::InvalidWidth(width));
        }
        Ok(WorkerPool {
            width,
            in_flight_markers: false,
        })
    }

    /// Enables creating `<key>.running` files in the output directory while
    /// jobs are being processed.
    pub fn with_in_flight_markers(mut self, enabled: bool) -> Self {
        self.in_flight_markers = enabled;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Runs all the jobs, blocking until every one of them has a result.
    ///
    /// Returns one `(job, result)` pair per submitted job, in completion
    /// order. Once `cancel` fires, no new processes are started and the jobs
    /// still queued resolve to [`ExecutionError::Cancelled`].
    pub fn run<R>(
        &self,
        jobs: Vec<Job>,
        runner: &R,
        output_dir: &Path,
        progress: &ProgressTracker,
        cancel: &CancelToken,
    ) -> Vec<(Job, JobResult)>
    where
        R: ProcessRunner + ?Sized,
    {
        let count = jobs.len();
        if count == 0 {
            return Vec::new();
        }

        let (job_tx, job_rx) = unbounded();
        for job in jobs {
            // receiver is held right here, sending can't fail
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let (result_tx, result_rx) = unbounded();
        let workers = self.width.min(count);
        debug!("starting {} workers for {} jobs", workers, count);

        let ctx = RunContext {
            output_dir: output_dir.to_path_buf(),
            cancel: cancel.clone(),
        };
        thread::scope(|scope| {
            for worker_id in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let ctx = &ctx;
                scope.spawn(move || self.work(worker_id, job_rx, result_tx, runner, ctx, progress));
            }
        });
        drop(result_tx);

        let results = result_rx.iter().collect::<Vec<_>>();
        debug_assert_eq!(results.len(), count);
        results
    }

    fn work<R>(
        &self,
        worker_id: usize,
        jobs: Receiver<Job>,
        results: Sender<(Job, JobResult)>,
        runner: &R,
        ctx: &RunContext,
        progress: &ProgressTracker,
    ) where
        R: ProcessRunner + ?Sized,
    {
        for job in jobs.iter() {
            let result = if ctx.cancel.is_cancelled() {
                JobResult::Failed(ExecutionError::Cancelled)
            } else {
                trace!("worker {} picked up job {}", worker_id, job.key());
                self.execute(&job, runner, ctx)
            };
            match &result {
                JobResult::Failed(ExecutionError::Cancelled) => (),
                JobResult::Failed(e) => warn!("job {} failed: {}", job.key(), e),
                _ => debug!("worker {} finished job {}", worker_id, job.key()),
            }
            progress.record(&result);
            let _ = results.send((job, result));
        }
        trace!("worker {} exiting, queue drained", worker_id);
    }

    fn execute<R>(&self, job: &Job, runner: &R, ctx: &RunContext) -> JobResult
    where
        R: ProcessRunner + ?Sized,
    {
        let _marker = if self.in_flight_markers {
            InFlightMarker::create(job.key().in_flight_path(&ctx.output_dir))
        } else {
            None
        };
        match panic::catch_unwind(AssertUnwindSafe(|| runner.run(job, ctx))) {
            Ok(result) => result,
            Err(payload) => JobResult::Failed(ExecutionError::Panicked(panic_message(&payload))),
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// File marking a job as currently running, removed when dropped.
///
/// A marker that outlives its run means the run was killed before the job
/// finished, whatever the job's output file says.
struct InFlightMarker {
    path: PathBuf,
}

impl InFlightMarker {
    fn create(path: PathBuf) -> Option<Self> {
        let started = chrono::Local::now().to_rfc3339();
        match fs::File::create(&path).and_then(|mut f| writeln!(f, "{}", started)) {
            Ok(()) => Some(InFlightMarker { path }),
            Err(e) => {
                warn!("failed creating in-flight marker {}: {}", path.display(), e);
                None
            }
        }
    }
}

impl Drop for InFlightMarker {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(
                "failed removing in-flight marker {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

#[cfg(test)]
fn test_jobs(count: i64) -> Vec<Job> {
    use crate::space::{ParameterAxis, ParameterSpace};
    use crate::value::ParamValue;

    ParameterSpace::new(vec![ParameterAxis::new(
        "seed",
        (0..count).map(ParamValue::Int).collect(),
    )])
    .unwrap()
    .jobs()
}

#[test]
fn zero_width_is_rejected() {
    assert!(matches!(WorkerPool::new(0), Err(Error::InvalidWidth(0))));
}

#[test]
fn every_job_runs_exactly_once_for_any_width() {
    use std::collections::HashMap;
    use std::sync::Mutex;

    let count = 25;
    for &width in &[1, 2, count as usize, count as usize * 10] {
        let seen = Mutex::new(HashMap::new());
        let runner = |job: &Job, _: &RunContext| {
            *seen.lock().unwrap().entry(job.key().clone()).or_insert(0) += 1;
            JobResult::Completed {
                exit_code: 0,
                output: PathBuf::new(),
            }
        };
        let progress = ProgressTracker::new(count as usize);
        let results = WorkerPool::new(width).unwrap().run(
            test_jobs(count),
            &runner,
            Path::new("."),
            &progress,
            &CancelToken::new(),
        );
        assert_eq!(results.len(), count as usize);
        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), count as usize);
        assert!(seen.values().all(|&n| n == 1));
        assert_eq!(progress.snapshot().completed, count as usize);
    }
}

#[test]
fn panicking_runner_is_recorded_as_failure() {
    let runner = |job: &Job, _: &RunContext| -> JobResult {
        if job.index() == 1 {
            panic!("boom");
        }
        JobResult::Completed {
            exit_code: 0,
            output: PathBuf::new(),
        }
    };
    let progress = ProgressTracker::new(3);
    let results = WorkerPool::new(2).unwrap().run(
        test_jobs(3),
        &runner,
        Path::new("."),
        &progress,
        &CancelToken::new(),
    );
    assert_eq!(results.len(), 3);
    let failed = results
        .iter()
        .filter(|(_, r)| r == &JobResult::Failed(ExecutionError::Panicked("boom".to_string())))
        .count();
    assert_eq!(failed, 1);
    assert_eq!(progress.snapshot().failed, 1);
}

#[test]
fn cancelled_pool_still_reports_every_job() {
    let cancel = CancelToken::new();
    let runner = |_: &Job, ctx: &RunContext| {
        ctx.cancel.cancel();
        JobResult::Failed(ExecutionError::Cancelled)
    };
    let progress = ProgressTracker::new(10);
    let results = WorkerPool::new(1)
        .unwrap()
        .run(test_jobs(10), &runner, Path::new("."), &progress, &cancel);
    assert_eq!(results.len(), 10);
    assert!(results.iter().all(|(_, r)| r.is_cancelled()));
    assert_eq!(progress.snapshot().failed, 10);
}
