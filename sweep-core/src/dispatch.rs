//! Top-level orchestration of a run.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use fnv::FnvHashSet;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::job::{ExecutionError, Job, JobResult, SkipReason};
use crate::pool::WorkerPool;
use crate::probe::{ProbeOutcome, ResultProbe};
use crate::progress::ProgressTracker;
use crate::runner::ProcessRunner;
use crate::shuffle::JobShuffler;
use crate::space::ParameterSpace;

/// Name of the file used to check whether the output directory is writable.
const WRITE_CHECK_FILE_NAME: &str = ".sweep-write-check";

/// Settings of a single run.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of concurrently running jobs
    pub width: usize,
    /// Seed for the submission order shuffle
    pub seed: u64,
    pub output_dir: PathBuf,
    /// Skip jobs with a valid result from a previous run
    pub resumable: bool,
    pub shuffle: bool,
    /// Mark running jobs with files in the output directory
    pub in_flight_markers: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            width: default_width(),
            seed: 0,
            output_dir: PathBuf::from("results"),
            resumable: false,
            shuffle: true,
            in_flight_markers: true,
        }
    }
}

/// Number of available cores, falling back to a single worker.
pub fn default_width() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Jobs of a run, split by whether they will be executed.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Size of the whole parameter space
    pub total: usize,
    /// Jobs to execute, in submission order
    pub submit: Vec<Job>,
    /// Jobs with a valid prior result, along with the result's location
    pub skipped: Vec<(Job, PathBuf)>,
}

/// Final tally of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Subset of `failed` that never ran because of cancellation
    pub cancelled: usize,
    /// Whether the run's cancel token fired before the run finished
    pub cancel_requested: bool,
    /// One entry per job of the parameter space
    pub results: Vec<(Job, JobResult)>,
}

impl RunSummary {
    pub fn new(total: usize, results: Vec<(Job, JobResult)>) -> Self {
        let mut summary = RunSummary {
            total,
            completed: 0,
            skipped: 0,
            failed: 0,
            cancelled: 0,
            cancel_requested: false,
            results: Vec::new(),
        };
        for (_, result) in &results {
            match result {
                JobResult::Completed { .. } => summary.completed += 1,
                JobResult::Skipped { .. } => summary.skipped += 1,
                JobResult::Failed(e) => {
                    summary.failed += 1;
                    if e == &ExecutionError::Cancelled {
                        summary.cancelled += 1;
                    }
                }
            }
        }
        summary.results = results;
        summary
    }

    /// Iterates over failed jobs, cancelled ones included.
    pub fn failures(&self) -> impl Iterator<Item = (&Job, &ExecutionError)> {
        self.results.iter().filter_map(|(job, result)| match result {
            JobResult::Failed(e) => Some((job, e)),
            _ => None,
        })
    }

    /// True if cancellation was requested, even when every job had
    /// already been handed to a worker by then.
    pub fn was_cancelled(&self) -> bool {
        self.cancel_requested || self.cancelled > 0
    }
}

/// Composes a full run: parameter space enumeration, shuffling, optional
/// filtering of jobs with prior results and bounded parallel execution.
pub struct Dispatcher<R, P> {
    config: DispatchConfig,
    runner: R,
    probe: P,
    cancel: CancelToken,
}

impl<R, P> Dispatcher<R, P>
where
    R: ProcessRunner,
    P: ResultProbe,
{
    pub fn new(config: DispatchConfig, runner: R, probe: P) -> Self {
        Dispatcher {
            config,
            runner,
            probe,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token cancelling the run. Clones of it can be handed to signal
    /// handlers.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Works out what a run would do, without executing anything.
    ///
    /// Submission order is the same as the one [`Dispatcher::run`] uses.
    pub fn plan(&self, space: &ParameterSpace) -> Result<Plan> {
        if self.config.width == 0 {
            return Err(Error::InvalidWidth(self.config.width));
        }
        let mut jobs = space.jobs();
        check_unique_keys(&jobs)?;

        if self.config.shuffle {
            let mut shuffler = JobShuffler::new(self.config.seed);
            shuffler.shuffle(&mut jobs);
        }

        let mut plan = Plan {
            total: jobs.len(),
            submit: Vec::with_capacity(jobs.len()),
            skipped: Vec::new(),
        };
        if !self.config.resumable {
            plan.submit = jobs;
            return Ok(plan);
        }
        for job in jobs {
            match self.probe.probe(&job, &self.config.output_dir) {
                ProbeOutcome::Valid { output, summary } => {
                    trace!("job {} has a valid result: {}", job.key(), summary);
                    plan.skipped.push((job, output));
                }
                ProbeOutcome::Missing => plan.submit.push(job),
                ProbeOutcome::Invalid(reason) => {
                    debug!("rerunning job {}, prior result invalid: {:?}", job.key(), reason);
                    plan.submit.push(job);
                }
            }
        }
        Ok(plan)
    }

    /// Executes the run, see [`Dispatcher::run_with_progress`].
    pub fn run(&self, space: &ParameterSpace) -> Result<RunSummary> {
        let progress = ProgressTracker::default();
        self.run_with_progress(space, &progress)
    }

    /// Executes the run, recording every job result with `progress`.
    ///
    /// Blocks until every job of the space has exactly one result. Jobs
    /// skipped because of prior results are counted as done right away,
    /// and the progress total covers the whole space.
    ///
    /// Only configuration problems are reported as errors. Failures of
    /// individual jobs end up in the returned summary.
    pub fn run_with_progress(
        &self,
        space: &ParameterSpace,
        progress: &ProgressTracker,
    ) -> Result<RunSummary> {
        let pool = WorkerPool::new(self.config.width)?
            .with_in_flight_markers(self.config.in_flight_markers);
        let output_dir = prepare_output_dir(&self.config.output_dir)?;
        let plan = self.plan(space)?;
        progress.set_total(plan.total);
        info!(
            "dispatching {} of {} jobs ({} with prior results) to {} workers, output at {}",
            plan.submit.len(),
            plan.total,
            plan.skipped.len(),
            pool.width(),
            output_dir.display()
        );

        let mut results = Vec::with_capacity(plan.total);
        for (job, output) in plan.skipped {
            let result = JobResult::Skipped {
                reason: SkipReason::PriorResult { output },
            };
            progress.record(&result);
            results.push((job, result));
        }
        results.extend(pool.run(
            plan.submit,
            &self.runner,
            &output_dir,
            progress,
            &self.cancel,
        ));

        let mut summary = RunSummary::new(plan.total, results);
        summary.cancel_requested = self.cancel.is_cancelled();
        info!(
            "run finished: {} completed, {} skipped, {} failed",
            summary.completed, summary.skipped, summary.failed
        );
        Ok(summary)
    }
}

fn check_unique_keys(jobs: &[Job]) -> Result<()> {
    let mut keys = FnvHashSet::default();
    for job in jobs {
        if !keys.insert(job.key()) {
            return Err(Error::DuplicateJobKey(job.key().to_string()));
        }
    }
    Ok(())
}

/// Creates the output directory if needed and makes sure files can be
/// written into it.
fn prepare_output_dir(dir: &Path) -> Result<PathBuf> {
    let unwritable = |e: std::io::Error| Error::OutputDirUnwritable {
        path: dir.to_string_lossy().to_string(),
        reason: e.to_string(),
    };
    fs::create_dir_all(dir).map_err(unwritable)?;
    let check = dir.join(WRITE_CHECK_FILE_NAME);
    fs::write(&check, b"").map_err(unwritable)?;
    fs::remove_file(&check).map_err(unwritable)?;
    Ok(dunce::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf()))
}

#[test]
fn output_dir_is_created() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("nested").join("results");
    let prepared = prepare_output_dir(&dir).unwrap();
    assert!(dir.is_dir());
    assert!(!prepared.join(WRITE_CHECK_FILE_NAME).exists());
}

#[test]
fn output_dir_under_a_file_is_unwritable() {
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("not-a-dir");
    fs::write(&file, b"").unwrap();
    assert!(matches!(
        prepare_output_dir(&file.join("results")),
        Err(Error::OutputDirUnwritable { .. })
    ));
}

#[test]
fn summary_counts_cancelled_as_failed() {
    use crate::space::ParameterAxis;

    let space = ParameterSpace::new(vec![ParameterAxis::from_range("seed", 0, 3, 1).unwrap()])
        .unwrap();
    let mut jobs = space.jobs().into_iter();
    let results = vec![
        (
            jobs.next().unwrap(),
            JobResult::Failed(ExecutionError::Cancelled),
        ),
        (
            jobs.next().unwrap(),
            JobResult::Failed(ExecutionError::Spawn("missing".to_string())),
        ),
        (
            jobs.next().unwrap(),
            JobResult::Completed {
                exit_code: 0,
                output: PathBuf::new(),
            },
        ),
    ];
    let summary = RunSummary::new(3, results);
    assert_eq!(summary.failed, 2);
    assert_eq!(summary.cancelled, 1);
    assert_eq!(summary.completed, 1);
    assert!(summary.was_cancelled());
    assert_eq!(summary.failures().count(), 2);
}

#[test]
fn cancel_request_is_reported_without_cancelled_jobs() {
    use crate::space::ParameterAxis;

    let space = ParameterSpace::new(vec![ParameterAxis::from_range("seed", 0, 1, 1).unwrap()])
        .unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let config = DispatchConfig {
        width: 1,
        output_dir: tmp.path().to_path_buf(),
        in_flight_markers: false,
        ..DispatchConfig::default()
    };
    // the only job is already running when the token fires, and fails
    let runner = |job: &Job, ctx: &crate::runner::RunContext| {
        ctx.cancel.cancel();
        JobResult::Failed(ExecutionError::NonZeroExit {
            code: None,
            output: job.key().output_path(&ctx.output_dir),
        })
    };
    let probe = |_: &Job, _: &Path| ProbeOutcome::Missing;
    let summary = Dispatcher::new(config, runner, probe).run(&space).unwrap();
    assert_eq!(summary.cancelled, 0);
    assert_eq!(summary.failed, 1);
    assert!(summary.cancel_requested);
    assert!(summary.was_cancelled());
}
