//! Dispatcher behavior with mock collaborators.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use sweep_core::{
    DispatchConfig, Dispatcher, ExecutionError, InvalidReason, Job, JobKey, JobResult,
    ParamValue, ParameterAxis, ParameterSpace, ProbeOutcome, ProcessRunner, ProgressTracker,
    ResultProbe, RunContext,
};
use simplelog::{Config, LevelFilter, TestLogger};
use tempfile::TempDir;

/// Runner recording every invocation and failing the configured keys.
#[derive(Default)]
struct SpyRunner {
    calls: AtomicUsize,
    seen: Mutex<HashMap<JobKey, usize>>,
    fail: Vec<String>,
}

impl SpyRunner {
    fn failing(keys: &[&str]) -> Self {
        SpyRunner {
            fail: keys.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn ran(&self, key: &str) -> bool {
        self.seen
            .lock()
            .unwrap()
            .keys()
            .any(|k| k.as_str() == key)
    }
}

impl ProcessRunner for SpyRunner {
    fn run(&self, job: &Job, ctx: &RunContext) -> JobResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self
            .seen
            .lock()
            .unwrap()
            .entry(job.key().clone())
            .or_insert(0) += 1;
        let output = job.key().output_path(&ctx.output_dir);
        if self.fail.iter().any(|k| k == job.key().as_str()) {
            JobResult::Failed(ExecutionError::NonZeroExit {
                code: Some(1),
                output,
            })
        } else {
            JobResult::Completed {
                exit_code: 0,
                output,
            }
        }
    }
}

fn scenario_space() -> ParameterSpace {
    ParameterSpace::new(vec![
        ParameterAxis::new("seed", vec![ParamValue::Int(1), ParamValue::Int(2)]),
        ParameterAxis::new("rate", vec![ParamValue::Float(0.1)]),
        ParameterAxis::new("algo", vec![ParamValue::from("a"), ParamValue::from("b")]),
    ])
    .unwrap()
}

fn config(dir: &TempDir, width: usize, resumable: bool) -> DispatchConfig {
    DispatchConfig {
        width,
        seed: 1234,
        output_dir: dir.path().to_path_buf(),
        resumable,
        shuffle: true,
        in_flight_markers: true,
    }
}

fn init_logging() {
    let _ = TestLogger::init(LevelFilter::Debug, Config::default());
}

fn no_prior_results(_: &Job, _: &Path) -> ProbeOutcome {
    ProbeOutcome::Missing
}

fn planned_keys<R: ProcessRunner, P: ResultProbe>(
    dispatcher: &Dispatcher<R, P>,
    space: &ParameterSpace,
) -> Vec<JobKey> {
    dispatcher
        .plan(space)
        .unwrap()
        .submit
        .iter()
        .map(|j| j.key().clone())
        .collect()
}

#[test]
fn all_jobs_complete() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(config(&dir, 2, false), SpyRunner::default(), no_prior_results);
    let summary = dispatcher.run(&scenario_space()).unwrap();

    assert_eq!(summary.total, 4);
    assert_eq!(summary.completed, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.results.len(), 4);
    assert_eq!(dispatcher.runner().calls(), 4);
    for key in &["1_0.1_a", "1_0.1_b", "2_0.1_a", "2_0.1_b"] {
        assert!(dispatcher.runner().ran(key), "job {} never ran", key);
    }
    // in-flight markers are cleaned up after every job
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "running").unwrap_or(false))
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn resumable_skips_jobs_with_valid_results() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let probe = |job: &Job, output_dir: &Path| {
        if job.key().as_str() == "1_0.1_a" {
            ProbeOutcome::Valid {
                output: job.key().output_path(output_dir),
                summary: 42.0,
            }
        } else {
            ProbeOutcome::Invalid(InvalidReason::MarkerNotFound)
        }
    };
    let dispatcher = Dispatcher::new(config(&dir, 2, true), SpyRunner::default(), probe);
    let progress = ProgressTracker::default();
    let summary = dispatcher
        .run_with_progress(&scenario_space(), &progress)
        .unwrap();

    assert_eq!(dispatcher.runner().calls(), 3);
    assert!(!dispatcher.runner().ran("1_0.1_a"));
    assert_eq!(summary.total, 4);
    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.completed, 3);
    let snapshot = progress.snapshot();
    assert_eq!(snapshot.total, 4);
    assert_eq!(snapshot.skipped, 1);
    assert_eq!(snapshot.done(), 4);
}

#[test]
fn probe_is_ignored_when_not_resumable() {
    let dir = TempDir::new().unwrap();
    let probe_calls = AtomicUsize::new(0);
    let probe = |job: &Job, output_dir: &Path| {
        probe_calls.fetch_add(1, Ordering::SeqCst);
        ProbeOutcome::Valid {
            output: job.key().output_path(output_dir),
            summary: 1.0,
        }
    };
    let dispatcher = Dispatcher::new(config(&dir, 3, false), SpyRunner::default(), probe);
    let summary = dispatcher.run(&scenario_space()).unwrap();
    assert_eq!(summary.completed, 4);
    assert_eq!(dispatcher.runner().calls(), 4);
    assert_eq!(probe_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn failed_job_does_not_stop_the_run() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(
        config(&dir, 2, false),
        SpyRunner::failing(&["2_0.1_b"]),
        no_prior_results,
    );
    let summary = dispatcher.run(&scenario_space()).unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed, 3);
    assert_eq!(summary.cancelled, 0);
    let failures = summary.failures().collect::<Vec<_>>();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0.key().as_str(), "2_0.1_b");
    assert!(matches!(
        failures[0].1,
        ExecutionError::NonZeroExit { code: Some(1), .. }
    ));
}

#[test]
fn every_job_once_regardless_of_width() {
    let space = ParameterSpace::new(vec![
        ParameterAxis::from_range("seed", 0, 6, 1).unwrap(),
        ParameterAxis::new("algo", vec!["x".into(), "y".into(), "z".into()]),
    ])
    .unwrap();
    let count = space.len();
    for &width in &[1, 2, count, count * 10] {
        let dir = TempDir::new().unwrap();
        let dispatcher =
            Dispatcher::new(config(&dir, width, false), SpyRunner::default(), no_prior_results);
        let summary = dispatcher.run(&space).unwrap();
        assert_eq!(summary.completed, count, "width {}", width);
        assert_eq!(dispatcher.runner().calls(), count);
        let seen = dispatcher.runner().seen.lock().unwrap();
        assert_eq!(seen.len(), count);
        assert!(seen.values().all(|&n| n == 1));
    }
}

#[test]
fn plan_is_reproducible_and_matches_run_order() {
    let dir = TempDir::new().unwrap();
    let space = ParameterSpace::new(vec![ParameterAxis::from_range("seed", 0, 50, 1).unwrap()])
        .unwrap();
    let first = Dispatcher::new(config(&dir, 1, false), SpyRunner::default(), no_prior_results);
    let second = Dispatcher::new(config(&dir, 1, false), SpyRunner::default(), no_prior_results);
    let planned = planned_keys(&first, &space);
    assert_eq!(planned, planned_keys(&second, &space));

    // with a single worker, completion order is submission order
    let summary = first.run(&space).unwrap();
    let ran = summary
        .results
        .iter()
        .map(|(j, _)| j.key().clone())
        .collect::<Vec<_>>();
    assert_eq!(ran, planned);

    let product_order = space
        .jobs()
        .iter()
        .map(|j| j.key().clone())
        .collect::<Vec<_>>();
    assert_ne!(planned, product_order);
}

#[test]
fn empty_space_finishes_immediately() {
    let dir = TempDir::new().unwrap();
    let space = ParameterSpace::new(vec![
        ParameterAxis::new("seed", vec![ParamValue::Int(1)]),
        ParameterAxis::new("rate", vec![]),
    ])
    .unwrap();
    let dispatcher = Dispatcher::new(config(&dir, 4, true), SpyRunner::default(), no_prior_results);
    let summary = dispatcher.run(&space).unwrap();
    assert_eq!(summary.total, 0);
    assert!(summary.results.is_empty());
    assert_eq!(dispatcher.runner().calls(), 0);
}

#[test]
fn invalid_width_is_fatal() {
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(config(&dir, 0, false), SpyRunner::default(), no_prior_results);
    assert!(dispatcher.run(&scenario_space()).is_err());
    assert_eq!(dispatcher.runner().calls(), 0);
}

#[test]
fn cancelled_before_start_runs_nothing() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let dispatcher = Dispatcher::new(config(&dir, 2, false), SpyRunner::default(), no_prior_results);
    dispatcher.cancel_token().cancel();
    let summary = dispatcher.run(&scenario_space()).unwrap();
    assert_eq!(dispatcher.runner().calls(), 0);
    assert_eq!(summary.failed, 4);
    assert_eq!(summary.cancelled, 4);
    assert!(summary.was_cancelled());
}
