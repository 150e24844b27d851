//! Running real child processes through `sh`.

#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use sweep_core::{
    CancelToken, CommandRunner, DispatchConfig, Dispatcher, ExecutionError, InvalidReason, Job,
    JobResult, MarkerProbe, ParamValue, ParameterAxis, ParameterSpace, ProbeOutcome,
    ProcessRunner, ResultProbe, RunContext,
};
use tempfile::TempDir;

fn sh(script: &str, space: &ParameterSpace) -> CommandRunner {
    CommandRunner::new("sh", &["-c".to_string(), script.to_string()], space.axis_names())
        .unwrap()
        .poll_interval(Duration::from_millis(5))
}

fn seeds(count: i64) -> ParameterSpace {
    ParameterSpace::new(vec![
        ParameterAxis::from_range("seed", 1, count + 1, 1).unwrap(),
        ParameterAxis::new("rate", vec![ParamValue::Float(0.5)]),
    ])
    .unwrap()
}

fn context(dir: &TempDir) -> RunContext {
    RunContext {
        output_dir: dir.path().to_path_buf(),
        cancel: CancelToken::new(),
    }
}

#[test]
fn captures_stdout_and_stderr_into_one_file() {
    let dir = TempDir::new().unwrap();
    let space = seeds(1);
    let job = &space.jobs()[0];
    let runner = sh("echo seed={seed}; echo rate={rate} >&2", &space);

    let result = runner.run(job, &context(&dir));
    let output = dir.path().join("1_0.5.txt");
    assert_eq!(
        result,
        JobResult::Completed {
            exit_code: 0,
            output: output.clone(),
        }
    );
    let captured = fs::read_to_string(&output).unwrap();
    assert!(captured.contains("seed=1"));
    assert!(captured.contains("rate=0.5"));
}

#[test]
fn capture_file_is_truncated_on_rerun() {
    let dir = TempDir::new().unwrap();
    let space = seeds(1);
    let job = &space.jobs()[0];
    let output = dir.path().join("1_0.5.txt");
    fs::write(&output, "stale output from an earlier attempt\n").unwrap();

    let result = sh("echo fresh", &space).run(job, &context(&dir));
    assert!(result.is_completed());
    assert_eq!(fs::read_to_string(&output).unwrap(), "fresh\n");
}

#[test]
fn non_zero_exit_is_a_failure() {
    let dir = TempDir::new().unwrap();
    let space = seeds(1);
    let result = sh("echo partial; exit 3", &space).run(&space.jobs()[0], &context(&dir));
    match result {
        JobResult::Failed(ExecutionError::NonZeroExit { code, output }) => {
            assert_eq!(code, Some(3));
            assert_eq!(fs::read_to_string(output).unwrap(), "partial\n");
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn missing_program_is_a_spawn_failure() {
    let dir = TempDir::new().unwrap();
    let space = seeds(1);
    let runner =
        CommandRunner::new("/nonexistent/simulator", &[], space.axis_names()).unwrap();
    let result = runner.run(&space.jobs()[0], &context(&dir));
    assert!(matches!(
        result,
        JobResult::Failed(ExecutionError::Spawn(_))
    ));
}

#[test]
fn unwritable_output_is_a_capture_failure() {
    let dir = TempDir::new().unwrap();
    let space = seeds(1);
    let ctx = RunContext {
        output_dir: dir.path().join("missing"),
        cancel: CancelToken::new(),
    };
    let result = sh("true", &space).run(&space.jobs()[0], &ctx);
    assert!(matches!(
        result,
        JobResult::Failed(ExecutionError::Capture(_))
    ));
}

#[test]
fn cancellation_kills_running_child() {
    let dir = TempDir::new().unwrap();
    let space = seeds(1);
    let runner = sh("sleep 30", &space);
    let ctx = context(&dir);

    let cancel = ctx.cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        cancel.cancel();
    });
    let start = Instant::now();
    let result = runner.run(&space.jobs()[0], &ctx);
    canceller.join().unwrap();

    assert!(result.is_cancelled());
    assert!(start.elapsed() < Duration::from_secs(10));
}

#[test]
fn working_dir_and_env_are_applied() {
    let dir = TempDir::new().unwrap();
    let work = TempDir::new().unwrap();
    let space = seeds(1);
    let runner = sh("pwd; echo \"label=$SWEEP_LABEL\"", &space)
        .working_dir(work.path())
        .env("SWEEP_LABEL", "coalescence");
    assert!(runner.run(&space.jobs()[0], &context(&dir)).is_completed());

    let captured = fs::read_to_string(dir.path().join("1_0.5.txt")).unwrap();
    let work_dir = fs::canonicalize(work.path()).unwrap();
    assert!(captured.contains(work_dir.to_str().unwrap()));
    assert!(captured.contains("label=coalescence"));
}

const SIMULATOR: &str =
    "echo \"Simulation resulted with biodiversity of {seed} unique species.\"";

fn dispatch_config(dir: &TempDir) -> DispatchConfig {
    DispatchConfig {
        width: 3,
        seed: 99,
        output_dir: dir.path().to_path_buf(),
        resumable: true,
        shuffle: true,
        in_flight_markers: true,
    }
}

#[test]
fn second_run_resumes_from_captured_results() {
    let dir = TempDir::new().unwrap();
    let space = seeds(6);

    let first = Dispatcher::new(dispatch_config(&dir), sh(SIMULATOR, &space), MarkerProbe::default());
    let summary = first.run(&space).unwrap();
    assert_eq!(summary.completed, 6);
    assert_eq!(summary.skipped, 0);

    let probe = MarkerProbe::default();
    for job in space.jobs() {
        match probe.probe(&job, dir.path()) {
            ProbeOutcome::Valid { summary, .. } => {
                assert_eq!(job.get("seed"), Some(&ParamValue::Int(summary as i64)));
            }
            other => panic!("job {} not resumable: {:?}", job.key(), other),
        }
    }

    // garble one result, the rest is picked up from the first run
    fs::write(dir.path().join("4_0.5.txt"), "Simulation crashed\n").unwrap();
    let second = Dispatcher::new(dispatch_config(&dir), sh(SIMULATOR, &space), MarkerProbe::default());
    let summary = second.run(&space).unwrap();
    assert_eq!(summary.total, 6);
    assert_eq!(summary.skipped, 5);
    assert_eq!(summary.completed, 1);
    let rerun = summary
        .results
        .iter()
        .find(|(_, r)| r.is_completed())
        .map(|(j, _)| j.key().to_string());
    assert_eq!(rerun.as_deref(), Some("4_0.5"));
}

#[test]
fn leftover_in_flight_marker_invalidates_result() {
    let dir = TempDir::new().unwrap();
    let space = seeds(2);
    let jobs = space.jobs();
    fs::write(
        jobs[0].key().output_path(dir.path()),
        "Simulation resulted with biodiversity of 1 unique species.\n",
    )
    .unwrap();
    fs::write(jobs[0].key().in_flight_path(dir.path()), "").unwrap();

    let probe = MarkerProbe::default();
    assert_eq!(
        probe.probe(&jobs[0], dir.path()),
        ProbeOutcome::Invalid(InvalidReason::Interrupted)
    );
    assert_eq!(probe.probe(&jobs[1], dir.path()), ProbeOutcome::Missing);

    // rerunning the job clears the marker
    let dispatcher = Dispatcher::new(dispatch_config(&dir), sh(SIMULATOR, &space), probe);
    let summary = dispatcher.run(&space).unwrap();
    assert_eq!(summary.completed, 2);
    assert!(!jobs[0].key().in_flight_path(dir.path()).exists());
    assert!(dispatcher.probe().probe(&jobs[0], dir.path()).is_valid());
}

#[test]
fn cancelled_dispatch_reports_every_job() {
    let dir = TempDir::new().unwrap();
    let space = seeds(8);
    let mut config = dispatch_config(&dir);
    config.width = 2;
    config.resumable = false;
    let dispatcher = Dispatcher::new(config, sh("sleep 30", &space), no_prior_results);

    let cancel = dispatcher.cancel_token().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(150));
        cancel.cancel();
    });
    let start = Instant::now();
    let summary = dispatcher.run(&space).unwrap();
    canceller.join().unwrap();

    assert!(start.elapsed() < Duration::from_secs(10));
    assert_eq!(summary.results.len(), 8);
    assert_eq!(summary.cancelled, 8);
    assert_eq!(summary.completed, 0);
}

/// Children killed by the same interrupt that cancelled the run.
const INTERRUPTED_SIMULATOR: &str = "sleep 0.1; kill -INT $$; sleep 5";

#[test]
fn child_killed_by_interrupt_counts_as_cancelled() {
    let dir = TempDir::new().unwrap();
    let space = seeds(2);
    let mut config = dispatch_config(&dir);
    config.width = 2;
    config.resumable = false;
    // slow polling lets the child die before the token is seen
    let runner = sh(INTERRUPTED_SIMULATOR, &space).poll_interval(Duration::from_millis(600));
    let dispatcher = Dispatcher::new(config, runner, no_prior_results);

    let cancel = dispatcher.cancel_token().clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        cancel.cancel();
    });
    let summary = dispatcher.run(&space).unwrap();
    canceller.join().unwrap();

    assert!(summary.was_cancelled());
    assert!(summary.cancel_requested);
    assert_eq!(summary.cancelled, 2);
    assert!(summary.results.iter().all(|(_, r)| r.is_cancelled()));
}

#[test]
fn signal_exit_without_cancellation_is_a_failure() {
    let dir = TempDir::new().unwrap();
    let space = seeds(1);
    let result = sh(INTERRUPTED_SIMULATOR, &space).run(&space.jobs()[0], &context(&dir));
    assert!(matches!(
        result,
        JobResult::Failed(ExecutionError::NonZeroExit { code: None, .. })
    ));
}

#[test]
fn cancelled_job_keeps_previous_capture() {
    let dir = TempDir::new().unwrap();
    let space = seeds(1);
    let job = &space.jobs()[0];
    let output = job.key().output_path(dir.path());
    fs::write(&output, "earlier output\n").unwrap();

    let ctx = context(&dir);
    ctx.cancel.cancel();
    let result = sh("echo fresh", &space).run(job, &ctx);
    assert!(result.is_cancelled());
    assert_eq!(fs::read_to_string(&output).unwrap(), "earlier output\n");
}

fn no_prior_results(_: &Job, _: &Path) -> ProbeOutcome {
    ProbeOutcome::Missing
}
