//! Application definition.

extern crate simplelog;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use anyhow::{Error, Result};
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use sweep::{Dispatcher, ParameterSpace, ProgressTracker, RunSummary, SweepConfig};

use crate::report;

pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &'static str = env!("CARGO_PKG_AUTHORS");

/// Every job has a result, failures weren't asked to be reported.
pub const EXIT_OK: i32 = 0;
/// Run couldn't be started.
pub const EXIT_FATAL: i32 = 1;
/// Some jobs failed and `fail_on_error` is set.
pub const EXIT_JOBS_FAILED: i32 = 2;
/// Run was cancelled with Ctrl-C.
pub const EXIT_CANCELLED: i32 = 130;

/// How often the progress line is refreshed.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

pub fn app<'a, 'b>() -> App<'a, 'b> {
    let config_arg = Arg::with_name("config")
        .required(true)
        .value_name("config")
        .help("Path to the run config file (toml or yaml)");
    let override_args = vec![
        Arg::with_name("width")
            .long("width")
            .short("w")
            .takes_value(true)
            .value_name("jobs")
            .help("Set the number of concurrently running jobs"),
        Arg::with_name("seed")
            .long("seed")
            .short("s")
            .takes_value(true)
            .value_name("seed")
            .help("Set the seed for the submission order shuffle"),
        Arg::with_name("output")
            .long("output")
            .short("o")
            .takes_value(true)
            .value_name("path")
            .help("Set the directory for captured job output"),
        Arg::with_name("resume")
            .long("resume")
            .short("r")
            .help("Skip jobs with a valid result from a previous run"),
        Arg::with_name("no-shuffle")
            .long("no-shuffle")
            .help("Submit jobs in parameter space order"),
    ];

    App::new("sweep")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .version(VERSION)
        .author(AUTHORS)
        .about("Run a simulator over every combination of a set of parameters.")
        .arg(Arg::with_name("verbosity")
            .long("verbosity")
            .short("v")
            .takes_value(true)
            .default_value("info")
            .value_name("verb")
            .global(true)
            .help("Set the verbosity of the log output"))

        // run subcommand
        .subcommand(SubCommand::with_name("run")
            .display_order(10)
            .about("Run all the jobs of a parameter sweep")
            .arg(config_arg.clone())
            .args(&override_args)
            .arg(Arg::with_name("fail-on-error")
                .long("fail-on-error")
                .help("Exit with a non-zero code if any job failed"))
            .arg(Arg::with_name("no-markers")
                .long("no-markers")
                .help("Don't mark running jobs with files in the output directory")))

        // plan subcommand
        .subcommand(SubCommand::with_name("plan")
            .display_order(11)
            .about("Show what a run would do, without running anything")
            .arg(config_arg)
            .args(&override_args))
}

pub fn app_matches() -> ArgMatches<'static> {
    app().get_matches()
}

/// Runs based on specified subcommand, returning the process exit code.
pub fn start(matches: ArgMatches) -> Result<i32> {
    match matches.subcommand() {
        ("run", Some(m)) => start_run(m),
        ("plan", Some(m)) => start_plan(m),
        _ => Ok(EXIT_OK),
    }
}

fn start_run(matches: &ArgMatches) -> Result<i32> {
    setup_log_verbosity(matches);
    let (config, space) = load_config(matches)?;
    let runner = config.command_runner(&space)?;
    let dispatcher = Dispatcher::new(config.dispatch_config(), runner, config.marker_probe()?);

    let cancel = dispatcher.cancel_token().clone();
    ctrlc::set_handler(move || {
        if !cancel.is_cancelled() {
            warn!("cancelling run, waiting for running jobs to terminate");
        }
        cancel.cancel();
    })
    .map_err(|e| Error::msg(format!("failed setting Ctrl-C handler: {}", e)))?;

    let progress = ProgressTracker::default();
    let finished = AtomicBool::new(false);
    let summary = thread::scope(|scope| {
        scope.spawn(|| progress.watch(PROGRESS_INTERVAL, &finished, report::progress));
        let summary = dispatcher.run_with_progress(&space, &progress);
        finished.store(true, Ordering::SeqCst);
        summary
    })?;

    report::summary(&summary);
    Ok(exit_code(&summary, config.sweep.fail_on_error))
}

/// Picks the exit code for a finished run.
pub fn exit_code(summary: &RunSummary, fail_on_error: bool) -> i32 {
    if summary.was_cancelled() {
        EXIT_CANCELLED
    } else if summary.failed > 0 && fail_on_error {
        EXIT_JOBS_FAILED
    } else {
        EXIT_OK
    }
}

/// Reports a fatal error if there was one, returning the exit code.
pub fn finish(result: Result<i32>) -> i32 {
    match result {
        Ok(code) => code,
        Err(e) => {
            println!("{}{}", "error: ".red(), e);
            if e.root_cause().to_string() != e.to_string() {
                println!("Caused by:\n{}", e.root_cause())
            }
            EXIT_FATAL
        }
    }
}

fn start_plan(matches: &ArgMatches) -> Result<i32> {
    setup_log_verbosity(matches);
    let (config, space) = load_config(matches)?;
    // catches template errors the same way a run would
    let runner = config.command_runner(&space)?;
    let dispatcher = Dispatcher::new(config.dispatch_config(), runner, config.marker_probe()?);
    let plan = dispatcher.plan(&space)?;
    report::plan(&plan, dispatcher.config());
    Ok(EXIT_OK)
}

/// Reads the config pointed to by the matches and applies command line
/// overrides to it.
fn load_config(matches: &ArgMatches) -> Result<(SweepConfig, ParameterSpace)> {
    let path = match matches.value_of("config") {
        Some(p) => Path::new(p),
        None => return Err(Error::msg("missing config path")),
    };
    if !path.is_file() {
        return Err(Error::msg(format!(
            "config file not found: {}",
            path.display()
        )));
    }
    let mut config = SweepConfig::from_path(path)?;
    apply_overrides(&mut config, matches)?;
    let space = config.parameter_space()?;
    Ok((config, space))
}

fn apply_overrides(config: &mut SweepConfig, matches: &ArgMatches) -> Result<()> {
    if let Some(width) = matches.value_of("width") {
        let width = width
            .parse::<usize>()
            .map_err(|e| Error::msg(format!("invalid width `{}`: {}", width, e)))?;
        config.sweep.width = Some(width);
    }
    if let Some(seed) = matches.value_of("seed") {
        config.sweep.seed = seed
            .parse()
            .map_err(|e| Error::msg(format!("invalid seed `{}`: {}", seed, e)))?;
    }
    if let Some(output) = matches.value_of("output") {
        config.sweep.output_dir = output.into();
    }
    if matches.is_present("resume") {
        config.sweep.resumable = true;
    }
    if matches.is_present("no-shuffle") {
        config.sweep.shuffle = false;
    }
    if matches.is_present("fail-on-error") {
        config.sweep.fail_on_error = true;
    }
    if matches.is_present("no-markers") {
        config.sweep.in_flight_markers = false;
    }
    Ok(())
}

fn setup_log_verbosity(matches: &ArgMatches) {
    use self::simplelog::{LevelFilter, TermLogger};
    let level_filter = match matches.value_of("verbosity") {
        Some(s) => match s {
            "0" | "none" => LevelFilter::Off,
            "1" | "err" | "error" | "min" => LevelFilter::Error,
            "2" | "warn" | "warning" | "default" => LevelFilter::Warn,
            "3" | "info" => LevelFilter::Info,
            "4" | "debug" => LevelFilter::Debug,
            "5" | "trace" | "max" | "all" => LevelFilter::Trace,
            _ => LevelFilter::Warn,
        },
        _ => LevelFilter::Warn,
    };
    let mut config_builder = simplelog::ConfigBuilder::new();
    let logger_conf = config_builder
        .set_time_level(LevelFilter::Error)
        .set_target_level(LevelFilter::Debug)
        .set_location_level(LevelFilter::Error)
        .set_time_format_str("%H:%M:%S%.6f")
        .build();
    if TermLogger::init(level_filter, logger_conf, simplelog::TerminalMode::Mixed).is_err() {
        eprintln!("failed setting up terminal logger");
    }
}

#[cfg(test)]
const CONFIG: &str = r#"
[sweep]
width = 4
seed = 1

[simulator]
program = "rustcoalescence"
args = ["simulate", "--seed={seed}"]

[[axis]]
name = "seed"
range = { start = 0, end = 10 }
"#;

#[test]
fn run_overrides_replace_file_values() {
    let matches = app()
        .get_matches_from_safe(vec![
            "sweep",
            "run",
            "sweep.toml",
            "--width",
            "16",
            "-s",
            "99",
            "--output",
            "elsewhere",
            "--resume",
            "--no-shuffle",
            "--fail-on-error",
            "--no-markers",
        ])
        .unwrap();
    let (name, sub) = matches.subcommand();
    assert_eq!(name, "run");
    let sub = sub.unwrap();
    assert_eq!(sub.value_of("config"), Some("sweep.toml"));

    let mut config = SweepConfig::from_toml_str(CONFIG).unwrap();
    apply_overrides(&mut config, sub).unwrap();
    let dispatch = config.dispatch_config();
    assert_eq!(dispatch.width, 16);
    assert_eq!(dispatch.seed, 99);
    assert_eq!(dispatch.output_dir, std::path::PathBuf::from("elsewhere"));
    assert!(dispatch.resumable);
    assert!(!dispatch.shuffle);
    assert!(!dispatch.in_flight_markers);
    assert!(config.sweep.fail_on_error);
}

#[test]
fn file_values_are_kept_without_overrides() {
    let matches = app()
        .get_matches_from_safe(vec!["sweep", "plan", "sweep.toml", "-v", "debug"])
        .unwrap();
    let sub = matches.subcommand_matches("plan").unwrap();
    assert_eq!(sub.value_of("verbosity"), Some("debug"));

    let mut config = SweepConfig::from_toml_str(CONFIG).unwrap();
    apply_overrides(&mut config, sub).unwrap();
    let dispatch = config.dispatch_config();
    assert_eq!(dispatch.width, 4);
    assert_eq!(dispatch.seed, 1);
    assert!(dispatch.shuffle);
    assert!(!config.sweep.fail_on_error);
}

#[test]
fn invalid_width_is_rejected() {
    let matches = app()
        .get_matches_from_safe(vec!["sweep", "run", "sweep.toml", "-w", "many"])
        .unwrap();
    let mut config = SweepConfig::from_toml_str(CONFIG).unwrap();
    assert!(apply_overrides(&mut config, matches.subcommand_matches("run").unwrap()).is_err());
}

#[test]
fn subcommand_is_required() {
    assert!(app().get_matches_from_safe(vec!["sweep"]).is_err());
    assert!(app()
        .get_matches_from_safe(vec!["sweep", "plan"])
        .is_err());
}

#[cfg(test)]
fn finished_run(results: Vec<sweep::JobResult>, cancel_requested: bool) -> RunSummary {
    use sweep::ParameterAxis;

    let axis = ParameterAxis::from_range("seed", 0, results.len() as i64, 1).unwrap();
    let space = ParameterSpace::new(vec![axis]).unwrap();
    let mut summary = RunSummary::new(
        results.len(),
        space.jobs().into_iter().zip(results).collect(),
    );
    summary.cancel_requested = cancel_requested;
    summary
}

#[test]
fn exit_code_policy() {
    use std::path::PathBuf;
    use sweep::{ExecutionError, JobResult};

    let completed = || JobResult::Completed {
        exit_code: 0,
        output: PathBuf::from("0.txt"),
    };
    let failed = || {
        JobResult::Failed(ExecutionError::NonZeroExit {
            code: Some(1),
            output: PathBuf::from("1.txt"),
        })
    };

    let clean = finished_run(vec![completed(), completed()], false);
    assert_eq!(exit_code(&clean, false), EXIT_OK);
    assert_eq!(exit_code(&clean, true), EXIT_OK);

    let with_failure = finished_run(vec![completed(), failed()], false);
    assert_eq!(exit_code(&with_failure, false), EXIT_OK);
    assert_eq!(exit_code(&with_failure, true), EXIT_JOBS_FAILED);

    let drained = finished_run(
        vec![completed(), JobResult::Failed(ExecutionError::Cancelled)],
        true,
    );
    assert_eq!(exit_code(&drained, true), EXIT_CANCELLED);

    // children killed by the interrupt itself, nothing left in the queue
    let interrupted = finished_run(
        vec![
            JobResult::Failed(ExecutionError::NonZeroExit {
                code: None,
                output: PathBuf::from("0.txt"),
            }),
            failed(),
        ],
        true,
    );
    assert_eq!(interrupted.cancelled, 0);
    assert_eq!(exit_code(&interrupted, false), EXIT_CANCELLED);
    assert_eq!(exit_code(&interrupted, true), EXIT_CANCELLED);
}

#[test]
fn fatal_errors_exit_with_one() {
    let matches = app()
        .get_matches_from_safe(vec!["sweep", "plan", "/nonexistent/sweep.toml", "-v", "none"])
        .unwrap();
    let result = start(matches);
    assert!(result.is_err());
    assert_eq!(finish(result), EXIT_FATAL);
    assert_eq!(finish(Ok(EXIT_CANCELLED)), EXIT_CANCELLED);
}
