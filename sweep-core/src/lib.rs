//! This library implements the core of a parametric batch-experiment
//! dispatcher.
//!
//! A run starts from a [`ParameterSpace`], the Cartesian product of a set of
//! named [`ParameterAxis`] definitions. Every element of the product is a
//! [`Job`], addressed by a deterministic [`JobKey`]. Jobs are shuffled with a
//! seeded [`JobShuffler`], optionally filtered through a [`ResultProbe`] that
//! looks for results left behind by previous runs, and finally executed by a
//! bounded [`WorkerPool`] that hands each job to a [`ProcessRunner`].
//! Completion is tracked by a [`ProgressTracker`].
//!
//! The [`Dispatcher`] ties all of the above together.
//!
//!
//! # External collaborators
//!
//! Both the result probe and the process runner are traits. The library
//! provides [`MarkerProbe`], which looks for a numeric summary token in the
//! captured output, and [`CommandRunner`], which launches an external program
//! from an argument template and captures its merged output into
//! `<output-dir>/<key>.txt`. Closures with matching signatures implement the
//! traits as well, which is mostly useful for testing.
//!
//!
//! # Configuration
//!
//! A whole run can be described with a single file, see [`SweepConfig`].
//! TOML is always supported, YAML requires the `yaml` feature.

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde;

pub use cancel::CancelToken;
pub use config::SweepConfig;
pub use dispatch::{DispatchConfig, Dispatcher, Plan, RunSummary};
pub use error::{Error, Result};
pub use job::{ExecutionError, Job, JobKey, JobResult, SkipReason};
pub use pool::WorkerPool;
pub use probe::{InvalidReason, MarkerProbe, ProbeOutcome, ResultProbe};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use runner::{ArgTemplate, CommandRunner, ProcessRunner, RunContext};
pub use shuffle::JobShuffler;
pub use space::{ParameterAxis, ParameterSpace};
pub use value::{ParamValue, ValueKind};

pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod pool;
pub mod probe;
pub mod progress;
pub mod runner;
pub mod shuffle;
pub mod space;
pub mod value;

mod util;

pub const VERSION: &'static str = env!("CARGO_PKG_VERSION");

/// Extension of the files capturing job output.
pub const OUTPUT_FILE_EXTENSION: &str = "txt";
/// Extension of the files marking jobs that are currently running.
pub const IN_FLIGHT_FILE_EXTENSION: &str = "running";
/// Separator placed between encoded values within a job key.
pub const KEY_SEPARATOR: char = '_';

/// Marker line printed by the simulator once it has finished successfully.
pub const DEFAULT_RESULT_MARKER: &str = "Simulation resulted with biodiversity of";
