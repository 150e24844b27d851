//! Jobs, job keys and job results.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::value::ParamValue;
use crate::{IN_FLIGHT_FILE_EXTENSION, KEY_SEPARATOR, OUTPUT_FILE_EXTENSION};

/// Deterministic string identifying a job.
///
/// Built from the key forms of all of the job's values, in axis order,
/// joined with [`KEY_SEPARATOR`]. Key forms never contain the separator,
/// so two jobs of the same parameter space share a key only if they share
/// every value.
///
/// The key is the join point between writing job output and looking for
/// prior results, both go through [`JobKey::output_path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobKey(String);

impl JobKey {
    pub fn from_values(values: &[ParamValue]) -> Self {
        let mut key = String::new();
        for (n, value) in values.iter().enumerate() {
            if n > 0 {
                key.push(KEY_SEPARATOR);
            }
            key.push_str(&value.key_form());
        }
        JobKey(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path of the file capturing the job's output.
    pub fn output_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(format!("{}.{}", self.0, OUTPUT_FILE_EXTENSION))
    }

    /// Path of the file marking the job as currently running.
    pub fn in_flight_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(format!("{}.{}", self.0, IN_FLIGHT_FILE_EXTENSION))
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Single fully specified parameter combination.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    /// Position of the job in product order
    index: usize,
    axes: Arc<[String]>,
    values: Vec<ParamValue>,
    key: JobKey,
}

impl Job {
    /// Creates a new job. `axes` and `values` are matched by position.
    pub fn new(index: usize, axes: Arc<[String]>, values: Vec<ParamValue>) -> Self {
        debug_assert_eq!(axes.len(), values.len());
        let key = JobKey::from_values(&values);
        Job {
            index,
            axes,
            values,
            key,
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn key(&self) -> &JobKey {
        &self.key
    }

    pub fn values(&self) -> &[ParamValue] {
        &self.values
    }

    pub fn axis_names(&self) -> &[String] {
        &self.axes
    }

    /// Gets the value selected for the axis with the given name.
    pub fn get(&self, axis: &str) -> Option<&ParamValue> {
        self.axes
            .iter()
            .position(|name| name == axis)
            .map(|n| &self.values[n])
    }

    /// Iterates over `(axis name, value)` pairs in axis order.
    pub fn params(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.axes
            .iter()
            .map(|name| name.as_str())
            .zip(self.values.iter())
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (n, (name, value)) in self.params().enumerate() {
            if n > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, ")")
    }
}

/// Why a job was not submitted for execution.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Valid result from a previous run was found at the given path
    PriorResult { output: PathBuf },
}

/// Job-local failure. Never aborts sibling jobs or the run itself.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("failed spawning process: {0}")]
    Spawn(String),
    #[error("failed capturing output: {0}")]
    Capture(String),
    #[error("failed waiting for process: {0}")]
    Wait(String),
    #[error("process exited with {}, output at {}", exit_code_str(.code), .output.display())]
    NonZeroExit { code: Option<i32>, output: PathBuf },
    #[error("runner panicked: {0}")]
    Panicked(String),
    #[error("cancelled")]
    Cancelled,
}

fn exit_code_str(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("code {}", c),
        None => "no code (terminated by signal)".to_string(),
    }
}

/// Outcome of a single job. Produced exactly once per job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    Completed { exit_code: i32, output: PathBuf },
    Skipped { reason: SkipReason },
    Failed(ExecutionError),
}

impl JobResult {
    pub fn is_completed(&self) -> bool {
        matches!(self, JobResult::Completed { .. })
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, JobResult::Skipped { .. })
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, JobResult::Failed(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, JobResult::Failed(ExecutionError::Cancelled))
    }
}

#[test]
fn key_joins_values_in_axis_order() {
    let axes: Arc<[String]> = vec!["seed".to_string(), "rate".to_string(), "algo".to_string()]
        .into();
    let job = Job::new(
        0,
        axes,
        vec![
            ParamValue::Int(1),
            ParamValue::Float(0.1),
            ParamValue::from("a"),
        ],
    );
    assert_eq!(job.key().as_str(), "1_0.1_a");
    assert_eq!(
        job.key().output_path(Path::new("out")),
        PathBuf::from("out/1_0.1_a.txt")
    );
    assert_eq!(job.get("rate"), Some(&ParamValue::Float(0.1)));
    assert_eq!(job.get("missing"), None);
    assert_eq!(job.to_string(), "(seed=1, rate=0.1, algo=a)");
}

#[test]
fn key_depends_only_on_values() {
    let axes: Arc<[String]> = vec!["a".to_string(), "b".to_string()].into();
    let first = Job::new(0, axes.clone(), vec![1i64.into(), "x_y".into()]);
    let second = Job::new(7, axes.clone(), vec![1i64.into(), "x_y".into()]);
    let third = Job::new(1, axes, vec![1i64.into(), "x".into()]);
    assert_eq!(first.key(), second.key());
    assert_ne!(first.key(), third.key());
}
