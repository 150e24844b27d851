//! Execution of a single job as an external process.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::job::{ExecutionError, Job, JobResult};
use crate::util::get_similar;

/// How often a waiting runner checks on its child and the cancel token.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Placeholder substituted with the job key.
const KEY_PLACEHOLDER: &str = "key";
/// Placeholder substituted with the path of the capture file.
const OUTPUT_PLACEHOLDER: &str = "output";

/// Everything a runner gets to know about the run it's part of.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub output_dir: PathBuf,
    pub cancel: CancelToken,
}

/// Runs a single job to completion.
///
/// Implementations block the calling worker until the job is done and
/// report every failure through the returned [`JobResult`].
pub trait ProcessRunner: Send + Sync {
    fn run(&self, job: &Job, ctx: &RunContext) -> JobResult;
}

impl<F> ProcessRunner for F
where
    F: Fn(&Job, &RunContext) -> JobResult + Send + Sync,
{
    fn run(&self, job: &Job, ctx: &RunContext) -> JobResult {
        self(job, ctx)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Axis(String),
    Key,
    Output,
}

/// Single simulator argument with `{placeholder}` substitutions.
///
/// Placeholders name an axis of the parameter space, or one of the
/// reserved `{key}` and `{output}`. Reserved names take precedence over
/// axes of the same name. Literal braces are written as `{{` and `}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl ArgTemplate {
    /// Parses a template, checking placeholders against the given axis
    /// names.
    pub fn parse(source: &str, axis_names: &[String]) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidTemplate {
            template: source.to_string(),
            reason: reason.to_string(),
        };
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '}' => return Err(invalid("unmatched `}`")),
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') => return Err(invalid("nested `{`")),
                            Some(c) => name.push(c),
                            None => return Err(invalid("unterminated placeholder")),
                        }
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Self::placeholder(name, source, axis_names)?);
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(ArgTemplate {
            source: source.to_string(),
            segments,
        })
    }

    fn placeholder(name: String, source: &str, axis_names: &[String]) -> Result<Segment> {
        let name = name.trim().to_string();
        if name == KEY_PLACEHOLDER {
            return Ok(Segment::Key);
        }
        if name == OUTPUT_PLACEHOLDER {
            return Ok(Segment::Output);
        }
        if axis_names.iter().any(|n| n == &name) {
            return Ok(Segment::Axis(name));
        }
        let mut candidates = axis_names.iter().map(|n| n.as_str()).collect::<Vec<_>>();
        candidates.push(KEY_PLACEHOLDER);
        candidates.push(OUTPUT_PLACEHOLDER);
        let hint = match get_similar(&name, &candidates) {
            Some(s) => format!(", did you mean `{{{}}}`?", s),
            None => String::new(),
        };
        Err(Error::UnknownPlaceholder {
            name,
            template: source.to_string(),
            hint,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Renders the argument for the given job.
    pub fn render(&self, job: &Job, output: &Path) -> std::result::Result<String, ExecutionError> {
        let mut arg = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => arg.push_str(s),
                Segment::Key => arg.push_str(job.key().as_str()),
                Segment::Output => arg.push_str(&output.to_string_lossy()),
                Segment::Axis(name) => match job.get(name) {
                    Some(value) => arg.push_str(&value.raw_form()),
                    None => {
                        return Err(ExecutionError::Spawn(format!(
                            "argument `{}` refers to axis \"{}\" missing from job {}",
                            self.source,
                            name,
                            job.key()
                        )))
                    }
                },
            }
        }
        Ok(arg)
    }
}

/// Runs jobs by launching an external program.
///
/// The argument vector is built from templates, no shell is involved.
/// Standard output and standard error of the child are both captured into
/// `<output-dir>/<key>.txt`, which gets truncated first.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    program: PathBuf,
    args: Vec<ArgTemplate>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    poll_interval: Duration,
}

impl CommandRunner {
    pub fn new<P: Into<PathBuf>>(program: P, args: &[String], axis_names: &[String]) -> Result<Self> {
        let args = args
            .iter()
            .map(|a| ArgTemplate::parse(a, axis_names))
            .collect::<Result<Vec<_>>>()?;
        Ok(CommandRunner {
            program: program.into(),
            args,
            working_dir: None,
            env: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    pub fn working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// Renders the full argument vector for the job.
    pub fn args_for(&self, job: &Job, output: &Path) -> std::result::Result<Vec<String>, ExecutionError> {
        self.args.iter().map(|a| a.render(job, output)).collect()
    }

    fn command_for(&self, job: &Job, output: &Path) -> std::result::Result<Command, ExecutionError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args_for(job, output)?);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null());
        Ok(cmd)
    }
}

impl ProcessRunner for CommandRunner {
    fn run(&self, job: &Job, ctx: &RunContext) -> JobResult {
        let output = job.key().output_path(&ctx.output_dir);
        let mut cmd = match self.command_for(job, &output) {
            Ok(c) => c,
            Err(e) => return JobResult::Failed(e),
        };
        // checked before the capture file gets truncated
        if ctx.cancel.is_cancelled() {
            return JobResult::Failed(ExecutionError::Cancelled);
        }
        let capture = |e: io::Error| {
            JobResult::Failed(ExecutionError::Capture(format!(
                "{}: {}",
                output.display(),
                e
            )))
        };
        let stdout = match File::create(&output) {
            Ok(f) => f,
            Err(e) => return capture(e),
        };
        let stderr = match stdout.try_clone() {
            Ok(f) => f,
            Err(e) => return capture(e),
        };
        cmd.stdout(Stdio::from(stdout)).stderr(Stdio::from(stderr));

        trace!("spawning {:?} for job {}", cmd, job.key());
        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                return JobResult::Failed(ExecutionError::Spawn(format!(
                    "{}: {}",
                    self.program.display(),
                    e
                )))
            }
        };
        // the command holds our copies of the capture handles
        drop(cmd);

        let mut child = ChildGuard::new(child);
        match child.wait(&ctx.cancel, self.poll_interval) {
            Ok(Some(status)) if status.success() => JobResult::Completed {
                exit_code: status.code().unwrap_or(0),
                output,
            },
            // children share the terminal's process group, a Ctrl-C
            // usually kills them before the token is polled
            Ok(Some(_)) if ctx.cancel.is_cancelled() => {
                JobResult::Failed(ExecutionError::Cancelled)
            }
            Ok(Some(status)) => JobResult::Failed(ExecutionError::NonZeroExit {
                code: status.code(),
                output,
            }),
            Ok(None) => JobResult::Failed(ExecutionError::Cancelled),
            Err(e) => JobResult::Failed(ExecutionError::Wait(e.to_string())),
        }
    }
}

/// Owns a child process and makes sure it's killed and reaped when dropped.
struct ChildGuard {
    child: Child,
    reaped: bool,
}

impl ChildGuard {
    fn new(child: Child) -> Self {
        ChildGuard {
            child,
            reaped: false,
        }
    }

    /// Blocks until the child exits. Returns `None` if the token got
    /// cancelled first, in which case the child is terminated.
    fn wait(&mut self, cancel: &CancelToken, poll: Duration) -> io::Result<Option<ExitStatus>> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                self.reaped = true;
                return Ok(Some(status));
            }
            if cancel.is_cancelled() {
                debug!("cancelled, killing child process {}", self.child.id());
                self.terminate();
                return Ok(None);
            }
            thread::sleep(poll);
        }
    }

    fn terminate(&mut self) {
        if self.reaped {
            return;
        }
        if let Err(e) = self.child.kill() {
            // already exited on its own
            trace!("failed killing child process {}: {}", self.child.id(), e);
        }
        if let Err(e) = self.child.wait() {
            warn!("failed reaping child process {}: {}", self.child.id(), e);
        }
        self.reaped = true;
    }
}

impl Drop for ChildGuard {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn template_renders_raw_values() {
    use crate::value::ParamValue;
    use std::sync::Arc;

    let axes = names(&["seed", "rate", "algo"]);
    let job = Job::new(
        0,
        Arc::from(axes.clone()),
        vec![
            ParamValue::Int(7),
            ParamValue::Float(1e-3),
            ParamValue::from("gillespie classical"),
        ],
    );
    let template = ArgTemplate::parse("--speciation={rate}", &axes).unwrap();
    let output = Path::new("out/7_0.001_gillespie%20classical.txt");
    assert_eq!(template.render(&job, output).unwrap(), "--speciation=0.001");

    let runner = CommandRunner::new(
        "simulate",
        &names(&["{algo}", "{{seed}}={seed}", "{key}", "{output}"]),
        &axes,
    )
    .unwrap();
    assert_eq!(
        runner.args_for(&job, output).unwrap(),
        vec![
            "gillespie classical".to_string(),
            "{seed}=7".to_string(),
            "7_0.001_gillespie%20classical".to_string(),
            output.to_string_lossy().to_string(),
        ]
    );
}

#[test]
fn template_errors() {
    let axes = names(&["seed", "rate"]);
    match ArgTemplate::parse("--seed={sede}", &axes) {
        Err(Error::UnknownPlaceholder { name, hint, .. }) => {
            assert_eq!(name, "sede");
            assert!(hint.contains("{seed}"));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert!(matches!(
        ArgTemplate::parse("--seed={seed", &axes),
        Err(Error::InvalidTemplate { .. })
    ));
    assert!(matches!(
        ArgTemplate::parse("--seed=seed}", &axes),
        Err(Error::InvalidTemplate { .. })
    ));
    assert!(ArgTemplate::parse("plain", &axes).is_ok());
}
