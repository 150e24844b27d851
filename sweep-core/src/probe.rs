//! Detection of results left behind by previous runs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::job::Job;
use crate::DEFAULT_RESULT_MARKER;

/// Classified outcome of looking for a job's prior result.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    /// No output file exists for the job
    Missing,
    /// Output file exists and contains the expected summary
    Valid { output: PathBuf, summary: f64 },
    /// Output file exists but can't be trusted
    Invalid(InvalidReason),
}

impl ProbeOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, ProbeOutcome::Valid { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvalidReason {
    /// Output file couldn't be read
    Unreadable(String),
    /// Output doesn't contain the marker at all
    MarkerNotFound,
    /// Marker was found, but it's not followed by a number
    MarkerNotNumeric(String),
    /// Job was still marked as running, the previous run didn't finish it
    Interrupted,
}

/// Decides whether a valid result already exists for a job.
///
/// Probes are advisory: they get consulted once per job before submission,
/// and anything other than [`ProbeOutcome::Valid`] means the job gets run.
/// Implementations must not fail, errors are folded into
/// [`ProbeOutcome::Invalid`].
pub trait ResultProbe: Send + Sync {
    fn probe(&self, job: &Job, output_dir: &Path) -> ProbeOutcome;
}

impl<F> ResultProbe for F
where
    F: Fn(&Job, &Path) -> ProbeOutcome + Send + Sync,
{
    fn probe(&self, job: &Job, output_dir: &Path) -> ProbeOutcome {
        self(job, output_dir)
    }
}

/// Looks for a marker text followed by a numeric token in captured output.
///
/// With the default marker, a line like
/// `Simulation resulted with biodiversity of 1234 unique species.`
/// validates the output. The last matching line wins.
#[derive(Debug, Clone)]
pub struct MarkerProbe {
    marker: String,
}

impl Default for MarkerProbe {
    fn default() -> Self {
        MarkerProbe {
            marker: DEFAULT_RESULT_MARKER.to_string(),
        }
    }
}

impl MarkerProbe {
    /// Fails for a blank marker, which would match every line.
    pub fn new<S: Into<String>>(marker: S) -> crate::Result<Self> {
        let marker = marker.into();
        if marker.trim().is_empty() {
            return Err(Error::EmptyMarker);
        }
        Ok(MarkerProbe { marker })
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Extracts the numeric summary following the marker.
    pub fn find_summary(&self, content: &str) -> Result<f64, InvalidReason> {
        let rest = content
            .lines()
            .rev()
            .find_map(|line| {
                line.find(self.marker.as_str())
                    .map(|pos| &line[pos + self.marker.len()..])
            })
            .ok_or(InvalidReason::MarkerNotFound)?;
        let token = rest.split_whitespace().next().unwrap_or("");
        let token = token.trim_end_matches(|c: char| c == '.' || c == ',' || c == ';' || c == ':');
        match token.parse::<f64>() {
            Ok(n) if n.is_finite() => Ok(n),
            _ => Err(InvalidReason::MarkerNotNumeric(token.to_string())),
        }
    }
}

impl ResultProbe for MarkerProbe {
    fn probe(&self, job: &Job, output_dir: &Path) -> ProbeOutcome {
        let output = job.key().output_path(output_dir);
        if job.key().in_flight_path(output_dir).exists() {
            return ProbeOutcome::Invalid(InvalidReason::Interrupted);
        }
        let bytes = match fs::read(&output) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return ProbeOutcome::Missing,
            Err(e) => return ProbeOutcome::Invalid(InvalidReason::Unreadable(e.to_string())),
        };
        match self.find_summary(&String::from_utf8_lossy(&bytes)) {
            Ok(summary) => ProbeOutcome::Valid { output, summary },
            Err(reason) => ProbeOutcome::Invalid(reason),
        }
    }
}

#[test]
fn finds_summary_after_marker() {
    let probe = MarkerProbe::default();
    let output = "\
        The simulation took 1.5s to execute.\n\
        Simulation finished after 12.3 (4567 steps).\n\
        Simulation resulted with biodiversity of 318 unique species.\n";
    assert_eq!(probe.find_summary(output), Ok(318.0));
}

#[test]
fn marker_classification() {
    let probe = MarkerProbe::new("biodiversity of").unwrap();
    assert_eq!(
        probe.find_summary("nothing to see here"),
        Err(InvalidReason::MarkerNotFound)
    );
    assert_eq!(
        probe.find_summary("biodiversity of many species"),
        Err(InvalidReason::MarkerNotNumeric("many".to_string()))
    );
    assert_eq!(
        probe.find_summary("biodiversity of"),
        Err(InvalidReason::MarkerNotNumeric("".to_string()))
    );
    assert_eq!(probe.find_summary("biodiversity of 12."), Ok(12.0));
    // last occurrence wins
    assert_eq!(
        probe.find_summary("biodiversity of 1\nbiodiversity of 2\n"),
        Ok(2.0)
    );
}

#[test]
fn blank_marker_is_rejected() {
    assert!(matches!(MarkerProbe::new(""), Err(Error::EmptyMarker)));
    assert!(matches!(MarkerProbe::new(" \t"), Err(Error::EmptyMarker)));
    assert_eq!(MarkerProbe::default().marker(), DEFAULT_RESULT_MARKER);
}
