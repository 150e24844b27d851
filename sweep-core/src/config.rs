//! Run configuration file.
//!
//! ```toml
//! [sweep]
//! width = 8
//! seed = 42
//! output_dir = "results"
//! resumable = true
//!
//! [simulator]
//! program = "rustcoalescence"
//! args = ["simulate", "--speciation={rate}", "--seed={seed}"]
//!
//! [probe]
//! marker = "Simulation resulted with biodiversity of"
//!
//! [[axis]]
//! name = "seed"
//! range = { start = 1, end = 11 }
//!
//! [[axis]]
//! name = "rate"
//! values = [0.1, 0.01]
//! ```
//!
//! Relative paths are resolved against the current working directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::dispatch::{default_width, DispatchConfig};
use crate::error::{Error, Result};
use crate::probe::MarkerProbe;
use crate::runner::CommandRunner;
use crate::space::{ParameterAxis, ParameterSpace};
use crate::util;
use crate::value::ParamValue;
use crate::DEFAULT_RESULT_MARKER;

/// Complete description of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    #[serde(default)]
    pub sweep: SweepSection,
    pub simulator: SimulatorSection,
    #[serde(default)]
    pub probe: ProbeSection,
    #[serde(rename = "axis", default)]
    pub axes: Vec<AxisConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SweepSection {
    /// Defaults to the number of available cores
    pub width: Option<usize>,
    pub seed: u64,
    pub output_dir: PathBuf,
    pub resumable: bool,
    pub shuffle: bool,
    pub in_flight_markers: bool,
    /// Report failed jobs through the process exit code
    pub fail_on_error: bool,
}

impl Default for SweepSection {
    fn default() -> Self {
        let dispatch = DispatchConfig::default();
        SweepSection {
            width: None,
            seed: dispatch.seed,
            output_dir: dispatch.output_dir,
            resumable: dispatch.resumable,
            shuffle: dispatch.shuffle,
            in_flight_markers: dispatch.in_flight_markers,
            fail_on_error: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulatorSection {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeSection {
    pub marker: String,
}

impl Default for ProbeSection {
    fn default() -> Self {
        ProbeSection {
            marker: DEFAULT_RESULT_MARKER.to_string(),
        }
    }
}

/// Axis given either as an explicit value list or as an integer range.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisConfig {
    pub name: String,
    #[serde(default)]
    pub values: Option<Vec<ParamValue>>,
    #[serde(default)]
    pub range: Option<RangeConfig>,
}

/// Integer range, `end` is exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RangeConfig {
    pub start: i64,
    pub end: i64,
    #[serde(default = "default_step")]
    pub step: i64,
}

fn default_step() -> i64 {
    1
}

impl AxisConfig {
    pub fn to_axis(&self) -> Result<ParameterAxis> {
        match (&self.values, &self.range) {
            (Some(values), None) => Ok(ParameterAxis::new(self.name.clone(), values.clone())),
            (None, Some(r)) => ParameterAxis::from_range(self.name.clone(), r.start, r.end, r.step),
            _ => Err(Error::InvalidAxisDefinition(self.name.clone())),
        }
    }
}

impl SweepConfig {
    /// Reads the config from a `.toml` file, or a `.yaml`/`.yml` file if
    /// the `yaml` feature is enabled.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("reading config at: {}", path.display());
        util::deser_struct_from_path(path)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn parameter_space(&self) -> Result<ParameterSpace> {
        let axes = self
            .axes
            .iter()
            .map(|a| a.to_axis())
            .collect::<Result<Vec<_>>>()?;
        ParameterSpace::new(axes)
    }

    pub fn dispatch_config(&self) -> DispatchConfig {
        DispatchConfig {
            width: self.sweep.width.unwrap_or_else(default_width),
            seed: self.sweep.seed,
            output_dir: self.sweep.output_dir.clone(),
            resumable: self.sweep.resumable,
            shuffle: self.sweep.shuffle,
            in_flight_markers: self.sweep.in_flight_markers,
        }
    }

    /// Builds the runner, checking argument placeholders against the axes
    /// of the given space.
    pub fn command_runner(&self, space: &ParameterSpace) -> Result<CommandRunner> {
        let sim = &self.simulator;
        let mut runner = CommandRunner::new(sim.program.clone(), &sim.args, space.axis_names())?;
        if let Some(dir) = &sim.working_dir {
            runner = runner.working_dir(dir.clone());
        }
        for (key, value) in &sim.env {
            runner = runner.env(key.clone(), value.clone());
        }
        Ok(runner)
    }

    pub fn marker_probe(&self) -> Result<MarkerProbe> {
        MarkerProbe::new(self.probe.marker.clone())
    }
}

#[cfg(test)]
const EXAMPLE: &str = r#"
[sweep]
width = 2
seed = 7
output_dir = "out"
resumable = true

[simulator]
program = "rustcoalescence"
args = ["simulate", "--seed={seed}", "--speciation={rate}", "--algorithm={algo}"]
env = { RUST_LOG = "info" }

[[axis]]
name = "seed"
range = { start = 1, end = 3 }

[[axis]]
name = "rate"
values = [0.1]

[[axis]]
name = "algo"
values = ["a", "b"]
"#;

#[test]
fn parse_full_config() {
    let config = SweepConfig::from_toml_str(EXAMPLE).unwrap();
    let dispatch = config.dispatch_config();
    assert_eq!(dispatch.width, 2);
    assert_eq!(dispatch.seed, 7);
    assert_eq!(dispatch.output_dir, PathBuf::from("out"));
    assert!(dispatch.resumable);
    assert!(dispatch.shuffle);
    assert!(!config.sweep.fail_on_error);
    assert_eq!(config.probe.marker, DEFAULT_RESULT_MARKER);

    let space = config.parameter_space().unwrap();
    assert_eq!(space.axis_names(), &["seed", "rate", "algo"]);
    assert_eq!(space.len(), 4);
    let keys = space
        .jobs()
        .iter()
        .map(|j| j.key().to_string())
        .collect::<Vec<_>>();
    assert_eq!(keys, vec!["1_0.1_a", "1_0.1_b", "2_0.1_a", "2_0.1_b"]);

    let runner = config.command_runner(&space).unwrap();
    let job = &space.jobs()[3];
    assert_eq!(
        runner.args_for(job, Path::new("out/x.txt")).unwrap(),
        vec!["simulate", "--seed=2", "--speciation=0.1", "--algorithm=b"]
    );
}

#[test]
fn minimal_config_uses_defaults() {
    let config = SweepConfig::from_toml_str(
        "[simulator]\nprogram = \"sim\"\n\n[[axis]]\nname = \"seed\"\nvalues = [1]\n",
    )
    .unwrap();
    let dispatch = config.dispatch_config();
    assert!(dispatch.width >= 1);
    assert!(!dispatch.resumable);
    assert!(dispatch.in_flight_markers);
    assert_eq!(dispatch.output_dir, PathBuf::from("results"));
}

#[test]
fn axis_needs_exactly_one_source() {
    let both = SweepConfig::from_toml_str(
        "[simulator]\nprogram = \"sim\"\n\n[[axis]]\nname = \"seed\"\nvalues = [1]\nrange = { start = 0, end = 2 }\n",
    )
    .unwrap();
    assert!(matches!(
        both.parameter_space(),
        Err(Error::InvalidAxisDefinition(_))
    ));
    let neither =
        SweepConfig::from_toml_str("[simulator]\nprogram = \"sim\"\n\n[[axis]]\nname = \"seed\"\n")
            .unwrap();
    assert!(neither.parameter_space().is_err());
}

#[test]
fn unknown_placeholder_is_a_config_error() {
    let config = SweepConfig::from_toml_str(
        "[simulator]\nprogram = \"sim\"\nargs = [\"--rate={rat}\"]\n\n[[axis]]\nname = \"rate\"\nvalues = [0.1]\n",
    )
    .unwrap();
    let space = config.parameter_space().unwrap();
    assert!(matches!(
        config.command_runner(&space),
        Err(Error::UnknownPlaceholder { .. })
    ));
}

#[test]
fn unknown_fields_are_rejected() {
    assert!(SweepConfig::from_toml_str(
        "[sweep]\nwidht = 3\n\n[simulator]\nprogram = \"sim\"\n"
    )
    .is_err());
}

#[test]
fn empty_marker_is_a_config_error() {
    let config = SweepConfig::from_toml_str(
        "[simulator]\nprogram = \"sim\"\n\n[probe]\nmarker = \"\"\n\n[[axis]]\nname = \"seed\"\nvalues = [1]\n",
    )
    .unwrap();
    assert!(matches!(config.marker_probe(), Err(Error::EmptyMarker)));
    let config = SweepConfig::from_toml_str(EXAMPLE).unwrap();
    assert_eq!(
        config.marker_probe().unwrap().marker(),
        DEFAULT_RESULT_MARKER
    );
}
