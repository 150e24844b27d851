//! Error types.
//!
//! Everything in here is fatal to a run and gets reported before any job is
//! started. Failures of individual jobs are not errors in this sense, they
//! are recorded as [`ExecutionError`](crate::ExecutionError) inside the job's
//! result.

use std::io;

use crate::value::ValueKind;

pub type Result<T> = core::result::Result<T, Error>;

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::IoError(e.to_string())
    }
}

/// Crate-wide error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    IoError(String),

    #[cfg(feature = "yaml")]
    #[error("yaml deserialization error: {0}")]
    YamlDeserError(#[from] serde_yaml::Error),
    #[error("toml deserialization error: {0}")]
    TomlDeserError(#[from] toml::de::Error),
    #[error("unsupported config file format: {0}")]
    UnsupportedConfigFormat(String),

    #[error("parameter space must have at least one axis")]
    NoAxes,
    #[error("axis name can't be empty")]
    EmptyAxisName,
    #[error("duplicate axis name: {0}")]
    DuplicateAxis(String),
    #[error("axis \"{axis}\" mixes value types: {first} and {other}")]
    MixedAxisTypes {
        axis: String,
        first: ValueKind,
        other: ValueKind,
    },
    #[error("axis \"{axis}\" contains duplicate value: {value}")]
    DuplicateAxisValue { axis: String, value: String },
    #[error("axis \"{axis}\" contains non-finite value: {value}")]
    NonFiniteValue { axis: String, value: String },
    #[error("invalid range for axis \"{axis}\": {reason}")]
    InvalidRange { axis: String, reason: String },
    #[error("invalid definition of axis \"{0}\": exactly one of `values` or `range` is required")]
    InvalidAxisDefinition(String),
    #[error("parameter space too large: product of axis sizes overflows")]
    SpaceTooLarge,

    #[error("invalid concurrency width: {0}, must be at least 1")]
    InvalidWidth(usize),
    #[error("output directory {path} is not writable: {reason}")]
    OutputDirUnwritable { path: String, reason: String },
    #[error("duplicate job key: {0}")]
    DuplicateJobKey(String),

    #[error("unknown placeholder `{name}` in argument `{template}`{hint}")]
    UnknownPlaceholder {
        name: String,
        template: String,
        hint: String,
    },
    #[error("invalid argument template `{template}`: {reason}")]
    InvalidTemplate { template: String, reason: String },

    #[error("result marker can't be empty")]
    EmptyMarker,
}
