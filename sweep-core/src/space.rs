//! Parameter axes and their Cartesian product.

use std::sync::Arc;

use fnv::FnvHashSet;

use crate::error::{Error, Result};
use crate::job::Job;
use crate::value::{ParamValue, ValueKind};

/// Named, ordered sequence of discrete values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterAxis {
    pub name: String,
    pub values: Vec<ParamValue>,
}

impl ParameterAxis {
    pub fn new<S: Into<String>>(name: S, values: Vec<ParamValue>) -> Self {
        ParameterAxis {
            name: name.into(),
            values,
        }
    }

    /// Creates an integer axis spanning `start..end` with the given step.
    ///
    /// An empty range (`start == end`) is allowed and yields an empty axis.
    pub fn from_range<S: Into<String>>(name: S, start: i64, end: i64, step: i64) -> Result<Self> {
        let name = name.into();
        if step <= 0 {
            return Err(Error::InvalidRange {
                axis: name,
                reason: format!("step must be positive, got {}", step),
            });
        }
        if start > end {
            return Err(Error::InvalidRange {
                axis: name,
                reason: format!("start ({}) is greater than end ({})", start, end),
            });
        }
        let values = (start..end)
            .step_by(step as usize)
            .map(ParamValue::Int)
            .collect();
        Ok(ParameterAxis { name, values })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Kind shared by all values on this axis, `None` for an empty axis.
    pub fn kind(&self) -> Option<ValueKind> {
        self.values.first().map(|v| v.kind())
    }

    /// Checks that the axis can take part in collision-free job keys.
    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::EmptyAxisName);
        }
        let first = match self.kind() {
            Some(k) => k,
            None => return Ok(()),
        };
        let mut seen = FnvHashSet::default();
        for value in &self.values {
            if value.kind() != first {
                return Err(Error::MixedAxisTypes {
                    axis: self.name.clone(),
                    first,
                    other: value.kind(),
                });
            }
            if !value.is_finite() {
                return Err(Error::NonFiniteValue {
                    axis: self.name.clone(),
                    value: value.to_string(),
                });
            }
            if !seen.insert(value.key_form()) {
                return Err(Error::DuplicateAxisValue {
                    axis: self.name.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Cartesian product of a list of parameter axes.
///
/// Jobs are enumerated in standard product order, the first axis varying
/// slowest and the last one fastest.
///
/// If any of the axes has no values the product is empty. This is not
/// treated as an error, the run simply has nothing to do.
#[derive(Debug, Clone)]
pub struct ParameterSpace {
    axes: Vec<ParameterAxis>,
    names: Arc<[String]>,
    len: usize,
}

impl ParameterSpace {
    pub fn new(axes: Vec<ParameterAxis>) -> Result<Self> {
        if axes.is_empty() {
            return Err(Error::NoAxes);
        }
        {
            let mut seen = FnvHashSet::default();
            for axis in &axes {
                axis.validate()?;
                if !seen.insert(axis.name.as_str()) {
                    return Err(Error::DuplicateAxis(axis.name.clone()));
                }
            }
        }
        let len = axes
            .iter()
            .try_fold(1usize, |acc, axis| acc.checked_mul(axis.len()))
            .ok_or(Error::SpaceTooLarge)?;
        if len == 0 {
            let empty = axes
                .iter()
                .filter(|a| a.is_empty())
                .map(|a| a.name.as_str())
                .collect::<Vec<_>>();
            warn!("parameter space is empty, axes without values: {:?}", empty);
        }
        let names: Arc<[String]> = axes.iter().map(|a| a.name.clone()).collect::<Vec<_>>().into();
        Ok(ParameterSpace { axes, names, len })
    }

    pub fn axes(&self) -> &[ParameterAxis] {
        &self.axes
    }

    pub fn axis_names(&self) -> &[String] {
        &self.names
    }

    /// Number of jobs in the space, the product of all axis lengths.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Enumerates all jobs in product order.
    pub fn jobs(&self) -> Vec<Job> {
        let mut jobs = Vec::with_capacity(self.len);
        if self.len == 0 {
            return jobs;
        }
        // odometer over axis value indices, last axis turning fastest
        let mut cursor = vec![0usize; self.axes.len()];
        for index in 0..self.len {
            let values = self
                .axes
                .iter()
                .zip(&cursor)
                .map(|(axis, &n)| axis.values[n].clone())
                .collect();
            jobs.push(Job::new(index, self.names.clone(), values));

            for (pos, axis) in self.axes.iter().enumerate().rev() {
                cursor[pos] += 1;
                if cursor[pos] < axis.len() {
                    break;
                }
                cursor[pos] = 0;
            }
        }
        jobs
    }
}

#[cfg(test)]
fn example_space() -> ParameterSpace {
    ParameterSpace::new(vec![
        ParameterAxis::new("seed", vec![1i64.into(), 2i64.into()]),
        ParameterAxis::new("rate", vec![0.1.into()]),
        ParameterAxis::new("algo", vec!["a".into(), "b".into()]),
    ])
    .unwrap()
}

#[test]
fn product_order_first_axis_slowest() {
    let space = example_space();
    assert_eq!(space.len(), 4);
    let keys = space
        .jobs()
        .iter()
        .map(|j| j.key().to_string())
        .collect::<Vec<_>>();
    assert_eq!(keys, vec!["1_0.1_a", "1_0.1_b", "2_0.1_a", "2_0.1_b"]);
    let indices = space.jobs().iter().map(|j| j.index()).collect::<Vec<_>>();
    assert_eq!(indices, vec![0, 1, 2, 3]);
}

#[test]
fn product_matches_nested_loops() {
    let seeds = (0..3).map(ParamValue::Int).collect::<Vec<_>>();
    let rates: Vec<ParamValue> = vec![0.5.into(), 0.25.into(), 1e-3.into(), 2.0.into()];
    let algos: Vec<ParamValue> = vec!["classical".into(), "gillespie".into()];
    let space = ParameterSpace::new(vec![
        ParameterAxis::new("seed", seeds.clone()),
        ParameterAxis::new("rate", rates.clone()),
        ParameterAxis::new("algo", algos.clone()),
    ])
    .unwrap();

    let mut expected = Vec::new();
    for s in &seeds {
        for r in &rates {
            for a in &algos {
                expected.push(vec![s.clone(), r.clone(), a.clone()]);
            }
        }
    }
    let jobs = space.jobs();
    assert_eq!(jobs.len(), 3 * 4 * 2);
    let produced = jobs.iter().map(|j| j.values().to_vec()).collect::<Vec<_>>();
    assert_eq!(produced, expected);

    let keys = jobs.iter().map(|j| j.key().clone()).collect::<FnvHashSet<_>>();
    assert_eq!(keys.len(), jobs.len());
}

#[test]
fn empty_axis_yields_no_jobs() {
    let space = ParameterSpace::new(vec![
        ParameterAxis::new("seed", vec![1i64.into(), 2i64.into()]),
        ParameterAxis::new("rate", vec![]),
    ])
    .unwrap();
    assert!(space.is_empty());
    assert!(space.jobs().is_empty());
}

#[test]
fn invalid_axes_are_rejected() {
    assert!(matches!(ParameterSpace::new(vec![]), Err(Error::NoAxes)));
    assert!(matches!(
        ParameterSpace::new(vec![
            ParameterAxis::new("seed", vec![1i64.into()]),
            ParameterAxis::new("seed", vec![2i64.into()]),
        ]),
        Err(Error::DuplicateAxis(_))
    ));
    assert!(matches!(
        ParameterSpace::new(vec![ParameterAxis::new(
            "rate",
            vec![0.1.into(), 1i64.into()]
        )]),
        Err(Error::MixedAxisTypes { .. })
    ));
    assert!(matches!(
        ParameterSpace::new(vec![ParameterAxis::new(
            "rate",
            vec![0.1.into(), 0.1.into()]
        )]),
        Err(Error::DuplicateAxisValue { .. })
    ));
    assert!(matches!(
        ParameterSpace::new(vec![ParameterAxis::new("rate", vec![f64::NAN.into()])]),
        Err(Error::NonFiniteValue { .. })
    ));
    assert!(matches!(
        ParameterSpace::new(vec![ParameterAxis::new("", vec![1i64.into()])]),
        Err(Error::EmptyAxisName)
    ));
}

#[test]
fn range_axis() {
    let axis = ParameterAxis::from_range("seed", 1, 10, 3).unwrap();
    assert_eq!(
        axis.values,
        vec![ParamValue::Int(1), ParamValue::Int(4), ParamValue::Int(7)]
    );
    assert!(ParameterAxis::from_range("seed", 4, 4, 1).unwrap().is_empty());
    assert!(ParameterAxis::from_range("seed", 5, 4, 1).is_err());
    assert!(ParameterAxis::from_range("seed", 0, 4, 0).is_err());
}
