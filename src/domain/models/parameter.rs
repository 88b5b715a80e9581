//! Parameter values, domains, and the search space.
//!
//! The search space is built programmatically; parsing it from user-facing
//! configuration strings happens outside this crate.

use std::collections::BTreeMap;
use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// A concrete parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    /// Boolean flag
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Float(f64),
    /// String, usually a choice label
    Str(String),
}

impl ParameterValue {
    /// Numeric view of the value (ints widen to floats).
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(_) | Self::Str(_) => None,
        }
    }

    /// Integer value, without conversion from floats.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// String value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ParameterValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

/// Mapping from parameter name to value. Ordered so that equal
/// parameterizations compare and serialize identically.
pub type Parameterization = BTreeMap<String, ParameterValue>;

/// Domain a single parameter is drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterDomain {
    /// Continuous range `[lower, upper]`, optionally sampled in log space.
    Float {
        /// Inclusive lower bound
        lower: f64,
        /// Inclusive upper bound
        upper: f64,
        /// Sample uniformly in log space; requires `lower > 0`
        #[serde(default)]
        log_scale: bool,
    },
    /// Integer range `[lower, upper]`.
    Int {
        /// Inclusive lower bound
        lower: i64,
        /// Inclusive upper bound
        upper: i64,
    },
    /// Unordered set of allowed values.
    Choice {
        /// Allowed values, at least one
        values: Vec<ParameterValue>,
    },
    /// A constant.
    Fixed {
        /// The only value
        value: ParameterValue,
    },
}

impl ParameterDomain {
    /// Whether the domain has more than one possible value.
    pub fn is_tunable(&self) -> bool {
        match self {
            Self::Float { lower, upper, .. } => upper > lower,
            Self::Int { lower, upper } => upper > lower,
            Self::Choice { values } => values.len() > 1,
            Self::Fixed { .. } => false,
        }
    }

    /// Check the domain definition itself.
    pub fn validate(&self, name: &str) -> DomainResult<()> {
        match self {
            Self::Float {
                lower,
                upper,
                log_scale,
            } => {
                if !lower.is_finite() || !upper.is_finite() || lower > upper {
                    return Err(DomainError::ValidationFailed(format!(
                        "parameter '{name}' has invalid bounds [{lower}, {upper}]"
                    )));
                }
                if *log_scale && *lower <= 0.0 {
                    return Err(DomainError::ValidationFailed(format!(
                        "parameter '{name}' is log-scaled but its lower bound is not positive"
                    )));
                }
            }
            Self::Int { lower, upper } => {
                if lower > upper {
                    return Err(DomainError::ValidationFailed(format!(
                        "parameter '{name}' has invalid bounds [{lower}, {upper}]"
                    )));
                }
            }
            Self::Choice { values } => {
                if values.is_empty() {
                    return Err(DomainError::ValidationFailed(format!(
                        "choice parameter '{name}' has no values"
                    )));
                }
            }
            Self::Fixed { .. } => {}
        }
        Ok(())
    }

    /// Number of distinct values, or `None` for a continuous range.
    pub fn cardinality(&self) -> Option<u128> {
        match self {
            Self::Float { lower, upper, .. } => (upper <= lower).then_some(1),
            Self::Int { lower, upper } => Some(u128::from(upper.abs_diff(*lower)) + 1),
            Self::Choice { values } => Some(values.len() as u128),
            Self::Fixed { .. } => Some(1),
        }
    }

    /// Whether `value` lies in the domain.
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (Self::Float { lower, upper, .. }, v) => {
                v.as_f64().is_some_and(|x| x >= *lower && x <= *upper)
            }
            (Self::Int { lower, upper }, ParameterValue::Int(v)) => v >= lower && v <= upper,
            (Self::Int { .. }, _) => false,
            (Self::Choice { values }, v) => values.contains(v),
            (Self::Fixed { value: fixed }, v) => fixed == v,
        }
    }

    /// Draw a uniform sample from the domain.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> ParameterValue {
        match self {
            Self::Float {
                lower,
                upper,
                log_scale,
            } => {
                if upper <= lower {
                    return ParameterValue::Float(*lower);
                }
                let value = if *log_scale {
                    rng.gen_range(lower.ln()..=upper.ln()).exp()
                } else {
                    rng.gen_range(*lower..=*upper)
                };
                ParameterValue::Float(value.clamp(*lower, *upper))
            }
            Self::Int { lower, upper } => ParameterValue::Int(rng.gen_range(*lower..=*upper)),
            Self::Choice { values } => values[rng.gen_range(0..values.len())].clone(),
            Self::Fixed { value } => value.clone(),
        }
    }

    /// Draw a sample near `current`, moving at most `scale` of the range.
    ///
    /// Choice parameters keep their value with probability `1 - scale`.
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn perturb<R: Rng>(&self, current: &ParameterValue, scale: f64, rng: &mut R) -> ParameterValue {
        match self {
            Self::Float {
                lower,
                upper,
                log_scale,
            } => {
                let Some(x) = current.as_f64() else {
                    return self.sample(rng);
                };
                let value = if *log_scale {
                    let (lo, hi) = (lower.ln(), upper.ln());
                    let step = (hi - lo) * scale;
                    (x.max(*lower).ln() + rng.gen_range(-step..=step)).clamp(lo, hi).exp()
                } else {
                    let step = (upper - lower) * scale;
                    x + rng.gen_range(-step..=step)
                };
                ParameterValue::Float(value.clamp(*lower, *upper))
            }
            Self::Int { lower, upper } => {
                let Some(x) = current.as_i64() else {
                    return self.sample(rng);
                };
                let step = (((upper - lower) as f64) * scale).ceil().max(1.0) as i64;
                ParameterValue::Int((x + rng.gen_range(-step..=step)).clamp(*lower, *upper))
            }
            Self::Choice { .. } => {
                if rng.gen_bool(scale.clamp(0.0, 1.0)) {
                    self.sample(rng)
                } else {
                    current.clone()
                }
            }
            Self::Fixed { value } => value.clone(),
        }
    }
}

/// Named parameter domains making up the experiment's search space.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    parameters: BTreeMap<String, ParameterDomain>,
}

impl SearchSpace {
    /// Empty search space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, replacing any previous domain with the same name.
    pub fn with_parameter(mut self, name: impl Into<String>, domain: ParameterDomain) -> Self {
        self.parameters.insert(name.into(), domain);
        self
    }

    /// Domain of one parameter.
    pub fn get(&self, name: &str) -> Option<&ParameterDomain> {
        self.parameters.get(name)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Whether the space has no parameters.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }

    /// Parameters in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterDomain)> {
        self.parameters.iter()
    }

    /// Number of parameters that can take more than one value.
    pub fn tunable_count(&self) -> usize {
        self.parameters.values().filter(|d| d.is_tunable()).count()
    }

    /// Number of distinct parameterizations, or `None` when any parameter
    /// is continuous.
    pub fn cardinality(&self) -> Option<u128> {
        self.parameters
            .values()
            .try_fold(1_u128, |acc, domain| Some(acc.saturating_mul(domain.cardinality()?)))
    }

    /// Validate every domain.
    pub fn validate(&self) -> DomainResult<()> {
        for (name, domain) in &self.parameters {
            domain.validate(name)?;
        }
        Ok(())
    }

    /// Check that `parameters` belongs to the space.
    ///
    /// Unknown names are always rejected; missing names are rejected only
    /// when `require_all` is set.
    pub fn check_membership(&self, parameters: &Parameterization, require_all: bool) -> DomainResult<()> {
        for (name, value) in parameters {
            let domain = self.parameters.get(name).ok_or_else(|| {
                DomainError::ValidationFailed(format!("parameter '{name}' is not in the search space"))
            })?;
            if !domain.contains(value) {
                return Err(DomainError::ValidationFailed(format!(
                    "value {value} is outside the domain of parameter '{name}'"
                )));
            }
        }
        if require_all
            && let Some(missing) = self.parameters.keys().find(|name| !parameters.contains_key(*name))
        {
            return Err(DomainError::ValidationFailed(format!(
                "parameter '{missing}' is missing"
            )));
        }
        Ok(())
    }

    /// Draw a full parameterization, holding `fixed` entries constant.
    pub fn sample<R: Rng>(&self, fixed: Option<&Parameterization>, rng: &mut R) -> Parameterization {
        self.parameters
            .iter()
            .map(|(name, domain)| {
                let value = fixed
                    .and_then(|f| f.get(name).cloned())
                    .unwrap_or_else(|| domain.sample(rng));
                (name.clone(), value)
            })
            .collect()
    }

    /// Draw a parameterization near `center`, holding `fixed` entries constant.
    pub fn perturb<R: Rng>(
        &self,
        center: &Parameterization,
        fixed: Option<&Parameterization>,
        scale: f64,
        rng: &mut R,
    ) -> Parameterization {
        self.parameters
            .iter()
            .map(|(name, domain)| {
                let value = match (fixed.and_then(|f| f.get(name)), center.get(name)) {
                    (Some(v), _) => v.clone(),
                    (None, Some(current)) => domain.perturb(current, scale, rng),
                    (None, None) => domain.sample(rng),
                };
                (name.clone(), value)
            })
            .collect()
    }
}
