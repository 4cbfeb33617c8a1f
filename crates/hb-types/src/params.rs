//! Candidate parameter vectors, figures of merit and observations.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::errors::ContractError;

/// A concrete value along one search dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Integer(i64),
    Real(f64),
    Categorical(String),
}

impl ParamValue {
    /// Numeric view used in history records; categorical values have none.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Integer(v) => Some(*v as f64),
            Self::Real(v) => Some(*v),
            Self::Categorical(_) => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Debug keeps the trailing ".0" so 1.0 and 1 never share a form.
            Self::Real(v) => write!(f, "{v:?}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Categorical(v) => write!(f, "{v:?}"),
        }
    }
}

/// One candidate: a value per search dimension, in declaration order.
///
/// Immutable once built. Equality is structural; the content hash exists for
/// history traceability, not for de-duplication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterVector(Vec<ParamValue>);

impl ParameterVector {
    pub fn new(values: Vec<ParamValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[ParamValue] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical string form, e.g. `[0.25, 3, "a"]`.
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Hex SHA-256 of [`ParameterVector::canonical`].
    pub fn content_hash(&self) -> String {
        let digest = Sha256::digest(self.canonical().as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Display for ParameterVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, "]")
    }
}

impl From<Vec<ParamValue>> for ParameterVector {
    fn from(values: Vec<ParamValue>) -> Self {
        Self::new(values)
    }
}

/// Scalar score of an evaluated candidate. Lower is better; always finite.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct FigureOfMerit(f64);

impl FigureOfMerit {
    pub fn new(value: f64) -> Result<Self, ContractError> {
        if value.is_finite() {
            Ok(Self(value))
        } else {
            Err(ContractError::NonFiniteFom { value })
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for FigureOfMerit {
    type Error = ContractError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<FigureOfMerit> for f64 {
    fn from(fom: FigureOfMerit) -> Self {
        fom.0
    }
}

impl fmt::Display for FigureOfMerit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A harvested evaluation waiting to be told to the search strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub params: ParameterVector,
    pub fom: FigureOfMerit,
    /// Block that produced the result.
    pub block: usize,
}

/// Best candidate reported by the search strategy after a `tell`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestResult {
    pub params: ParameterVector,
    pub fom: f64,
}
