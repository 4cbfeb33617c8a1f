//! Search space declarations.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::errors::ConfigError;
use crate::params::{ParamValue, ParameterVector};

/// A single dimension of the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    /// Human-readable name (e.g. "learning_rate").
    pub name: String,
    /// The domain values are drawn from.
    pub kind: DimensionKind,
}

/// Domain of a dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DimensionKind {
    /// Continuous range [low, high].
    Real { low: f64, high: f64 },
    /// Continuous range [low, high] searched in log-space.
    LogReal { low: f64, high: f64 },
    /// Integer range [low, high] inclusive.
    Integer { low: i64, high: i64 },
    /// Unordered set of labels.
    Categorical { categories: Vec<String> },
}

impl Dimension {
    /// Check the declaration itself. Called once at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: String| ConfigError::InvalidDimension {
            name: self.name.clone(),
            message,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".into()));
        }
        match &self.kind {
            DimensionKind::Real { low, high } => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(invalid(format!("bounds must be finite, got [{low}, {high}]")));
                }
                if low >= high {
                    return Err(invalid(format!("low {low} must be below high {high}")));
                }
                if !(high - low).is_finite() {
                    return Err(invalid(format!("range [{low}, {high}] is too wide")));
                }
            }
            DimensionKind::LogReal { low, high } => {
                if !low.is_finite() || !high.is_finite() || *low <= 0.0 {
                    return Err(invalid(format!(
                        "log bounds must be finite and positive, got [{low}, {high}]"
                    )));
                }
                if low >= high {
                    return Err(invalid(format!("low {low} must be below high {high}")));
                }
            }
            DimensionKind::Integer { low, high } => {
                if low > high {
                    return Err(invalid(format!("low {low} must not exceed high {high}")));
                }
                if high.checked_sub(*low).is_none() {
                    return Err(invalid(format!("range [{low}, {high}] is too wide")));
                }
            }
            DimensionKind::Categorical { categories } => {
                if categories.is_empty() {
                    return Err(invalid("needs at least one category".into()));
                }
                let unique: HashSet<&String> = categories.iter().collect();
                if unique.len() != categories.len() {
                    return Err(invalid("categories must be unique".into()));
                }
            }
        }
        Ok(())
    }

    /// Whether `value` lies in this dimension's domain.
    pub fn contains(&self, value: &ParamValue) -> bool {
        match (&self.kind, value) {
            (DimensionKind::Real { low, high }, ParamValue::Real(v))
            | (DimensionKind::LogReal { low, high }, ParamValue::Real(v)) => {
                v.is_finite() && *v >= *low && *v <= *high
            }
            (DimensionKind::Integer { low, high }, ParamValue::Integer(v)) => {
                *v >= *low && *v <= *high
            }
            (DimensionKind::Categorical { categories }, ParamValue::Categorical(v)) => {
                categories.contains(v)
            }
            _ => false,
        }
    }

    /// Number of categories, or `None` for ordered dimensions.
    pub fn cardinality(&self) -> Option<usize> {
        match &self.kind {
            DimensionKind::Categorical { categories } => Some(categories.len()),
            _ => None,
        }
    }

    /// Map an ordered value into [0, 1]. Categorical values have no position
    /// and return `None`.
    pub fn to_unit(&self, value: &ParamValue) -> Option<f64> {
        let unit = match (&self.kind, value) {
            (DimensionKind::Real { low, high }, ParamValue::Real(v)) => (v - low) / (high - low),
            (DimensionKind::LogReal { low, high }, ParamValue::Real(v)) => {
                (v.ln() - low.ln()) / (high.ln() - low.ln())
            }
            (DimensionKind::Integer { low, high }, ParamValue::Integer(v)) => {
                if high == low {
                    0.5
                } else {
                    (i128::from(*v) - i128::from(*low)) as f64
                        / (i128::from(*high) - i128::from(*low)) as f64
                }
            }
            _ => return None,
        };
        Some(unit.clamp(0.0, 1.0))
    }

    /// Inverse of [`Dimension::to_unit`] for ordered dimensions.
    ///
    /// For a categorical dimension the unit interval is split into equal
    /// bins, one per category.
    pub fn from_unit(&self, unit: f64) -> ParamValue {
        let u = unit.clamp(0.0, 1.0);
        match &self.kind {
            DimensionKind::Real { low, high } => {
                ParamValue::Real((low + u * (high - low)).clamp(*low, *high))
            }
            DimensionKind::LogReal { low, high } => {
                let log_value = low.ln() + u * (high.ln() - low.ln());
                ParamValue::Real(log_value.exp().clamp(*low, *high))
            }
            DimensionKind::Integer { low, high } => {
                let span = (i128::from(*high) - i128::from(*low)) as f64;
                let value = i128::from(*low) + (u * span).round() as i128;
                ParamValue::Integer(value.clamp(i128::from(*low), i128::from(*high)) as i64)
            }
            DimensionKind::Categorical { categories } => {
                let idx = ((u * categories.len() as f64) as usize).min(categories.len() - 1);
                ParamValue::Categorical(categories[idx].clone())
            }
        }
    }
}

/// The full search space: an ordered list of dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub dimensions: Vec<Dimension>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self {
            dimensions: Vec::new(),
        }
    }

    pub fn add_real(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Real { low, high },
        });
        self
    }

    pub fn add_log_real(mut self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::LogReal { low, high },
        });
        self
    }

    pub fn add_integer(mut self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Integer { low, high },
        });
        self
    }

    pub fn add_categorical<I, S>(mut self, name: impl Into<String>, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dimensions.push(Dimension {
            name: name.into(),
            kind: DimensionKind::Categorical {
                categories: categories.into_iter().map(Into::into).collect(),
            },
        });
        self
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    /// Reject a malformed declaration. Must pass before any strategy is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimensions.is_empty() {
            return Err(ConfigError::EmptySearchSpace);
        }
        let mut seen = HashSet::new();
        for dim in &self.dimensions {
            dim.validate()?;
            if !seen.insert(dim.name.as_str()) {
                return Err(ConfigError::DuplicateDimension {
                    name: dim.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Explain why `vector` does not belong to this space, if it doesn't.
    pub fn check(&self, vector: &ParameterVector) -> Result<(), String> {
        if vector.len() != self.dimensions.len() {
            return Err(format!(
                "expected {} values, got {}",
                self.dimensions.len(),
                vector.len()
            ));
        }
        for (dim, value) in self.dimensions.iter().zip(vector.values()) {
            if !dim.contains(value) {
                return Err(format!("value {value} is outside dimension {}", dim.name));
            }
        }
        Ok(())
    }

    pub fn contains(&self, vector: &ParameterVector) -> bool {
        self.check(vector).is_ok()
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}
