//! Sampling and geometry helpers shared by both strategies.
//!
//! Every candidate is handled in the unit hypercube: ordered dimensions map
//! through [`Dimension::to_unit`], categorical ones compare by label.

use hb_types::{Dimension, DimensionKind, ParamValue, ParameterVector, SearchSpace};
use rand::Rng;

/// Independent uniform sample across the whole space.
pub(crate) fn sample_uniform<R: Rng>(space: &SearchSpace, rng: &mut R) -> ParameterVector {
    space
        .dimensions
        .iter()
        .map(|dim| sample_dimension(dim, rng))
        .collect::<Vec<_>>()
        .into()
}

pub(crate) fn sample_dimension<R: Rng>(dim: &Dimension, rng: &mut R) -> ParamValue {
    match &dim.kind {
        DimensionKind::Real { low, high } => ParamValue::Real(rng.gen_range(*low..=*high)),
        DimensionKind::LogReal { .. } => dim.from_unit(rng.gen_range(0.0..=1.0)),
        DimensionKind::Integer { low, high } => ParamValue::Integer(rng.gen_range(*low..=*high)),
        DimensionKind::Categorical { categories } => {
            let idx = rng.gen_range(0..categories.len());
            ParamValue::Categorical(categories[idx].clone())
        }
    }
}

/// Move one value by up to `scale` of its dimension's unit range. Categorical
/// values are redrawn with probability `scale`.
pub(crate) fn perturb_value<R: Rng>(
    dim: &Dimension,
    value: &ParamValue,
    scale: f64,
    rng: &mut R,
) -> ParamValue {
    match dim.to_unit(value) {
        Some(unit) => {
            let noise = rng.gen_range(-scale..=scale);
            dim.from_unit(unit + noise)
        }
        None => {
            if rng.gen::<f64>() < scale {
                sample_dimension(dim, rng)
            } else {
                value.clone()
            }
        }
    }
}

/// Normalized distance in [0, 1] between two candidates of the same space.
pub(crate) fn distance(space: &SearchSpace, a: &ParameterVector, b: &ParameterVector) -> f64 {
    if space.is_empty() {
        return 0.0;
    }
    let sum: f64 = space
        .dimensions
        .iter()
        .zip(a.values().iter().zip(b.values()))
        .map(|(dim, (va, vb))| match (dim.to_unit(va), dim.to_unit(vb)) {
            (Some(ua), Some(ub)) => (ua - ub).powi(2),
            _ => {
                if va == vb {
                    0.0
                } else {
                    1.0
                }
            }
        })
        .sum();
    (sum / space.len() as f64).sqrt()
}
