//! Synthetic evaluators for running the coordinator without a training stack.

use hb_types::{HbResult, ParamValue, ParameterVector, SearchSpace};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

use crate::worker::{BlockContext, Evaluator, Work};

/// Which synthetic figure of merit to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    /// Mean squared distance from the centre of the normalized space;
    /// categorical dimensions score 0 on their first category, 1 otherwise.
    Sphere,
    /// Standard normal noise, independent of the candidate.
    Noise,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectiveConfig {
    pub kind: ObjectiveKind,
    /// Simulated training time per evaluation.
    pub delay_ms: u64,
    pub seed: u64,
}

impl Default for ObjectiveConfig {
    fn default() -> Self {
        Self {
            kind: ObjectiveKind::Sphere,
            delay_ms: 0,
            seed: 13579,
        }
    }
}

/// Evaluator computing an [`ObjectiveKind`] over the search space.
pub struct SyntheticEvaluator {
    space: SearchSpace,
    config: ObjectiveConfig,
    rng: StdRng,
}

impl SyntheticEvaluator {
    pub fn new(space: SearchSpace, config: ObjectiveConfig, rank: usize) -> Self {
        let rng = StdRng::seed_from_u64(config.seed.wrapping_add(rank as u64));
        Self { space, config, rng }
    }

    fn sphere(&self, params: &ParameterVector) -> f64 {
        if params.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .space
            .dimensions
            .iter()
            .zip(params.values())
            .map(|(dim, value)| match (dim.to_unit(value), value) {
                (Some(unit), _) => (unit - 0.5).powi(2),
                (None, ParamValue::Categorical(label)) => {
                    match dim.from_unit(0.0) {
                        ParamValue::Categorical(first) if &first == label => 0.0,
                        _ => 1.0,
                    }
                }
                (None, _) => 1.0,
            })
            .sum();
        total / params.len() as f64
    }
}

/// Pull a parameter vector back out of a model specification built by
/// [`crate::coordinator::params_model_spec`].
fn params_from_spec(spec: &serde_json::Value) -> HbResult<ParameterVector> {
    let params = spec
        .get("params")
        .ok_or_else(|| hb_types::internal_error!("model specification has no params field"))?;
    Ok(serde_json::from_value(params.clone())?)
}

impl Evaluator for SyntheticEvaluator {
    fn evaluate(&mut self, work: &Work, _ctx: &BlockContext) -> HbResult<f64> {
        if self.config.delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.delay_ms));
        }
        match self.config.kind {
            ObjectiveKind::Noise => Ok(StandardNormal.sample(&mut self.rng)),
            ObjectiveKind::Sphere => {
                let params = match work {
                    Work::Params(params) => params.clone(),
                    Work::ModelSpec(spec) => params_from_spec(spec)?,
                };
                Ok(self.sphere(&params))
            }
        }
    }
}
