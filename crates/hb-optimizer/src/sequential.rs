//! Sequential model-based optimization.
//!
//! The surrogate is an inverse-distance-weighted nearest-neighbour regressor
//! over every observation told so far. Candidates are scored with a lower
//! confidence bound: predicted FOM minus an exploration bonus proportional
//! to the distance to the closest known point. Within one `ask` batch, each
//! pick is added as a "liar" at the current best FOM so the rest of the batch
//! spreads out instead of piling onto the same optimum.

use hb_types::{BestResult, ConfigError, HbResult, ParameterVector, SearchSpace};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::sampling::{distance, perturb_value, sample_uniform};
use crate::strategy::{validate_tell, SearchStrategy, StepContext, StrategyKind};

/// Tuning knobs for [`SequentialStrategy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequentialConfig {
    /// Seed for the internal generator.
    pub seed: u64,
    /// Purely random proposals before the surrogate kicks in.
    pub n_initial: usize,
    /// Random candidates scored per proposal.
    pub candidates: usize,
    /// Weight of the distance bonus in the acquisition.
    pub exploration: f64,
    /// Neighbours consulted by the surrogate.
    pub neighbours: usize,
}

impl Default for SequentialConfig {
    fn default() -> Self {
        Self {
            seed: 13579,
            n_initial: 5,
            candidates: 256,
            exploration: 1.0,
            neighbours: 5,
        }
    }
}

impl SequentialConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.candidates == 0 {
            return Err(invalid("candidates", "must be at least 1"));
        }
        if self.neighbours == 0 {
            return Err(invalid("neighbours", "must be at least 1"));
        }
        if !self.exploration.is_finite() || self.exploration < 0.0 {
            return Err(invalid("exploration", "must be finite and non-negative"));
        }
        Ok(())
    }
}

fn invalid(parameter: &str, message: &str) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        message: message.to_string(),
    }
}

/// Model-based strategy that proposes a handful of candidates at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequentialStrategy {
    space: SearchSpace,
    config: SequentialConfig,
    rng: ChaCha8Rng,
    observations: Vec<(ParameterVector, f64)>,
    best: Option<BestResult>,
}

impl SequentialStrategy {
    pub fn new(space: SearchSpace, config: SequentialConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            space,
            config,
            rng,
            observations: Vec::new(),
            best: None,
        }
    }

    pub fn observations(&self) -> &[(ParameterVector, f64)] {
        &self.observations
    }

    pub fn best(&self) -> Option<&BestResult> {
        self.best.as_ref()
    }

    fn propose(&mut self, liars: &[(ParameterVector, f64)]) -> ParameterVector {
        let known = self.observations.len() + liars.len();
        if known < self.config.n_initial || self.observations.is_empty() {
            return sample_uniform(&self.space, &mut self.rng);
        }

        let points: Vec<&(ParameterVector, f64)> =
            self.observations.iter().chain(liars.iter()).collect();
        let spread = spread(&points);

        let mut candidates: Vec<ParameterVector> = (0..self.config.candidates)
            .map(|_| sample_uniform(&self.space, &mut self.rng))
            .collect();

        // Local moves around the current leaders.
        let mut ranked: Vec<&(ParameterVector, f64)> = self.observations.iter().collect();
        ranked.sort_by(|a, b| a.1.total_cmp(&b.1));
        for (leader, _) in ranked.into_iter().take(3) {
            for _ in 0..(self.config.candidates / 8).max(1) {
                let moved: Vec<_> = self
                    .space
                    .dimensions
                    .iter()
                    .zip(leader.values())
                    .map(|(dim, v)| perturb_value(dim, v, 0.1, &mut self.rng))
                    .collect();
                candidates.push(moved.into());
            }
        }

        let mut best_score = f64::INFINITY;
        let mut chosen = None;
        for candidate in candidates {
            let score = self.acquisition(&candidate, &points, spread);
            if score < best_score {
                best_score = score;
                chosen = Some(candidate);
            }
        }
        chosen.unwrap_or_else(|| sample_uniform(&self.space, &mut self.rng))
    }

    fn acquisition(
        &self,
        candidate: &ParameterVector,
        points: &[&(ParameterVector, f64)],
        spread: f64,
    ) -> f64 {
        let mut neighbours: Vec<(f64, f64)> = points
            .iter()
            .map(|(x, y)| (distance(&self.space, candidate, x), *y))
            .collect();
        neighbours.sort_by(|a, b| a.0.total_cmp(&b.0));
        neighbours.truncate(self.config.neighbours);

        let nearest = neighbours.first().map(|n| n.0).unwrap_or(1.0);
        let (weighted, total) = neighbours.iter().fold((0.0, 0.0), |(acc, w_sum), (d, y)| {
            let w = 1.0 / (d * d + 1e-9);
            (acc + w * y, w_sum + w)
        });
        let predicted = if total > 0.0 { weighted / total } else { 0.0 };

        predicted - self.config.exploration * spread * nearest
    }

    fn refresh_best(&mut self) -> Option<BestResult> {
        let (params, fom) = self
            .observations
            .iter()
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        let best = BestResult {
            params: params.clone(),
            fom: *fom,
        };
        self.best = Some(best.clone());
        Some(best)
    }
}

/// Standard deviation of the observed FOMs, or 1 when it carries no scale.
fn spread(points: &[&(ParameterVector, f64)]) -> f64 {
    if points.len() < 2 {
        return 1.0;
    }
    let n = points.len() as f64;
    let mean = points.iter().map(|p| p.1).sum::<f64>() / n;
    let var = points.iter().map(|p| (p.1 - mean).powi(2)).sum::<f64>() / n;
    let sd = var.sqrt();
    if sd > 0.0 {
        sd
    } else {
        1.0
    }
}

impl SearchStrategy for SequentialStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Sequential
    }

    fn name(&self) -> &str {
        "sequential"
    }

    fn ask(&mut self, hint: Option<usize>) -> Vec<ParameterVector> {
        let count = hint.unwrap_or(1).max(1);
        let liar_value = self.best.as_ref().map(|b| b.fom).unwrap_or(0.0);
        let mut liars: Vec<(ParameterVector, f64)> = Vec::with_capacity(count);
        for _ in 0..count {
            let next = self.propose(&liars);
            liars.push((next, liar_value));
        }
        debug!(count, observed = self.observations.len(), "sequential ask");
        liars.into_iter().map(|(x, _)| x).collect()
    }

    fn tell(
        &mut self,
        xs: &[ParameterVector],
        ys: &[f64],
        ctx: StepContext,
    ) -> HbResult<BestResult> {
        validate_tell(&self.space, xs, ys)?;
        self.observations
            .extend(xs.iter().cloned().zip(ys.iter().copied()));
        debug!(
            told = xs.len(),
            total = self.observations.len(),
            evaluation = ctx.evaluation,
            "sequential tell"
        );
        self.refresh_best()
            .ok_or_else(|| hb_types::internal_error!("no observation after tell"))
    }

    fn snapshot(&self) -> HbResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn restore(&mut self, blob: &[u8]) -> HbResult<()> {
        *self = serde_json::from_slice(blob)?;
        Ok(())
    }
}
