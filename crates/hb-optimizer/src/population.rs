//! Population-based (genetic) search.
//!
//! Each `ask` returns a whole generation. Parents are the best individuals
//! told so far across every generation, so a new generation can be bred
//! even while stragglers of the previous one are still being evaluated.

use hb_types::{BestResult, ConfigError, HbResult, ParameterVector, SearchSpace};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::sampling::{perturb_value, sample_dimension, sample_uniform};
use crate::strategy::{validate_tell, SearchStrategy, StepContext, StrategyKind};

/// Tuning knobs for [`PopulationStrategy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    pub population_size: usize,
    pub seed: u64,
    /// Per-gene mutation probability.
    pub mutation_rate: f64,
    /// Contestants drawn per parent selection.
    pub tournament_size: usize,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            population_size: 10,
            seed: 13579,
            mutation_rate: 0.2,
            tournament_size: 3,
        }
    }
}

impl PopulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.population_size == 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "population_size".into(),
                message: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.mutation_rate) {
            return Err(ConfigError::InvalidParameter {
                parameter: "mutation_rate".into(),
                message: format!("must lie in [0, 1], got {}", self.mutation_rate),
            });
        }
        if self.tournament_size == 0 {
            return Err(ConfigError::InvalidParameter {
                parameter: "tournament_size".into(),
                message: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// An evaluated member of some generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Individual {
    pub params: ParameterVector,
    pub fom: f64,
    pub generation: usize,
}

/// Genetic strategy: tournament selection, uniform crossover, per-gene
/// mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopulationStrategy {
    space: SearchSpace,
    config: PopulationConfig,
    rng: ChaCha8Rng,
    generation_budget: Option<usize>,
    generations_asked: usize,
    generation: usize,
    individuals: Vec<Individual>,
    best: Option<BestResult>,
}

impl PopulationStrategy {
    pub fn new(space: SearchSpace, config: PopulationConfig) -> Self {
        let rng = ChaCha8Rng::seed_from_u64(config.seed);
        Self {
            space,
            config,
            rng,
            generation_budget: None,
            generations_asked: 0,
            generation: 0,
            individuals: Vec::new(),
            best: None,
        }
    }

    pub fn population_size(&self) -> usize {
        self.config.population_size
    }

    /// Generation of the most recent `tell`.
    pub fn generation(&self) -> usize {
        self.generation
    }

    pub fn generations_asked(&self) -> usize {
        self.generations_asked
    }

    pub fn generation_budget(&self) -> Option<usize> {
        self.generation_budget
    }

    pub fn individuals(&self) -> &[Individual] {
        &self.individuals
    }

    fn parents(&self) -> Vec<&Individual> {
        let mut ranked: Vec<&Individual> = self.individuals.iter().collect();
        ranked.sort_by(|a, b| a.fom.total_cmp(&b.fom));
        ranked.truncate(self.config.population_size);
        ranked
    }

    fn tournament<'a>(&mut self, parents: &[&'a Individual]) -> &'a Individual {
        let mut winner = parents[self.rng.gen_range(0..parents.len())];
        for _ in 1..self.config.tournament_size {
            let contender = parents[self.rng.gen_range(0..parents.len())];
            if contender.fom < winner.fom {
                winner = contender;
            }
        }
        winner
    }

    fn breed(&mut self, parents: &[&Individual]) -> ParameterVector {
        let mother = self.tournament(parents).params.clone();
        let father = self.tournament(parents).params.clone();
        let mut genes = Vec::with_capacity(self.space.len());
        for (idx, dim) in self.space.dimensions.iter().enumerate() {
            let inherited = if self.rng.gen_bool(0.5) {
                &mother.values()[idx]
            } else {
                &father.values()[idx]
            };
            let gene = if self.rng.gen::<f64>() < self.config.mutation_rate {
                if dim.cardinality().is_some() {
                    sample_dimension(dim, &mut self.rng)
                } else {
                    perturb_value(dim, inherited, 0.2, &mut self.rng)
                }
            } else {
                inherited.clone()
            };
            genes.push(gene);
        }
        genes.into()
    }
}

impl SearchStrategy for PopulationStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Population
    }

    fn name(&self) -> &str {
        "population"
    }

    fn plan(&mut self, steps: usize) -> usize {
        self.generation_budget = Some(steps);
        steps * self.config.population_size
    }

    fn ask_hint(&self, _lookahead: usize) -> Option<usize> {
        None
    }

    fn ask(&mut self, _hint: Option<usize>) -> Vec<ParameterVector> {
        let size = self.config.population_size;
        let parents: Vec<Individual> = self.parents().into_iter().cloned().collect();
        let mut offspring: Vec<ParameterVector> = if parents.is_empty() {
            (0..size)
                .map(|_| sample_uniform(&self.space, &mut self.rng))
                .collect()
        } else {
            let refs: Vec<&Individual> = parents.iter().collect();
            (0..size).map(|_| self.breed(&refs)).collect()
        };
        offspring.shuffle(&mut self.rng);
        self.generations_asked += 1;
        debug!(
            generation = self.generations_asked - 1,
            parents = parents.len(),
            "population ask"
        );
        offspring
    }

    fn tell(
        &mut self,
        xs: &[ParameterVector],
        ys: &[f64],
        ctx: StepContext,
    ) -> HbResult<BestResult> {
        validate_tell(&self.space, xs, ys)?;
        let generation = ctx.generation(self.config.population_size);
        self.generation = generation;
        self.individuals
            .extend(xs.iter().zip(ys).map(|(x, y)| Individual {
                params: x.clone(),
                fom: *y,
                generation,
            }));

        let leader = self
            .individuals
            .iter()
            .min_by(|a, b| a.fom.total_cmp(&b.fom))
            .ok_or_else(|| hb_types::internal_error!("no individual after tell"))?;
        let best = BestResult {
            params: leader.params.clone(),
            fom: leader.fom,
        };
        if self.best.as_ref().map_or(true, |b| best.fom < b.fom) {
            info!(generation, fom = best.fom, "population improved");
        }
        self.best = Some(best.clone());
        Ok(best)
    }

    fn snapshot(&self) -> HbResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn restore(&mut self, blob: &[u8]) -> HbResult<()> {
        *self = serde_json::from_slice(blob)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> SearchSpace {
        SearchSpace::new()
            .add_real("x", -1.0, 1.0)
            .add_integer("depth", 1, 8)
            .add_categorical("act", ["relu", "tanh"])
    }

    fn config(size: usize) -> PopulationConfig {
        PopulationConfig {
            population_size: size,
            ..PopulationConfig::default()
        }
    }

    fn objective(v: &ParameterVector) -> f64 {
        let x = v.values()[0].as_f64().unwrap();
        let depth = v.values()[1].as_f64().unwrap();
        x * x + (depth - 4.0).abs() * 0.1
    }

    #[test]
    fn plan_multiplies_generations_by_population() {
        let mut s = PopulationStrategy::new(space(), config(3));
        assert_eq!(s.plan(2), 6);
        assert_eq!(s.generation_budget(), Some(2));
        assert_eq!(s.ask_hint(8), None);
    }

    #[test]
    fn ask_returns_a_full_generation() {
        let mut s = PopulationStrategy::new(space(), config(4));
        let generation = s.ask(None);
        assert_eq!(generation.len(), 4);
        assert!(generation.iter().all(|v| space().contains(v)));
        assert_eq!(s.generations_asked(), 1);
    }

    #[test]
    fn tell_tracks_generation_from_step_context() {
        let mut s = PopulationStrategy::new(space(), config(3));
        let xs = s.ask(None);
        s.tell(&xs[..1], &[0.5], StepContext::new(2)).unwrap();
        assert_eq!(s.generation(), 0);
        s.tell(&xs[1..], &[0.2, 0.9], StepContext::new(4)).unwrap();
        assert_eq!(s.generation(), 1);
        assert_eq!(s.individuals().len(), 3);
        assert_eq!(s.individuals()[2].generation, 1);
    }

    #[test]
    fn offspring_descend_from_evaluated_parents() {
        let mut s = PopulationStrategy::new(space(), config(6));
        let mut best = f64::INFINITY;
        for generation in 0..8 {
            let xs = s.ask(None);
            let ys: Vec<f64> = xs.iter().map(objective).collect();
            best = s.tell(&xs, &ys, StepContext::new(generation * 6)).unwrap().fom;
        }
        assert!(best < 0.2, "best fom after 8 generations was {best}");
        assert_eq!(s.generation(), 7);
    }

    #[test]
    fn restore_continues_identically() {
        let mut original = PopulationStrategy::new(space(), config(5));
        let xs = original.ask(None);
        let ys: Vec<f64> = xs.iter().map(objective).collect();
        original.tell(&xs, &ys, StepContext::new(4)).unwrap();

        let blob = original.snapshot().unwrap();
        let mut restored = PopulationStrategy::new(space(), config(5));
        restored.restore(&blob).unwrap();

        assert_eq!(original.ask(None), restored.ask(None));
    }
}
