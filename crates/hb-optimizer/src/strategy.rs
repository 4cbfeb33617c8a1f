//! The ask/tell contract and the tagged union over its two variants.

use hb_types::{
    BestResult, ConfigError, ContractError, HbError, HbResult, ParameterVector, SearchSpace,
};
use serde::{Deserialize, Serialize};

use crate::population::{PopulationConfig, PopulationStrategy};
use crate::sequential::{SequentialConfig, SequentialStrategy};

/// Which family a strategy belongs to. Drives the coordinator's hinting,
/// look-ahead and stopping policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Proposes a few candidates at a time and refits after every fold.
    Sequential,
    /// Proposes a whole generation at once.
    Population,
}

/// Position in the run at which a `tell` happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepContext {
    /// Index of the evaluation being scheduled when the fold happened.
    pub evaluation: usize,
}

impl StepContext {
    pub fn new(evaluation: usize) -> Self {
        Self { evaluation }
    }

    /// Generation this evaluation falls in for a population of `size`.
    pub fn generation(&self, size: usize) -> usize {
        self.evaluation / size.max(1)
    }
}

/// Common contract for all search strategies.
///
/// The coordinator is the sole owner; nothing here needs to be thread-safe
/// beyond being movable into the coordinator.
pub trait SearchStrategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Human-readable strategy name.
    fn name(&self) -> &str;

    /// Declare the run budget in `steps` and return the number of individual
    /// evaluations it amounts to.
    fn plan(&mut self, steps: usize) -> usize {
        steps
    }

    /// Hint passed to [`SearchStrategy::ask`] when the coordinator's
    /// look-ahead buffer runs dry.
    fn ask_hint(&self, lookahead: usize) -> Option<usize> {
        Some(lookahead.max(1))
    }

    /// Propose the next candidates, in the order they should be dispatched.
    fn ask(&mut self, hint: Option<usize>) -> Vec<ParameterVector>;

    /// Fold observed figures of merit in and report the best point so far.
    fn tell(
        &mut self,
        xs: &[ParameterVector],
        ys: &[f64],
        ctx: StepContext,
    ) -> HbResult<BestResult>;

    /// Opaque snapshot of the internal state.
    fn snapshot(&self) -> HbResult<Vec<u8>>;

    /// Replace the internal state wholesale with a snapshot.
    fn restore(&mut self, blob: &[u8]) -> HbResult<()>;
}

/// Reject a `tell` batch that breaks the contract.
pub(crate) fn validate_tell(
    space: &SearchSpace,
    xs: &[ParameterVector],
    ys: &[f64],
) -> HbResult<()> {
    if xs.len() != ys.len() {
        return Err(ContractError::MismatchedTell {
            x_len: xs.len(),
            y_len: ys.len(),
        }
        .into());
    }
    if xs.is_empty() {
        return Err(ContractError::EmptyTell.into());
    }
    for x in xs {
        space
            .check(x)
            .map_err(|message| ContractError::MalformedCandidate { message })?;
    }
    if let Some(y) = ys.iter().find(|y| !y.is_finite()) {
        return Err(ContractError::NonFiniteFom { value: *y }.into());
    }
    Ok(())
}

/// Strategy selection as it appears in run configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    Sequential(SequentialConfig),
    Population(PopulationConfig),
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self::Sequential(SequentialConfig::default())
    }
}

impl StrategyConfig {
    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::Sequential(_) => StrategyKind::Sequential,
            Self::Population(_) => StrategyKind::Population,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Sequential(cfg) => cfg.validate(),
            Self::Population(cfg) => cfg.validate(),
        }
    }
}

/// The two strategy variants behind one value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Sequential(SequentialStrategy),
    Population(PopulationStrategy),
}

impl Strategy {
    /// Build a strategy over `space`. Invalid declarations are rejected here,
    /// before any work is dispatched.
    pub fn new(space: SearchSpace, config: &StrategyConfig) -> HbResult<Self> {
        space.validate()?;
        config.validate()?;
        Ok(match config {
            StrategyConfig::Sequential(cfg) => {
                Self::Sequential(SequentialStrategy::new(space, cfg.clone()))
            }
            StrategyConfig::Population(cfg) => {
                Self::Population(PopulationStrategy::new(space, cfg.clone()))
            }
        })
    }

    fn inner(&self) -> &dyn SearchStrategy {
        match self {
            Self::Sequential(s) => s,
            Self::Population(p) => p,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn SearchStrategy {
        match self {
            Self::Sequential(s) => s,
            Self::Population(p) => p,
        }
    }
}

impl SearchStrategy for Strategy {
    fn kind(&self) -> StrategyKind {
        self.inner().kind()
    }

    fn name(&self) -> &str {
        self.inner().name()
    }

    fn plan(&mut self, steps: usize) -> usize {
        self.inner_mut().plan(steps)
    }

    fn ask_hint(&self, lookahead: usize) -> Option<usize> {
        self.inner().ask_hint(lookahead)
    }

    fn ask(&mut self, hint: Option<usize>) -> Vec<ParameterVector> {
        self.inner_mut().ask(hint)
    }

    fn tell(
        &mut self,
        xs: &[ParameterVector],
        ys: &[f64],
        ctx: StepContext,
    ) -> HbResult<BestResult> {
        self.inner_mut().tell(xs, ys, ctx)
    }

    fn snapshot(&self) -> HbResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    fn restore(&mut self, blob: &[u8]) -> HbResult<()> {
        let restored: Strategy = serde_json::from_slice(blob)?;
        if restored.kind() != self.kind() {
            return Err(HbError::Config(ConfigError::Other(format!(
                "checkpoint holds a {} strategy, run is configured for {}",
                restored.name(),
                self.name()
            ))));
        }
        *self = restored;
        Ok(())
    }
}
