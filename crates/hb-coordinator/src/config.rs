//! Run parameters for a search.

use chrono::{DateTime, Utc};
use hb_comm::BlockLayout;
use hb_optimizer::StrategyConfig;
use hb_types::{ConfigError, HbResult, SearchSpace};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

use crate::objective::ObjectiveConfig;

/// Unique run identifier.
pub type RunId = Uuid;

/// Everything needed to start a coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub id: RunId,

    /// Names the checkpoint and history files.
    pub label: String,

    /// Number of worker blocks.
    pub num_blocks: usize,

    /// Total ranks including the coordinator.
    pub world_size: usize,

    pub search_space: SearchSpace,

    pub strategy: StrategyConfig,

    /// Evaluations for the sequential strategy, generations for the
    /// population strategy.
    pub steps: usize,

    /// Stop once the best FOM drops strictly below this value.
    pub target_fom: Option<f64>,

    /// Candidates requested per sequential `ask`.
    pub lookahead: usize,

    /// Where checkpoint and history files go.
    pub output_dir: PathBuf,

    /// Upper bound on each wait while draining in-flight blocks.
    pub drain_interval_ms: u64,

    /// Give up on a block that has not answered for this long. Unset means
    /// wait forever.
    pub block_timeout_ms: Option<u64>,

    /// Checkpoint to restore before the first `ask`.
    pub resume_from: Option<PathBuf>,

    /// Evaluator used by the in-process cluster.
    pub objective: ObjectiveConfig,

    pub created_at: DateTime<Utc>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            label: "run".to_string(),
            num_blocks: 1,
            world_size: 2,
            search_space: SearchSpace::new(),
            strategy: StrategyConfig::default(),
            steps: 10,
            target_fom: None,
            lookahead: 1,
            output_dir: PathBuf::from("."),
            drain_interval_ms: 5_000,
            block_timeout_ms: None,
            resume_from: None,
            objective: ObjectiveConfig::default(),
            created_at: Utc::now(),
        }
    }
}

impl RunConfig {
    pub fn new(label: impl Into<String>, search_space: SearchSpace) -> Self {
        Self {
            label: label.into(),
            search_space,
            ..Self::default()
        }
    }

    /// Load a JSON run description.
    pub fn from_file(path: impl AsRef<Path>) -> HbResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn with_blocks(mut self, num_blocks: usize, world_size: usize) -> Self {
        self.num_blocks = num_blocks;
        self.world_size = world_size;
        self
    }

    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_steps(mut self, steps: usize) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_target_fom(mut self, target: f64) -> Self {
        self.target_fom = Some(target);
        self
    }

    pub fn with_lookahead(mut self, lookahead: usize) -> Self {
        self.lookahead = lookahead;
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_drain_interval(mut self, interval: Duration) -> Self {
        self.drain_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_block_timeout(mut self, timeout: Duration) -> Self {
        self.block_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_resume(mut self, checkpoint: impl Into<PathBuf>) -> Self {
        self.resume_from = Some(checkpoint.into());
        self
    }

    pub fn with_objective(mut self, objective: ObjectiveConfig) -> Self {
        self.objective = objective;
        self
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn block_timeout(&self) -> Option<Duration> {
        self.block_timeout_ms.map(Duration::from_millis)
    }

    pub fn layout(&self) -> Result<BlockLayout, ConfigError> {
        BlockLayout::new(self.num_blocks, self.world_size)
    }

    /// Every startup check. A run that passes cannot fail on configuration
    /// later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.label.is_empty() || self.label.contains(['/', '\\']) {
            return Err(invalid("label", format!("{:?} is not a file-name fragment", self.label)));
        }
        self.search_space.validate()?;
        self.strategy.validate()?;
        self.layout()?;
        if self.steps == 0 {
            return Err(invalid("steps", "must be at least 1".to_string()));
        }
        if self.lookahead == 0 {
            return Err(invalid("lookahead", "must be at least 1".to_string()));
        }
        if let Some(target) = self.target_fom {
            if !target.is_finite() {
                return Err(invalid("target_fom", format!("must be finite, got {target}")));
            }
        }
        if self.block_timeout_ms == Some(0) {
            return Err(invalid("block_timeout_ms", "must be positive".to_string()));
        }
        Ok(())
    }
}

fn invalid(parameter: &str, message: String) -> ConfigError {
    ConfigError::InvalidParameter {
        parameter: parameter.to_string(),
        message,
    }
}
