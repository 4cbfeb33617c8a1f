//! Block-parallel search coordinator.
//!
//! A single coordinator (rank 0) asks a search strategy for candidates,
//! dispatches each to an idle block of worker ranks, harvests the figure of
//! merit reported by the block's authoritative rank and tells it back to the
//! strategy, checkpointing after every fold-in.

pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod objective;
pub mod persistence;
pub mod scheduler;
pub mod worker;

pub use cluster::LocalCluster;
pub use config::{RunConfig, RunId};
pub use coordinator::{params_model_spec, Coordinator, ModelBuilder, RunSummary};
pub use objective::{ObjectiveConfig, ObjectiveKind, SyntheticEvaluator};
pub use persistence::{HistoryRecord, RunFiles, RunHistory};
pub use scheduler::{InFlightJob, SchedulerState};
pub use worker::{BlockContext, Evaluator, Work, WorkerProcess, WorkerStats};
