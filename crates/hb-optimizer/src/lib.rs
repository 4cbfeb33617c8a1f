//! # hb-optimizer
//!
//! Ask/tell search strategies for hyperblock.
//!
//! Two variants share the [`SearchStrategy`] contract: a sequential
//! model-based optimizer that proposes a few candidates at a time, and a
//! population-based genetic optimizer that proposes a whole generation. The
//! [`Strategy`] tagged union is what the coordinator owns and checkpoints.

mod population;
mod sampling;
mod sequential;
mod strategy;

pub use population::{Individual, PopulationConfig, PopulationStrategy};
pub use sequential::{SequentialConfig, SequentialStrategy};
pub use strategy::{SearchStrategy, StepContext, Strategy, StrategyConfig, StrategyKind};
