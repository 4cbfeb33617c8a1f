//! Worker side of the block protocol.
//!
//! Each worker rank waits for work on the dispatch channel, evaluates it, and
//! if it is its block's authoritative rank, sends the figure of merit back.
//! The `exit` sentinel ends the loop, after which the worker joins the global
//! barrier.

use hb_comm::{BlockLayout, Communicator, Payload, Rank, Tag, COORDINATOR};
use hb_types::{ContractError, HbError, HbResult, ParameterVector};
use std::ops::RangeInclusive;
use tracing::{debug, info};

/// Where a worker rank sits in the block layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockContext {
    pub rank: Rank,
    pub block: usize,
    pub block_ranks: RangeInclusive<Rank>,
    pub authoritative: bool,
}

impl BlockContext {
    pub fn for_rank(layout: &BlockLayout, rank: Rank) -> HbResult<Self> {
        let block = layout
            .block_of(rank)
            .ok_or_else(|| hb_types::internal_error!("rank {rank} is not a worker rank"))?;
        Ok(Self {
            rank,
            block,
            block_ranks: layout.ranks(block),
            authoritative: layout.is_authoritative(rank),
        })
    }
}

/// A unit of work as received from the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Work {
    Params(ParameterVector),
    ModelSpec(serde_json::Value),
}

/// Trains/evaluates one candidate. Everything behind this trait (model
/// construction, training, device choice) is opaque to the coordinator.
pub trait Evaluator: Send {
    fn evaluate(&mut self, work: &Work, ctx: &BlockContext) -> HbResult<f64>;
}

impl<F> Evaluator for F
where
    F: FnMut(&Work, &BlockContext) -> HbResult<f64> + Send,
{
    fn evaluate(&mut self, work: &Work, ctx: &BlockContext) -> HbResult<f64> {
        self(work, ctx)
    }
}

/// Counters reported when a worker exits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub rank: Rank,
    pub jobs: usize,
    pub results_sent: usize,
}

/// One worker rank running the receive/evaluate/report loop.
pub struct WorkerProcess<C: Communicator, E: Evaluator> {
    comm: C,
    ctx: BlockContext,
    evaluator: E,
}

impl<C: Communicator, E: Evaluator> WorkerProcess<C, E> {
    pub fn new(comm: C, layout: &BlockLayout, evaluator: E) -> HbResult<Self> {
        let ctx = BlockContext::for_rank(layout, comm.rank())?;
        Ok(Self {
            comm,
            ctx,
            evaluator,
        })
    }

    pub fn context(&self) -> &BlockContext {
        &self.ctx
    }

    fn wait_for_work(&self) -> HbResult<Option<Work>> {
        debug!(rank = self.ctx.rank, "waiting for model");
        match self.comm.recv(COORDINATOR, Tag::ModelSpec)? {
            Payload::Exit => Ok(None),
            Payload::Params(params) => Ok(Some(Work::Params(params))),
            Payload::ModelSpec(spec) => Ok(Some(Work::ModelSpec(spec))),
            Payload::Fom(_) => Err(HbError::Contract(ContractError::UnexpectedPayload {
                tag: Tag::ModelSpec.to_string(),
                rank: COORDINATOR,
            })),
        }
    }

    /// Serve work until the coordinator says `exit`, then meet the barrier.
    pub fn run(mut self) -> HbResult<WorkerStats> {
        let mut stats = WorkerStats {
            rank: self.ctx.rank,
            ..WorkerStats::default()
        };

        while let Some(work) = self.wait_for_work()? {
            debug!(rank = self.ctx.rank, block = self.ctx.block, "training model");
            let fom = self.evaluator.evaluate(&work, &self.ctx)?;
            stats.jobs += 1;

            if self.ctx.authoritative {
                debug!(rank = self.ctx.rank, fom, "sending result to coordinator");
                self.comm.send(COORDINATOR, Tag::Result, Payload::Fom(fom))?;
                stats.results_sent += 1;
            }
        }

        info!(rank = self.ctx.rank, jobs = stats.jobs, "received exit signal from coordinator");
        self.comm.barrier()?;
        Ok(stats)
    }
}
