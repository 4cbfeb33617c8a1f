//! Explicit scheduling state owned by the coordinator.
//!
//! Tracks which block is running which candidate and buffers harvested
//! observations until the next fold-in. A block appears at most once in the
//! in-flight table; [`SchedulerState::begin`] refuses a second entry.

use hb_comm::{wait_any, Payload, PendingResult};
use hb_types::{
    ContractError, FigureOfMerit, HbError, HbResult, Observation, ParameterVector,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// A dispatched candidate whose result has not been harvested yet.
#[derive(Debug)]
pub struct InFlightJob {
    pub params: ParameterVector,
    pub handle: PendingResult,
    pub dispatched_at: Instant,
    /// Evaluation index the job was dispatched at.
    pub evaluation: usize,
}

#[derive(Debug)]
pub struct SchedulerState {
    blocks: Vec<usize>,
    in_flight: BTreeMap<usize, InFlightJob>,
    pending: Vec<Observation>,
    harvested: usize,
}

impl SchedulerState {
    pub fn new(blocks: impl IntoIterator<Item = usize>) -> Self {
        Self {
            blocks: blocks.into_iter().collect(),
            in_flight: BTreeMap::new(),
            pending: Vec::new(),
            harvested: 0,
        }
    }

    /// Every block known to the scheduler, in block order.
    pub fn blocks(&self) -> &[usize] {
        &self.blocks
    }

    pub fn is_busy(&self, block: usize) -> bool {
        self.in_flight.contains_key(&block)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn job(&self, block: usize) -> Option<&InFlightJob> {
        self.in_flight.get(&block)
    }

    /// Total observations harvested since the scheduler was created.
    pub fn harvested(&self) -> usize {
        self.harvested
    }

    /// Record a dispatch. Fails if `block` already has a job in flight.
    pub fn begin(
        &mut self,
        block: usize,
        params: ParameterVector,
        handle: PendingResult,
        evaluation: usize,
    ) -> HbResult<()> {
        if self.is_busy(block) {
            return Err(hb_types::internal_error!(
                "block {block} already has a job in flight"
            ));
        }
        self.in_flight.insert(
            block,
            InFlightJob {
                params,
                handle,
                dispatched_at: Instant::now(),
                evaluation,
            },
        );
        Ok(())
    }

    /// Whether `block` is idle, harvesting its result first if it just
    /// completed.
    pub fn check(&mut self, block: usize) -> HbResult<bool> {
        let Some(job) = self.in_flight.get(&block) else {
            return Ok(true);
        };
        let payload = match job.handle.poll()? {
            Some(payload) => payload,
            None => return Ok(false),
        };

        let fom = match payload {
            Payload::Fom(value) => FigureOfMerit::new(value)?,
            _ => {
                return Err(HbError::Contract(ContractError::UnexpectedPayload {
                    tag: job.handle.tag().to_string(),
                    rank: job.handle.source(),
                }))
            }
        };

        if let Some(job) = self.in_flight.remove(&block) {
            debug!(
                block,
                evaluation = job.evaluation,
                fom = fom.value(),
                params = %job.params,
                "harvested result"
            );
            self.pending.push(Observation {
                params: job.params,
                fom,
                block,
            });
            self.harvested += 1;
        }
        Ok(true)
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Harvested observations not yet folded in, in harvest order.
    pub fn pending(&self) -> &[Observation] {
        &self.pending
    }

    /// Drop the pending batch after a successful fold-in.
    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    /// Block until some in-flight block has a result ready and return it, or
    /// `None` on timeout or with nothing in flight.
    pub fn wait_any(&self, timeout: Option<Duration>) -> Option<usize> {
        let (blocks, handles): (Vec<usize>, Vec<&PendingResult>) = self
            .in_flight
            .iter()
            .map(|(block, job)| (*block, &job.handle))
            .unzip();
        wait_any(&handles, timeout).map(|index| blocks[index])
    }

    /// The in-flight block that has been waiting longest.
    pub fn oldest(&self) -> Option<(usize, Instant)> {
        self.in_flight
            .iter()
            .map(|(block, job)| (*block, job.dispatched_at))
            .min_by_key(|(_, at)| *at)
    }
}
