//! The coordinator: drives the search strategy and keeps every block busy.
//!
//! One thread of control. Blocks are refilled as soon as their results are
//! harvested; harvested observations are folded into the strategy before
//! every idle-block sweep. Waiting for a result is an event-driven wait over
//! the pending result handles rather than a spin.

use hb_comm::{BlockLayout, Communicator, Payload, Tag, COORDINATOR};
use hb_optimizer::{SearchStrategy, StepContext, Strategy, StrategyKind};
use hb_types::{
    BestResult, ConfigError, ContractError, HbError, HbResult, Observation, ParameterVector,
    SearchSpace,
};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::persistence::{read_checkpoint, write_checkpoint, write_history, RunFiles, RunHistory};
use crate::scheduler::SchedulerState;

/// Turns a candidate into the model specification sent to the workers.
pub trait ModelBuilder: Send {
    fn build(&self, params: &ParameterVector) -> HbResult<serde_json::Value>;
}

impl<F> ModelBuilder for F
where
    F: Fn(&ParameterVector) -> HbResult<serde_json::Value> + Send,
{
    fn build(&self, params: &ParameterVector) -> HbResult<serde_json::Value> {
        self(params)
    }
}

/// Simplest model specification: the candidate under a `params` key.
pub fn params_model_spec(params: &ParameterVector) -> HbResult<serde_json::Value> {
    Ok(serde_json::json!({ "params": params }))
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub best: Option<BestResult>,
    /// Candidates dispatched to blocks.
    pub evaluations: usize,
    /// Results harvested from blocks.
    pub harvested: usize,
    /// Successful `tell` calls.
    pub folds: usize,
    pub stopped_early: bool,
    pub checkpoint: PathBuf,
    pub history: PathBuf,
}

pub struct Coordinator<C, S = Strategy>
where
    C: Communicator,
    S: SearchStrategy,
{
    comm: C,
    layout: BlockLayout,
    space: SearchSpace,
    strategy: S,
    scheduler: SchedulerState,
    files: RunFiles,
    history: RunHistory,
    lookahead: usize,
    target_fom: Option<f64>,
    drain_interval: Duration,
    block_timeout: Option<Duration>,
    model_builder: Option<Box<dyn ModelBuilder>>,
    next_params: VecDeque<ParameterVector>,
    observations: Vec<Observation>,
    best: Option<BestResult>,
    stop_requested: bool,
    dispatches: usize,
    folds: usize,
}

impl<C: Communicator> Coordinator<C, Strategy> {
    /// Build the configured strategy and restore `resume_from` if set.
    pub fn from_config(comm: C, config: &RunConfig) -> HbResult<Self> {
        let strategy = Strategy::new(config.search_space.clone(), &config.strategy)?;
        let mut coordinator = Self::new(comm, config, strategy)?;
        if let Some(path) = &config.resume_from {
            coordinator.load(path)?;
        }
        Ok(coordinator)
    }
}

impl<C, S> Coordinator<C, S>
where
    C: Communicator,
    S: SearchStrategy,
{
    pub fn new(comm: C, config: &RunConfig, strategy: S) -> HbResult<Self> {
        config.validate()?;
        let layout = config.layout()?;
        if comm.size() != layout.world_size() {
            return Err(ConfigError::InvalidParameter {
                parameter: "world_size".to_string(),
                message: format!(
                    "configured for {} ranks but the communicator has {}",
                    layout.world_size(),
                    comm.size()
                ),
            }
            .into());
        }
        if comm.rank() != COORDINATOR {
            return Err(hb_types::config_error!(
                "the coordinator must run on rank {COORDINATOR}, not {}",
                comm.rank()
            ));
        }

        info!(
            run_id = %config.id,
            label = %config.label,
            blocks = layout.num_blocks(),
            block_size = layout.block_size(),
            strategy = strategy.name(),
            "coordinator ready"
        );

        Ok(Self {
            comm,
            scheduler: SchedulerState::new(layout.blocks()),
            layout,
            space: config.search_space.clone(),
            strategy,
            files: RunFiles::new(&config.output_dir, &config.label),
            history: RunHistory::new(config.id, &config.label),
            lookahead: config.lookahead,
            target_fom: config.target_fom,
            drain_interval: config.drain_interval(),
            block_timeout: config.block_timeout(),
            model_builder: None,
            next_params: VecDeque::new(),
            observations: Vec::new(),
            best: None,
            stop_requested: false,
            dispatches: 0,
            folds: 0,
        })
    }

    /// Send model specifications built from each candidate instead of the
    /// raw vector.
    pub fn with_model_builder(mut self, builder: impl ModelBuilder + 'static) -> Self {
        self.model_builder = Some(Box::new(builder));
        self
    }

    pub fn best(&self) -> Option<&BestResult> {
        self.best.as_ref()
    }

    /// Every observation handed to the strategy, in harvest order.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn history(&self) -> &RunHistory {
        &self.history
    }

    pub fn files(&self) -> &RunFiles {
        &self.files
    }

    pub fn dispatches(&self) -> usize {
        self.dispatches
    }

    pub fn scheduler(&self) -> &SchedulerState {
        &self.scheduler
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    /// Snapshot the strategy to `path`, or to the run's checkpoint file.
    pub fn save(&mut self, path: Option<&Path>) -> HbResult<PathBuf> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.files.checkpoint_path());
        self.history.note_save(&path);
        let blob = self.strategy.snapshot()?;
        write_checkpoint(&path, &blob)?;
        debug!(path = %path.display(), bytes = blob.len(), "saved strategy checkpoint");
        Ok(path)
    }

    /// Replace the strategy state with the checkpoint at `path`.
    pub fn load(&mut self, path: &Path) -> HbResult<()> {
        self.history.note_load(path);
        info!(path = %path.display(), "loading the coordinator strategy");
        let blob = read_checkpoint(path)?;
        self.strategy.restore(&blob)?;
        self.next_params.clear();
        Ok(())
    }

    /// Next candidate to dispatch, refilling the look-ahead buffer from the
    /// strategy when it runs dry. `remaining` is the number of evaluations
    /// still to schedule.
    pub fn ask(&mut self, remaining: usize) -> HbResult<ParameterVector> {
        if let Some(params) = self.next_params.pop_front() {
            return Ok(params);
        }

        let hint = self
            .strategy
            .ask_hint(self.lookahead.min(remaining.max(1)));
        let batch = self.strategy.ask(hint);
        if batch.is_empty() {
            return Err(ContractError::EmptyAsk { hint }.into());
        }
        for params in &batch {
            self.space
                .check(params)
                .map_err(|message| ContractError::MalformedCandidate { message })?;
        }
        debug!(count = batch.len(), ?hint, "asked strategy for candidates");

        self.next_params.extend(batch);
        self.next_params
            .pop_front()
            .ok_or_else(|| hb_types::internal_error!("look-ahead buffer empty after ask"))
    }

    /// Fold every pending observation into the strategy.
    pub fn fit(&mut self, step: usize) -> HbResult<()> {
        if !self.scheduler.has_pending() {
            return Ok(());
        }
        let batch = self.scheduler.pending().to_vec();
        let xs: Vec<ParameterVector> = batch.iter().map(|o| o.params.clone()).collect();
        let ys: Vec<f64> = batch.iter().map(|o| o.fom.value()).collect();

        info!(size = batch.len(), step, "telling strategy");
        let best = self.strategy.tell(&xs, &ys, StepContext::new(step))?;
        self.scheduler.clear_pending();
        self.observations.extend(batch.iter().cloned());
        self.folds += 1;

        if self.strategy.kind() == StrategyKind::Sequential {
            self.next_params.clear();
        }

        let improved = self.best.as_ref().map_or(true, |prev| best.fom < prev.fom);
        if improved {
            info!(fom = best.fom, params = %best.params, "new best");
        }

        self.history.record_fold(&batch, &best, step);
        let reached = self.strategy.kind() == StrategyKind::Sequential
            && self.target_fom.is_some_and(|target| best.fom < target);
        self.best = Some(best);
        self.persist()?;

        if reached {
            info!(target_fom = ?self.target_fom, "target figure of merit reached, stopping");
            self.stop_requested = true;
        }
        Ok(())
    }

    /// Best-effort checkpoint and history write.
    fn persist(&mut self) -> HbResult<()> {
        if let Err(e) = self.save(None) {
            if e.is_fatal() {
                return Err(e);
            }
            warn!(error = %e, "could not write checkpoint, continuing");
        }
        if let Err(e) = write_history(&self.files.history_path(), &self.history) {
            warn!(error = %e, "could not write run history, continuing");
        }
        Ok(())
    }

    /// Block until some block is idle and return it.
    ///
    /// Pending observations are folded in first. Blocks are checked in a
    /// fresh random order on every sweep; a block whose result has arrived is
    /// harvested and counts as idle.
    pub fn wait_for_idle_block(&mut self, step: usize) -> HbResult<usize> {
        loop {
            self.fit(step)?;

            let mut order = self.scheduler.blocks().to_vec();
            order.shuffle(&mut rand::thread_rng());
            for block in order {
                if self.scheduler.check(block)? {
                    debug!(block, step, "found idle block");
                    return Ok(block);
                }
            }

            self.wait_for_result(None)?;
        }
    }

    /// Wait for any in-flight result, at most `bound`. Fails with
    /// [`HbError::BlockTimeout`] once the oldest job exceeds the block
    /// timeout.
    fn wait_for_result(&self, bound: Option<Duration>) -> HbResult<Option<usize>> {
        let mut limit = bound;
        if let Some(timeout) = self.block_timeout {
            if let Some((block, since)) = self.scheduler.oldest() {
                let waited = since.elapsed();
                if waited >= timeout {
                    let waited_ms = waited.as_millis() as u64;
                    warn!(block, waited_ms, "block did not answer in time");
                    return Err(HbError::BlockTimeout { block, waited_ms });
                }
                let left = timeout - waited;
                limit = Some(limit.map_or(left, |b| b.min(left)));
            }
        }
        Ok(self.scheduler.wait_any(limit))
    }

    /// Send `params` to every rank of `block` and register the receive from
    /// its authoritative rank.
    pub fn run_block(
        &mut self,
        block: usize,
        params: ParameterVector,
        step: usize,
    ) -> HbResult<()> {
        if self.scheduler.is_busy(block) {
            return Err(hb_types::internal_error!(
                "refusing to dispatch to busy block {block}"
            ));
        }
        let payload = match &self.model_builder {
            Some(builder) => Payload::ModelSpec(builder.build(&params)?),
            None => Payload::Params(params.clone()),
        };
        let tag = payload.tag();
        let ranks = self.layout.ranks(block);
        info!(
            block,
            start = *ranks.start(),
            end = *ranks.end(),
            step,
            params = %params,
            "launching block"
        );

        for rank in ranks {
            self.comm.send(rank, tag, payload.clone())?;
        }
        let handle = self
            .comm
            .irecv(self.layout.authoritative(block), Tag::Result)?;
        self.scheduler.begin(block, params, handle, step)?;
        self.dispatches += 1;
        Ok(())
    }

    /// Wait for every in-flight block to report.
    pub fn close_blocks(&mut self) -> HbResult<()> {
        loop {
            for block in self.scheduler.blocks().to_vec() {
                self.scheduler.check(block)?;
            }
            let remaining = self.scheduler.in_flight();
            if remaining == 0 {
                return Ok(());
            }
            info!(remaining, "waiting for blocks to finish");
            self.wait_for_result(Some(self.drain_interval))?;
        }
    }

    /// Tell every worker to exit, then meet them at the barrier.
    pub fn shutdown(&mut self) -> HbResult<()> {
        info!(workers = self.layout.workers(), "sending exit signal to workers");
        for rank in 1..self.comm.size() {
            self.comm.send(rank, Tag::Exit, Payload::Exit)?;
        }
        self.comm.barrier()?;
        Ok(())
    }

    /// Run the whole search: `steps` evaluations for the sequential
    /// strategy, `steps` generations for the population strategy.
    ///
    /// On failure the last known best is logged before the error is
    /// returned.
    pub fn run_search(&mut self, steps: usize) -> HbResult<RunSummary> {
        match self.search(steps) {
            Ok(summary) => Ok(summary),
            Err(e) => {
                match &self.best {
                    Some(best) => error!(
                        error = %e,
                        fom = best.fom,
                        params = %best.params,
                        "search failed, last best result"
                    ),
                    None => error!(error = %e, "search failed before any result was folded in"),
                }
                Err(e)
            }
        }
    }

    fn search(&mut self, steps: usize) -> HbResult<RunSummary> {
        let evaluations = self.strategy.plan(steps);
        info!(
            strategy = self.strategy.name(),
            steps,
            evaluations,
            blocks = self.layout.num_blocks(),
            "starting search"
        );

        let mut stopped_early = false;
        let mut last_step = 0;
        for step in 0..evaluations {
            last_step = step;
            debug!(step, "iteration");
            let block = self.wait_for_idle_block(step)?;
            if self.stop_requested {
                stopped_early = true;
                break;
            }
            let params = self.ask(evaluations - step)?;
            self.run_block(block, params, step)?;
        }

        self.close_blocks()?;
        self.fit(last_step)?;
        self.shutdown()?;

        match &self.best {
            Some(best) => info!(fom = best.fom, params = %best.params, "search finished"),
            None => info!("search finished without results"),
        }

        Ok(RunSummary {
            best: self.best.clone(),
            evaluations: self.dispatches,
            harvested: self.scheduler.harvested(),
            folds: self.folds,
            stopped_early,
            checkpoint: self.files.checkpoint_path(),
            history: self.files.history_path(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hb_comm::Fabric;
    use hb_types::ParamValue;

    fn config(dir: &Path) -> RunConfig {
        let space = SearchSpace::new()
            .add_real("x", 0.0, 1.0)
            .add_categorical("y", ["a", "b"]);
        RunConfig::new("unit", space)
            .with_blocks(2, 3)
            .with_output_dir(dir)
            .with_drain_interval(Duration::from_millis(20))
    }

    #[test]
    fn world_size_must_match_communicator() {
        let dir = tempfile::tempdir().unwrap();
        let fabric = Fabric::new(5);
        let result = Coordinator::from_config(fabric.endpoint(0).unwrap(), &config(dir.path()));
        assert!(matches!(result, Err(HbError::Config(_))));
    }

    #[test]
    fn coordinator_must_own_rank_zero() {
        let dir = tempfile::tempdir().unwrap();
        let fabric = Fabric::new(3);
        let result = Coordinator::from_config(fabric.endpoint(1).unwrap(), &config(dir.path()));
        assert!(matches!(result, Err(HbError::Config(_))));
    }

    #[test]
    fn ask_validates_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let fabric = Fabric::new(3);
        let mut coordinator =
            Coordinator::from_config(fabric.endpoint(0).unwrap(), &config(dir.path())).unwrap();
        let params = coordinator.ask(4).unwrap();
        assert_eq!(params.len(), 2);
        assert!(coordinator.space.contains(&params));
    }

    #[test]
    fn dispatch_to_busy_block_refused() {
        let dir = tempfile::tempdir().unwrap();
        let fabric = Fabric::new(3);
        let mut coordinator =
            Coordinator::from_config(fabric.endpoint(0).unwrap(), &config(dir.path())).unwrap();
        let params = ParameterVector::new(vec![
            ParamValue::Real(0.5),
            ParamValue::Categorical("a".into()),
        ]);
        coordinator.run_block(1, params.clone(), 0).unwrap();
        assert!(coordinator.run_block(1, params, 1).is_err());
        assert_eq!(coordinator.dispatches(), 1);
        assert!(coordinator.scheduler().is_busy(1));
    }

    struct RejectsTell;

    impl SearchStrategy for RejectsTell {
        fn kind(&self) -> StrategyKind {
            StrategyKind::Sequential
        }

        fn name(&self) -> &str {
            "rejects-tell"
        }

        fn ask(&mut self, _hint: Option<usize>) -> Vec<ParameterVector> {
            Vec::new()
        }

        fn tell(
            &mut self,
            _xs: &[ParameterVector],
            _ys: &[f64],
            _ctx: StepContext,
        ) -> HbResult<BestResult> {
            Err(hb_types::internal_error!("tell refused"))
        }

        fn snapshot(&self) -> HbResult<Vec<u8>> {
            Ok(Vec::new())
        }

        fn restore(&mut self, _blob: &[u8]) -> HbResult<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_tell_leaves_batch_pending() {
        let dir = tempfile::tempdir().unwrap();
        let fabric = Fabric::new(3);
        let mut coordinator =
            Coordinator::new(fabric.endpoint(0).unwrap(), &config(dir.path()), RejectsTell)
                .unwrap();
        let params = ParameterVector::new(vec![
            ParamValue::Real(0.5),
            ParamValue::Categorical("a".into()),
        ]);
        coordinator.run_block(1, params, 0).unwrap();

        let rank = coordinator.layout.authoritative(1);
        fabric
            .endpoint(rank)
            .unwrap()
            .send(COORDINATOR, Tag::Result, Payload::Fom(0.2))
            .unwrap();
        assert_eq!(
            coordinator.scheduler.wait_any(Some(Duration::from_secs(1))),
            Some(1)
        );
        assert!(coordinator.scheduler.check(1).unwrap());

        assert!(coordinator.fit(0).is_err());
        assert!(coordinator.observations().is_empty());
        assert_eq!(coordinator.scheduler().pending().len(), 1);
        assert!(coordinator.history().tell.is_empty());
        assert!(coordinator.best().is_none());
    }

    #[test]
    fn model_builder_wraps_candidates() {
        let params = ParameterVector::new(vec![ParamValue::Real(0.5)]);
        let spec = params_model_spec(&params).unwrap();
        assert_eq!(spec, serde_json::json!({"params": [0.5]}));
    }
}
