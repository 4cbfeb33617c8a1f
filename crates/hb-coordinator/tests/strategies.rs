mod common;

use common::{launch_cluster, test_config, RecordingComm};
use hb_comm::{Payload, Tag};
use hb_coordinator::{params_model_spec, Coordinator};
use hb_optimizer::{
    PopulationConfig, SearchStrategy, StepContext, Strategy, StrategyConfig, StrategyKind,
};
use hb_types::{BestResult, HbResult, ParameterVector};

/// Wraps a strategy and records how the coordinator drives it.
struct Recording {
    inner: Strategy,
    hints: Vec<Option<usize>>,
    /// (evaluation index passed to tell, generation the population landed on)
    tells: Vec<(usize, Option<usize>)>,
}

impl Recording {
    fn new(inner: Strategy) -> Self {
        Self {
            inner,
            hints: Vec::new(),
            tells: Vec::new(),
        }
    }
}

impl SearchStrategy for Recording {
    fn kind(&self) -> StrategyKind {
        self.inner.kind()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn plan(&mut self, steps: usize) -> usize {
        self.inner.plan(steps)
    }

    fn ask_hint(&self, lookahead: usize) -> Option<usize> {
        self.inner.ask_hint(lookahead)
    }

    fn ask(&mut self, hint: Option<usize>) -> Vec<ParameterVector> {
        self.hints.push(hint);
        self.inner.ask(hint)
    }

    fn tell(
        &mut self,
        xs: &[ParameterVector],
        ys: &[f64],
        ctx: StepContext,
    ) -> HbResult<BestResult> {
        let best = self.inner.tell(xs, ys, ctx)?;
        let generation = match &self.inner {
            Strategy::Population(p) => Some(p.generation()),
            Strategy::Sequential(_) => None,
        };
        self.tells.push((ctx.evaluation, generation));
        Ok(best)
    }

    fn snapshot(&self) -> HbResult<Vec<u8>> {
        self.inner.snapshot()
    }

    fn restore(&mut self, blob: &[u8]) -> HbResult<()> {
        self.inner.restore(blob)
    }
}

fn population(size: usize) -> StrategyConfig {
    StrategyConfig::Population(PopulationConfig {
        population_size: size,
        ..PopulationConfig::default()
    })
}

#[test]
fn population_generations_drive_the_budget() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("population", dir.path(), 1, 3)
        .with_strategy(population(3))
        .with_steps(2);
    let mut cluster = launch_cluster(&config);
    let strategy = Recording::new(Strategy::new(config.search_space.clone(), &config.strategy).unwrap());
    let mut coordinator =
        Coordinator::new(cluster.take_coordinator().unwrap(), &config, strategy).unwrap();

    let summary = coordinator.run_search(config.steps).unwrap();
    cluster.join().unwrap();

    assert_eq!(summary.evaluations, 6);
    assert_eq!(summary.harvested, 6);
    assert_eq!(coordinator.history().vectors_recorded(), 6);

    let recording = coordinator.strategy();
    assert_eq!(recording.hints, vec![None, None]);
    assert!(!recording.tells.is_empty());
    for (evaluation, generation) in &recording.tells {
        assert_eq!(*generation, Some(evaluation / 3));
    }
    match &recording.inner {
        Strategy::Population(p) => {
            assert_eq!(p.generations_asked(), 2);
            assert_eq!(p.generation_budget(), Some(2));
        }
        Strategy::Sequential(_) => panic!("expected population strategy"),
    }
}

#[test]
fn sequential_asks_with_a_size_hint() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("hints", dir.path(), 2, 3)
        .with_steps(6)
        .with_lookahead(2);
    let mut cluster = launch_cluster(&config);
    let strategy = Recording::new(Strategy::new(config.search_space.clone(), &config.strategy).unwrap());
    let mut coordinator =
        Coordinator::new(cluster.take_coordinator().unwrap(), &config, strategy).unwrap();

    let summary = coordinator.run_search(config.steps).unwrap();
    cluster.join().unwrap();

    assert_eq!(summary.evaluations, 6);
    let recording = coordinator.strategy();
    assert!(recording.hints.iter().all(|h| matches!(h, Some(1) | Some(2))));
    let told: usize = coordinator.history().vectors_recorded();
    assert_eq!(told, 6);
}

#[test]
fn unreachable_target_consumes_the_budget() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("unreachable", dir.path(), 2, 3)
        .with_steps(6)
        .with_target_fom(-1.0);
    let mut cluster = launch_cluster(&config);
    let mut coordinator =
        Coordinator::from_config(cluster.take_coordinator().unwrap(), &config).unwrap();

    let summary = coordinator.run_search(config.steps).unwrap();
    cluster.join().unwrap();

    assert!(!summary.stopped_early);
    assert_eq!(summary.evaluations, 6);
    assert_eq!(summary.harvested, 6);
}

#[test]
fn reachable_target_stops_dispatching() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("reachable", dir.path(), 1, 2)
        .with_steps(20)
        .with_target_fom(10.0);
    let mut cluster = launch_cluster(&config);
    let mut coordinator =
        Coordinator::from_config(cluster.take_coordinator().unwrap(), &config).unwrap();

    let summary = coordinator.run_search(config.steps).unwrap();
    cluster.join().unwrap();

    assert!(summary.stopped_early);
    assert!(summary.evaluations < 20);
    // the first fold-in crossed the target; nothing went out at or after it
    let stopping_fold = &coordinator.history().tell[0];
    assert_eq!(stopping_fold.step, summary.evaluations);
    assert_eq!(summary.harvested, summary.evaluations);
}

#[test]
fn target_is_ignored_by_the_population_strategy() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("population-target", dir.path(), 1, 2)
        .with_strategy(population(2))
        .with_steps(2)
        .with_target_fom(10.0);
    let mut cluster = launch_cluster(&config);
    let mut coordinator =
        Coordinator::from_config(cluster.take_coordinator().unwrap(), &config).unwrap();

    let summary = coordinator.run_search(config.steps).unwrap();
    cluster.join().unwrap();

    assert!(!summary.stopped_early);
    assert_eq!(summary.evaluations, 4);
}

#[test]
fn restored_strategy_proposes_the_same_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("restore", dir.path(), 2, 3).with_steps(6);
    let mut cluster = launch_cluster(&config);
    let mut original =
        Coordinator::from_config(cluster.take_coordinator().unwrap(), &config).unwrap();
    original.run_search(config.steps).unwrap();
    cluster.join().unwrap();

    let checkpoint = dir.path().join("snapshot.ckpt.json");
    original.save(Some(&checkpoint)).unwrap();

    let idle = hb_comm::Fabric::new(3);
    let mut fresh = Coordinator::from_config(idle.endpoint(0).unwrap(), &config).unwrap();
    fresh.load(&checkpoint).unwrap();
    assert_eq!(
        fresh.history().load.as_deref(),
        Some(checkpoint.display().to_string().as_str())
    );

    let resumed_config = config.clone().with_resume(&checkpoint);
    let resumed_fabric = hb_comm::Fabric::new(3);
    let mut resumed =
        Coordinator::from_config(resumed_fabric.endpoint(0).unwrap(), &resumed_config).unwrap();

    let expected = original.ask(1).unwrap();
    assert_eq!(fresh.ask(1).unwrap(), expected);
    assert_eq!(resumed.ask(1).unwrap(), expected);
}

#[test]
fn checkpoint_of_other_strategy_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("mismatch", dir.path(), 1, 2);
    let fabric = hb_comm::Fabric::new(2);
    let mut sequential = Coordinator::from_config(fabric.endpoint(0).unwrap(), &config).unwrap();
    let checkpoint = sequential.save(None).unwrap();

    let population_config = config.with_strategy(population(3));
    let other = hb_comm::Fabric::new(2);
    let mut population =
        Coordinator::from_config(other.endpoint(0).unwrap(), &population_config).unwrap();
    assert!(population.load(&checkpoint).is_err());
}

#[test]
fn model_specs_replace_raw_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config("model-spec", dir.path(), 1, 3).with_steps(3);
    let mut cluster = launch_cluster(&config);
    let (comm, traffic) = RecordingComm::new(cluster.take_coordinator().unwrap());
    let mut coordinator = Coordinator::from_config(comm, &config)
        .unwrap()
        .with_model_builder(params_model_spec);

    let summary = coordinator.run_search(config.steps).unwrap();
    cluster.join().unwrap();

    assert_eq!(summary.harvested, 3);
    assert!(traffic.with_tag(Tag::Params).is_empty());
    let specs = traffic.with_tag(Tag::ModelSpec);
    assert_eq!(specs.len(), 6);
    assert!(specs
        .iter()
        .all(|m| matches!(&m.payload, Payload::ModelSpec(spec) if spec.get("params").is_some())));
}
