//! Launches an in-process world: one thread per worker rank over a shared
//! [`Fabric`], with rank 0 left for the coordinator.

use hb_comm::{BlockLayout, Fabric, LocalEndpoint, COORDINATOR};
use hb_types::HbResult;
use std::thread::{self, JoinHandle};
use tracing::{debug, error};

use crate::worker::{BlockContext, Evaluator, WorkerProcess, WorkerStats};

pub struct LocalCluster {
    coordinator: Option<LocalEndpoint>,
    workers: Vec<(usize, JoinHandle<HbResult<WorkerStats>>)>,
}

impl LocalCluster {
    /// Spawn a worker thread for every worker rank of `layout`. `factory`
    /// builds each rank's evaluator.
    pub fn launch<E, F>(layout: &BlockLayout, mut factory: F) -> HbResult<Self>
    where
        E: Evaluator + 'static,
        F: FnMut(&BlockContext) -> E,
    {
        let fabric = Fabric::new(layout.world_size());
        let coordinator = fabric.endpoint(COORDINATOR)?;

        let mut workers = Vec::with_capacity(layout.workers());
        for rank in 1..layout.world_size() {
            let ctx = BlockContext::for_rank(layout, rank)?;
            let evaluator = factory(&ctx);
            let process = WorkerProcess::new(fabric.endpoint(rank)?, layout, evaluator)?;
            let handle = thread::Builder::new()
                .name(format!("hb-worker-{rank}"))
                .spawn(move || process.run())?;
            debug!(rank, block = ctx.block, "worker started");
            workers.push((rank, handle));
        }

        Ok(Self {
            coordinator: Some(coordinator),
            workers,
        })
    }

    /// The coordinator's endpoint. Handed out once.
    pub fn take_coordinator(&mut self) -> Option<LocalEndpoint> {
        self.coordinator.take()
    }

    /// Wait for every worker thread. Only returns once all workers have seen
    /// `exit`.
    pub fn join(self) -> HbResult<Vec<WorkerStats>> {
        let mut stats = Vec::with_capacity(self.workers.len());
        for (rank, handle) in self.workers {
            match handle.join() {
                Ok(result) => stats.push(result?),
                Err(_) => {
                    error!(rank, "worker thread panicked");
                    return Err(hb_types::internal_error!("worker rank {rank} panicked"));
                }
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::Work;
    use hb_comm::{Communicator, Payload, Tag};
    use hb_types::{ParamValue, ParameterVector};

    #[test]
    fn cluster_serves_and_exits() {
        let layout = BlockLayout::new(2, 5).unwrap();
        let mut cluster = LocalCluster::launch(&layout, |ctx| {
            let rank = ctx.rank;
            move |_: &Work, _: &BlockContext| -> HbResult<f64> { Ok(rank as f64) }
        })
        .unwrap();
        let coordinator = cluster.take_coordinator().unwrap();
        assert!(cluster.take_coordinator().is_none());

        let params = Payload::Params(ParameterVector::new(vec![ParamValue::Real(0.0)]));
        for rank in layout.ranks(2) {
            coordinator.send(rank, Tag::Params, params.clone()).unwrap();
        }
        assert_eq!(coordinator.recv(3, Tag::Result).unwrap(), Payload::Fom(3.0));

        for rank in 1..5 {
            coordinator.send(rank, Tag::Exit, Payload::Exit).unwrap();
        }
        coordinator.barrier().unwrap();

        let stats = cluster.join().unwrap();
        assert_eq!(stats.len(), 4);
        assert_eq!(stats.iter().map(|s| s.jobs).sum::<usize>(), 2);
        assert_eq!(stats.iter().map(|s| s.results_sent).sum::<usize>(), 1);
    }
}
