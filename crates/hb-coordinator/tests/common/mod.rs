#![allow(dead_code)]

use hb_comm::{Communicator, LocalEndpoint, Payload, PendingResult, Rank, Tag};
use hb_coordinator::{LocalCluster, ObjectiveConfig, ObjectiveKind, RunConfig, SyntheticEvaluator};
use hb_types::{CommError, SearchSpace};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// `x ∈ [0, 1]`, `y ∈ {a, b}`.
pub fn two_dim_space() -> SearchSpace {
    SearchSpace::new()
        .add_real("x", 0.0, 1.0)
        .add_categorical("y", ["a", "b"])
}

pub fn test_config(label: &str, dir: &Path, num_blocks: usize, world_size: usize) -> RunConfig {
    RunConfig::new(label, two_dim_space())
        .with_blocks(num_blocks, world_size)
        .with_output_dir(dir)
        .with_drain_interval(Duration::from_millis(20))
        .with_objective(ObjectiveConfig {
            kind: ObjectiveKind::Sphere,
            delay_ms: 2,
            seed: 7,
        })
}

/// In-process cluster serving the configured synthetic objective.
pub fn launch_cluster(config: &RunConfig) -> LocalCluster {
    let layout = config.layout().unwrap();
    LocalCluster::launch(&layout, |ctx| {
        SyntheticEvaluator::new(config.search_space.clone(), config.objective.clone(), ctx.rank)
    })
    .unwrap()
}

#[derive(Debug, Clone)]
pub struct SentMessage {
    pub dest: Rank,
    pub tag: Tag,
    pub payload: Payload,
    pub at: Instant,
}

/// Everything the coordinator pushed through a [`RecordingComm`].
#[derive(Debug, Clone, Default)]
pub struct Traffic {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    barriers: Arc<AtomicUsize>,
}

impl Traffic {
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }

    pub fn with_tag(&self, tag: Tag) -> Vec<SentMessage> {
        self.sent().into_iter().filter(|m| m.tag == tag).collect()
    }

    pub fn barriers(&self) -> usize {
        self.barriers.load(Ordering::SeqCst)
    }
}

/// Communicator wrapper that records sends and barrier calls.
pub struct RecordingComm {
    inner: LocalEndpoint,
    traffic: Traffic,
}

impl RecordingComm {
    pub fn new(inner: LocalEndpoint) -> (Self, Traffic) {
        let traffic = Traffic::default();
        (
            Self {
                inner,
                traffic: traffic.clone(),
            },
            traffic,
        )
    }
}

impl Communicator for RecordingComm {
    fn rank(&self) -> Rank {
        self.inner.rank()
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn send(&self, dest: Rank, tag: Tag, payload: Payload) -> Result<(), CommError> {
        self.traffic.sent.lock().push(SentMessage {
            dest,
            tag,
            payload: payload.clone(),
            at: Instant::now(),
        });
        self.inner.send(dest, tag, payload)
    }

    fn recv(&self, source: Rank, tag: Tag) -> Result<Payload, CommError> {
        self.inner.recv(source, tag)
    }

    fn irecv(&self, source: Rank, tag: Tag) -> Result<PendingResult, CommError> {
        self.inner.irecv(source, tag)
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.traffic.barriers.fetch_add(1, Ordering::SeqCst);
        self.inner.barrier()
    }
}
