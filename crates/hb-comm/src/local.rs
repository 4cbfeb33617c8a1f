//! In-process substrate: every rank is a thread, every (source, dest,
//! channel) triple gets its own unbounded mailbox.

use crossbeam_channel::{unbounded, Receiver, Sender};
use hb_types::CommError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Barrier};
use tracing::trace;

use crate::message::{Channel, Payload, Rank, Tag};
use crate::substrate::{Communicator, PendingResult};

type Mailbox = (Sender<Payload>, Receiver<Payload>);

/// Shared message fabric for a world of `size` ranks.
pub struct Fabric {
    size: usize,
    mailboxes: Mutex<HashMap<(Rank, Rank, Channel), Mailbox>>,
    barrier: Barrier,
}

impl Fabric {
    pub fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            mailboxes: Mutex::new(HashMap::new()),
            barrier: Barrier::new(size),
        })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Endpoint for `rank`.
    pub fn endpoint(self: &Arc<Self>, rank: Rank) -> Result<LocalEndpoint, CommError> {
        self.check_rank(rank)?;
        Ok(LocalEndpoint {
            rank,
            fabric: Arc::clone(self),
        })
    }

    /// One endpoint per rank, in rank order.
    pub fn endpoints(self: &Arc<Self>) -> Vec<LocalEndpoint> {
        (0..self.size)
            .map(|rank| LocalEndpoint {
                rank,
                fabric: Arc::clone(self),
            })
            .collect()
    }

    fn check_rank(&self, rank: Rank) -> Result<(), CommError> {
        if rank < self.size {
            Ok(())
        } else {
            Err(CommError::InvalidRank {
                rank,
                size: self.size,
            })
        }
    }

    fn mailbox(&self, source: Rank, dest: Rank, channel: Channel) -> Mailbox {
        let mut boxes = self.mailboxes.lock();
        boxes
            .entry((source, dest, channel))
            .or_insert_with(unbounded)
            .clone()
    }
}

/// A rank's view of a [`Fabric`].
#[derive(Clone)]
pub struct LocalEndpoint {
    rank: Rank,
    fabric: Arc<Fabric>,
}

impl Communicator for LocalEndpoint {
    fn rank(&self) -> Rank {
        self.rank
    }

    fn size(&self) -> usize {
        self.fabric.size
    }

    fn send(&self, dest: Rank, tag: Tag, payload: Payload) -> Result<(), CommError> {
        self.fabric.check_rank(dest)?;
        trace!(from = self.rank, to = dest, %tag, "send");
        let (tx, _) = self.fabric.mailbox(self.rank, dest, tag.channel());
        tx.send(payload)
            .map_err(|_| CommError::Disconnected { rank: dest })
    }

    fn recv(&self, source: Rank, tag: Tag) -> Result<Payload, CommError> {
        self.fabric.check_rank(source)?;
        let (_, rx) = self.fabric.mailbox(source, self.rank, tag.channel());
        rx.recv()
            .map_err(|_| CommError::Disconnected { rank: source })
    }

    fn irecv(&self, source: Rank, tag: Tag) -> Result<PendingResult, CommError> {
        self.fabric.check_rank(source)?;
        let (_, rx) = self.fabric.mailbox(source, self.rank, tag.channel());
        Ok(PendingResult::new(source, tag, rx))
    }

    fn barrier(&self) -> Result<(), CommError> {
        self.fabric.barrier.wait();
        Ok(())
    }
}
