//! The communicator contract and non-blocking receive handles.

use crossbeam_channel::{Receiver, Select, TryRecvError};
use hb_types::CommError;
use std::time::Duration;

use crate::message::{Payload, Rank, Tag};

/// Point-to-point messaging as seen from one rank.
pub trait Communicator: Send {
    fn rank(&self) -> Rank;

    /// Number of ranks in the world, coordinator included.
    fn size(&self) -> usize;

    /// Blocking send.
    fn send(&self, dest: Rank, tag: Tag, payload: Payload) -> Result<(), CommError>;

    /// Blocking receive of the next message from `source` on `tag`'s channel.
    fn recv(&self, source: Rank, tag: Tag) -> Result<Payload, CommError>;

    /// Register a non-blocking receive from `source` on `tag`'s channel.
    fn irecv(&self, source: Rank, tag: Tag) -> Result<PendingResult, CommError>;

    /// Wait until every rank has reached the barrier.
    fn barrier(&self) -> Result<(), CommError>;
}

/// Completion handle for a non-blocking receive.
///
/// Backed by a channel receiver so several handles can be waited on at once
/// with [`wait_any`]. Substrates that talk to real processes forward incoming
/// messages into the channel.
#[derive(Debug)]
pub struct PendingResult {
    source: Rank,
    tag: Tag,
    receiver: Receiver<Payload>,
}

impl PendingResult {
    pub fn new(source: Rank, tag: Tag, receiver: Receiver<Payload>) -> Self {
        Self {
            source,
            tag,
            receiver,
        }
    }

    pub fn source(&self) -> Rank {
        self.source
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    /// Test for completion without blocking. `Ok(Some(_))` means done.
    pub fn poll(&self) -> Result<Option<Payload>, CommError> {
        match self.receiver.try_recv() {
            Ok(payload) => Ok(Some(payload)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(CommError::Disconnected { rank: self.source }),
        }
    }
}

/// Block until one of `handles` can complete and return its index, or `None`
/// once `timeout` elapses (`None` waits forever). When several handles are
/// ready together one is picked at random.
///
/// Nothing is consumed; call [`PendingResult::poll`] on the returned handle.
pub fn wait_any(handles: &[&PendingResult], timeout: Option<Duration>) -> Option<usize> {
    if handles.is_empty() {
        return None;
    }
    let mut select = Select::new();
    for handle in handles {
        select.recv(&handle.receiver);
    }
    match timeout {
        Some(limit) => select.ready_timeout(limit).ok(),
        None => Some(select.ready()),
    }
}
