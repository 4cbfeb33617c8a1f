//! # hb-comm
//!
//! Rank-addressed message passing for hyperblock: tags and payloads, the
//! [`Communicator`] contract with pollable receive handles, the block-to-rank
//! layout, and an in-process [`Fabric`] where every rank is a thread.

mod layout;
mod local;
mod message;
mod substrate;

pub use layout::BlockLayout;
pub use local::{Fabric, LocalEndpoint};
pub use message::{Channel, Payload, Rank, Tag, COORDINATOR};
pub use substrate::{wait_any, Communicator, PendingResult};
