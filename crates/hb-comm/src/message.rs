//! Message tags and payloads exchanged between ranks.

use hb_types::ParameterVector;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Process index inside the world. The coordinator is rank 0.
pub type Rank = usize;

pub const COORDINATOR: Rank = 0;

/// Kind of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tag {
    /// Candidate parameters sent to every rank of a block.
    Params,
    /// Model specification derived from the parameters.
    ModelSpec,
    /// Figure of merit returned by an authoritative rank.
    Result,
    /// Shutdown sentinel.
    Exit,
}

/// Physical channel a tag travels on. `params`, `model-spec` and `exit`
/// share the dispatch channel so a worker waiting for work also sees the
/// shutdown sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    Dispatch,
    Result,
}

impl Tag {
    pub fn channel(self) -> Channel {
        match self {
            Tag::Params | Tag::ModelSpec | Tag::Exit => Channel::Dispatch,
            Tag::Result => Channel::Result,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tag::Params => "params",
            Tag::ModelSpec => "model-spec",
            Tag::Result => "result",
            Tag::Exit => "exit",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum Payload {
    Params(ParameterVector),
    ModelSpec(serde_json::Value),
    Fom(f64),
    Exit,
}

impl Payload {
    /// Tag this payload is naturally sent with.
    pub fn tag(&self) -> Tag {
        match self {
            Payload::Params(_) => Tag::Params,
            Payload::ModelSpec(_) => Tag::ModelSpec,
            Payload::Fom(_) => Tag::Result,
            Payload::Exit => Tag::Exit,
        }
    }

    pub fn is_exit(&self) -> bool {
        matches!(self, Payload::Exit)
    }
}
