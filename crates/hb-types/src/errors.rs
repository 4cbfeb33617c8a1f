use thiserror::Error;

/// Main error type for the hyperblock system
#[derive(Error, Debug)]
pub enum HbError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Optimizer contract violation: {0}")]
    Contract(#[from] ContractError),

    #[error("Communication error: {0}")]
    Comm(#[from] CommError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Block {block} timed out: no result after {waited_ms} ms")]
    BlockTimeout { block: usize, waited_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HbError {
    /// Whether this error terminates a run. Persistence is best-effort and is
    /// the only non-fatal category.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, HbError::Persistence(_))
    }
}

/// Startup configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("search space has no dimensions")]
    EmptySearchSpace,

    #[error("dimension {name}: {message}")]
    InvalidDimension { name: String, message: String },

    #[error("duplicate dimension name: {name}")]
    DuplicateDimension { name: String },

    #[error("{workers} worker ranks cannot be split into {num_blocks} blocks")]
    IndivisibleBlocks { workers: usize, num_blocks: usize },

    #[error("invalid run parameter {parameter}: {message}")]
    InvalidParameter { parameter: String, message: String },

    #[error("{0}")]
    Other(String),
}

/// Violations of the ask/tell contract or of the result protocol
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContractError {
    #[error("ask returned no candidates for a hint of {hint:?}")]
    EmptyAsk { hint: Option<usize> },

    #[error("candidate does not fit the search space: {message}")]
    MalformedCandidate { message: String },

    #[error("tell called without observations")]
    EmptyTell,

    #[error("tell called with {x_len} vectors and {y_len} figures of merit")]
    MismatchedTell { x_len: usize, y_len: usize },

    #[error("figure of merit must be finite, got {value}")]
    NonFiniteFom { value: f64 },

    #[error("unexpected payload on {tag} channel from rank {rank}")]
    UnexpectedPayload { tag: String, rank: usize },
}

/// Substrate-level failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommError {
    #[error("rank {rank} is outside a world of size {size}")]
    InvalidRank { rank: usize, size: usize },

    #[error("peer rank {rank} disconnected")]
    Disconnected { rank: usize },
}

/// Checkpoint and history write/read failures
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt checkpoint {path}: {message}")]
    Corrupt { path: String, message: String },
}

/// Result type alias for hyperblock operations
pub type HbResult<T> = Result<T, HbError>;

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HbError::Config($crate::ConfigError::Other(format!($($arg)*)))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::HbError::Internal(format!($($arg)*))
    };
}
