//! Error types.
//!
//! Analysis results are never reported through these types: a bail-out of
//! the load/store analysis is an ordinary [`AnalysisOutcome`]. Errors here
//! describe misuse of the graph-building API or an unreadable configuration.
//!
//! [`AnalysisOutcome`]: crate::analysis::AnalysisOutcome

use crate::ir::BlockId;
use thiserror::Error;

/// Errors raised while building a [`Graph`](crate::ir::Graph).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("block {0} does not exist in this graph")]
    UnknownBlock(BlockId),

    #[error("instruction #{0} does not belong to this graph")]
    UnknownInstruction(usize),

    #[error("{kind} expects {expected} input(s), got {found}")]
    WrongInputCount {
        kind: &'static str,
        expected: String,
        found: usize,
    },

    #[error("edge {from} -> {to} already exists")]
    DuplicateEdge { from: BlockId, to: BlockId },

    #[error("exit block is already set to {0}")]
    ExitAlreadySet(BlockId),

    #[error("{kind} must cover at least one element")]
    ZeroVectorLength { kind: &'static str },
}

/// Errors raised while loading an [`AnalysisConfig`](crate::config::AnalysisConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for graph construction.
pub type Result<T, E = GraphError> = std::result::Result<T, E>;
