//! Error types for consensus validation.

use thiserror::Error;

/// Consensus validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    /// The base-reward formula produced zero at a non-genesis height.
    #[error("base reward is zero at a non-genesis height")]
    InvalidBaseReward,

    /// Block weight exceeded twice the effective median.
    #[error("block weight {weight} exceeds the allowed maximum {max}")]
    BlockTooBig { weight: u64, max: u64 },

    /// Coinbase output sum does not match the computed reward.
    #[error("coinbase pays {got} but the reward parts sum to {expected}")]
    RewardMismatch { expected: u64, got: u64 },

    /// Coinbase names a different winner than the registry selected.
    #[error("wrong service node winner: expected {expected}, block has {got}")]
    WrongWinner { expected: String, got: String },

    /// Coinbase has fewer outputs than winner contributors.
    #[error("coinbase has {got} outputs, needs at least {needed}")]
    OutputCount { needed: usize, got: usize },

    /// A service-node output pays the wrong amount.
    #[error("service node output {index} pays {got}, expected {expected}")]
    WrongAmount {
        index: usize,
        expected: u64,
        got: u64,
    },

    /// A service-node output is not a one-time key output.
    #[error("service node output {index} target is not a one-time key")]
    WrongTarget { index: usize },

    /// A service-node output key does not match the deterministic
    /// derivation for the contributor address.
    #[error("service node output {index} key does not match the derivation")]
    WrongOutputKey { index: usize },

    /// Key material failed to parse or derive.
    #[error(transparent)]
    Type(#[from] meridian_types::TypeError),
}

/// Result alias for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
