//! Error types for pool admission.

use crate::VerifyFlags;
use meridian_types::Hash;
use thiserror::Error;

/// Pool admission and maintenance errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    /// Transaction version 0 is never accepted.
    #[error("transaction version 0 is invalid")]
    InvalidVersion,

    /// The transaction timed out of the pool earlier.
    #[error("transaction {0} previously timed out")]
    TimedOut(Hash),

    /// An input is not a supported type.
    #[error("transaction has an unsupported input type")]
    InvalidInput,

    /// The declared fee does not cover the dynamic fee.
    #[error("fee {fee} too low for weight {weight}")]
    FeeTooLow { fee: u64, weight: u64 },

    /// Heavier than the per-transaction weight limit.
    #[error("transaction is too heavy: {weight} bytes, maximum {limit}")]
    TooBig { weight: u64, limit: u64 },

    /// A key image is already claimed by another pool transaction.
    #[error("transaction {0} double spends a pooled key image")]
    DoubleSpend(Hash),

    /// A deregistration for the same decision is already pending.
    #[error("duplicate deregistration for height {height} index {index}")]
    DuplicateDeregister { height: u64, index: u32 },

    /// Output validation failed.
    #[error("transaction has at least one invalid output")]
    InvalidOutput,

    /// Reward calculation failed while filling a template.
    #[error(transparent)]
    Consensus(#[from] meridian_consensus::ConsensusError),

    /// The transaction is not in the pool.
    #[error("transaction {0} not found in the pool")]
    NotFound(Hash),
}

impl MempoolError {
    /// The verification flags to report alongside this rejection.
    pub fn verify_flags(&self) -> VerifyFlags {
        let mut flags = VerifyFlags {
            verification_failed: true,
            ..Default::default()
        };
        match self {
            MempoolError::InvalidVersion => flags.invalid_version = true,
            MempoolError::TimedOut(_) => {}
            MempoolError::InvalidInput => flags.invalid_input = true,
            MempoolError::FeeTooLow { .. } => flags.fee_too_low = true,
            MempoolError::TooBig { .. } => flags.too_big = true,
            MempoolError::DoubleSpend(_) | MempoolError::DuplicateDeregister { .. } => {
                flags.double_spend = true
            }
            MempoolError::InvalidOutput => flags.invalid_output = true,
            MempoolError::Consensus(_) | MempoolError::NotFound(_) => {}
        }
        flags
    }
}

/// Result alias for pool operations.
pub type MempoolResult<T> = Result<T, MempoolError>;
