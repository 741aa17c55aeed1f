//! Deregistration vote verification.
//!
//! A deregister transaction carries the votes of quorum members from the
//! voted height. Each vote signs the decision hash; the transaction is
//! only valid with enough distinct, correctly signed votes against a node
//! that was actually under test.

use crate::quorum::{QuorumState, MIN_VOTES_TO_KICK};
use meridian_types::crypto::check_signature;
use meridian_types::{ByteWriter, DeregisterExtra, Hash};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use std::collections::HashSet;
use thiserror::Error;

/// Why a deregistration's votes were rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteError {
    /// The referenced quorum has no node at the named test index.
    #[error("service node index {index} is outside the tested set of {tested}")]
    ServiceNodeIndexOutOfBounds { index: u32, tested: usize },

    /// A vote names a voter outside the quorum.
    #[error("voter index {index} is outside the quorum of {quorum}")]
    VoterIndexOutOfBounds { index: u32, quorum: usize },

    /// The same quorum member voted twice.
    #[error("duplicate vote from quorum index {index}")]
    DuplicateVoters { index: u32 },

    /// A vote's signature does not verify under the voter's key.
    #[error("invalid signature from quorum index {index}")]
    SignatureNotValid { index: u32 },

    /// Fewer valid votes than the removal threshold.
    #[error("{got} votes, fewer than the removal threshold")]
    NotEnoughVotes { got: usize },
}

/// The hash every quorum member signs for a removal decision.
pub fn deregister_vote_hash(block_height: u64, service_node_index: u32) -> Hash {
    let mut buf = ByteWriter::new();
    buf.put_bytes(&block_height.to_le_bytes());
    buf.put_bytes(&service_node_index.to_le_bytes());
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(buf.into_bytes());
    Hash(hasher.finalize().into())
}

/// Verify a deregistration against the quorum of its voted height.
pub fn verify_deregister_votes(
    deregister: &DeregisterExtra,
    quorum: &QuorumState,
) -> Result<(), VoteError> {
    if deregister.service_node_index as usize >= quorum.nodes_to_test.len() {
        return Err(VoteError::ServiceNodeIndexOutOfBounds {
            index: deregister.service_node_index,
            tested: quorum.nodes_to_test.len(),
        });
    }

    let hash = deregister_vote_hash(deregister.block_height, deregister.service_node_index);
    let mut seen_voters = HashSet::new();
    for vote in &deregister.votes {
        let Some(voter) = quorum.quorum_nodes.get(vote.voters_quorum_index as usize) else {
            return Err(VoteError::VoterIndexOutOfBounds {
                index: vote.voters_quorum_index,
                quorum: quorum.quorum_nodes.len(),
            });
        };
        if !seen_voters.insert(vote.voters_quorum_index) {
            return Err(VoteError::DuplicateVoters {
                index: vote.voters_quorum_index,
            });
        }
        if !check_signature(&hash, voter, &vote.signature) {
            return Err(VoteError::SignatureNotValid {
                index: vote.voters_quorum_index,
            });
        }
    }

    if seen_voters.len() < MIN_VOTES_TO_KICK {
        return Err(VoteError::NotEnoughVotes {
            got: seen_voters.len(),
        });
    }
    Ok(())
}
