//! # meridian-registry
//!
//! The bonded service-node registry: a deterministic state machine over the
//! ordered transaction log.
//!
//! This crate provides:
//! - Per-node registration, contribution, deregistration and expiry
//! - The rollback journal replayed on chain detach
//! - Per-height testing quorums selected with a portable MT19937-64 shuffle
//! - Deterministic swarm rebalancing
//! - Reward winner selection and contributor payout portions
//! - Versioned binary persistence of the whole state

mod deregister;
mod error;
mod info;
mod quorum;
mod registry;
mod rng;
mod rollback;
mod store;
mod swarm;

pub use deregister::{deregister_vote_hash, verify_deregister_votes, VoteError};
pub use error::{RegistryError, RegistryResult};
pub use info::{Contribution, InfoVersion, ServiceNodeInfo, UNASSIGNED_SWARM_ID};
pub use quorum::{
    deregister_lifetime, QuorumState, MIN_NODES_TO_TEST, MIN_VOTES_TO_KICK, NTH_OF_NETWORK_TO_TEST,
    QUORUM_SIZE,
};
pub use registry::{ServiceNodeList, ServiceNodePubkeyInfo};
pub use rng::{consensus_shuffle, uniform_distribution_portable, ConsensusShuffleRng};
pub use rollback::RollbackEvent;
pub use store::{
    deserialize_state, serialize_state, FileStore, MemoryStore, PersistedState, RegistryStore,
};
pub use swarm::{
    calc_swarm_changes, SwarmId, IDEAL_SWARM_SIZE, MAX_SWARM_SIZE, MIN_SWARM_SIZE, NEW_SWARM_SIZE,
    QUEUE_SWARM_ID, SWARM_BUFFER,
};

/// Heights of journal retention before a rollback becomes unreachable.
pub const ROLLBACK_EVENT_EXPIRATION_BLOCKS: u64 = 30;
