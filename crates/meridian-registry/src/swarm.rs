//! Deterministic swarm rebalancing.
//!
//! Swarms group service nodes for downstream subsystems. The rebalancer is
//! pure: given the same membership snapshot and seed it produces the same
//! assignment on every node. Nodes without a home sit in the queue swarm
//! until enough of them accumulate to form a new swarm.

use crate::info::UNASSIGNED_SWARM_ID;
use crate::rng::{consensus_shuffle, ConsensusShuffleRng};
use meridian_types::PublicKey;
use std::collections::BTreeMap;
use tracing::debug;

/// Identifier of a swarm.
pub type SwarmId = u64;

/// The queue pseudo-swarm holding unassigned nodes.
pub const QUEUE_SWARM_ID: SwarmId = 0;

/// Hard upper bound on swarm membership.
pub const MAX_SWARM_SIZE: usize = 10;

/// Swarms below this size are refilled from the queue.
pub const MIN_SWARM_SIZE: usize = 5;

/// Headroom above the minimum that refills aim for.
pub const IDEAL_SWARM_MARGIN: usize = 2;

/// Target size when refilling an underfull swarm.
pub const IDEAL_SWARM_SIZE: usize = MIN_SWARM_SIZE + IDEAL_SWARM_MARGIN;

/// Size of a freshly formed swarm.
pub const NEW_SWARM_SIZE: usize = IDEAL_SWARM_SIZE;

/// Queue members held back as a buffer before forming a new swarm.
pub const SWARM_BUFFER: usize = 5;

/// Rebalance swarm membership in place.
///
/// `swarms` maps swarm id to member keys; entries under `QUEUE_SWARM_ID`
/// or `UNASSIGNED_SWARM_ID` form the waiting queue. On return every key is
/// assigned to a real swarm or parked under `QUEUE_SWARM_ID`.
pub fn calc_swarm_changes(swarms: &mut BTreeMap<SwarmId, Vec<PublicKey>>, seed: u64) {
    let mut queue: Vec<PublicKey> = Vec::new();
    for id in [QUEUE_SWARM_ID, UNASSIGNED_SWARM_ID] {
        if let Some(members) = swarms.remove(&id) {
            queue.extend(members);
        }
    }
    queue.sort();
    consensus_shuffle(&mut queue, seed);

    // Deterministic member order inside every swarm.
    for members in swarms.values_mut() {
        members.sort();
    }

    // Overfull swarms shed their byte-largest members back to the queue.
    for members in swarms.values_mut() {
        while members.len() > MAX_SWARM_SIZE {
            let shed = members.pop().unwrap_or_default();
            queue.push(shed);
        }
    }

    // Underfull swarms are topped up toward the ideal size, visiting
    // swarms in ascending id order.
    let ids: Vec<SwarmId> = swarms.keys().copied().collect();
    for id in ids {
        let Some(members) = swarms.get_mut(&id) else {
            continue;
        };
        if members.len() >= MIN_SWARM_SIZE {
            continue;
        }
        while members.len() < IDEAL_SWARM_SIZE {
            match queue.pop() {
                Some(key) => members.push(key),
                None => break,
            }
        }
    }

    // Form new swarms while the queue can spare a buffered batch.
    let mut rng = ConsensusShuffleRng::new(seed);
    while queue.len() >= NEW_SWARM_SIZE + SWARM_BUFFER {
        let id = loop {
            let candidate = rng.next_u64();
            if candidate != QUEUE_SWARM_ID
                && candidate != UNASSIGNED_SWARM_ID
                && !swarms.contains_key(&candidate)
            {
                break candidate;
            }
        };
        let members: Vec<PublicKey> = queue.drain(queue.len() - NEW_SWARM_SIZE..).collect();
        debug!(swarm = id, members = members.len(), "formed new swarm");
        swarms.insert(id, members);
    }

    if !queue.is_empty() {
        swarms.insert(QUEUE_SWARM_ID, queue);
    }
}
