//! Per-height testing quorums.

use crate::rng::consensus_shuffle;
use meridian_types::{ByteReader, ByteWriter, Hash, PublicKey, TypeResult};

/// Nodes authorised to vote at a height.
pub const QUORUM_SIZE: usize = 10;

/// Votes required to remove a node.
pub const MIN_VOTES_TO_KICK: usize = 7;

/// Denominator of the network fraction put under test each block.
pub const NTH_OF_NETWORK_TO_TEST: usize = 100;

/// Lower bound on the number of nodes under test (when available).
pub const MIN_NODES_TO_TEST: usize = 50;

use meridian_consensus::{DEREGISTER_LIFETIME_V1, DEREGISTER_LIFETIME_V2};

/// Hard fork at which the longer deregister lifetime applies to quorum
/// retention.
pub const DEREGISTER_LIFETIME_HF: u8 = 8;

/// The deregister lifetime in blocks at a hard fork.
pub fn deregister_lifetime(hf: u8) -> u64 {
    if hf >= DEREGISTER_LIFETIME_HF {
        DEREGISTER_LIFETIME_V2
    } else {
        DEREGISTER_LIFETIME_V1
    }
}

/// The quorum and testable set selected at one height.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuorumState {
    /// Nodes authorised to vote, at most `QUORUM_SIZE`.
    pub quorum_nodes: Vec<PublicKey>,
    /// Nodes under test this height.
    pub nodes_to_test: Vec<PublicKey>,
}

impl QuorumState {
    /// Select the quorum and testable set for a height.
    ///
    /// `eligible` must already be the byte-order-sorted eligible pubkeys;
    /// the block hash of the height seeds the shuffle with its low eight
    /// bytes.
    pub fn select(eligible: &[PublicKey], block_hash: &Hash) -> QuorumState {
        let seed = block_hash.low_u64_le();
        let mut indexes: Vec<usize> = (0..eligible.len()).collect();
        consensus_shuffle(&mut indexes, seed);

        let quorum_count = eligible.len().min(QUORUM_SIZE);
        let quorum_nodes: Vec<PublicKey> = indexes[..quorum_count]
            .iter()
            .map(|&i| eligible[i])
            .collect();

        let remaining = indexes.len() - quorum_count;
        let test_count = (remaining / NTH_OF_NETWORK_TO_TEST).max(MIN_NODES_TO_TEST.min(remaining));
        let nodes_to_test: Vec<PublicKey> = indexes[quorum_count..quorum_count + test_count]
            .iter()
            .map(|&i| eligible[i])
            .collect();

        QuorumState {
            quorum_nodes,
            nodes_to_test,
        }
    }

    /// Serialize in the persisted field order.
    pub fn write(&self, w: &mut ByteWriter) {
        w.put_varint(self.quorum_nodes.len() as u64);
        for key in &self.quorum_nodes {
            w.put_bytes(key.as_bytes());
        }
        w.put_varint(self.nodes_to_test.len() as u64);
        for key in &self.nodes_to_test {
            w.put_bytes(key.as_bytes());
        }
    }

    /// Parse the persisted field order.
    pub fn read(r: &mut ByteReader<'_>) -> TypeResult<QuorumState> {
        let quorum_count = r.get_varint("quorum count")? as usize;
        let mut quorum_nodes = Vec::with_capacity(quorum_count);
        for _ in 0..quorum_count {
            quorum_nodes.push(PublicKey(r.get_array32("quorum node")?));
        }
        let test_count = r.get_varint("test count")? as usize;
        let mut nodes_to_test = Vec::with_capacity(test_count);
        for _ in 0..test_count {
            nodes_to_test.push(PublicKey(r.get_array32("node to test")?));
        }
        Ok(QuorumState {
            quorum_nodes,
            nodes_to_test,
        })
    }
}
