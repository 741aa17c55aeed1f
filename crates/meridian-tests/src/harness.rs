//! A minimal chain driver wiring the registry and the pool together.

use crate::generators::{block_at, TEST_NETWORK};
use meridian_consensus::hard_fork_version_at;
use meridian_mempool::{ChainAccess, InputCheckOutcome};
use meridian_registry::ServiceNodeList;
use meridian_types::{Hash, KeyImage, PublicKey, Transaction};
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;

/// An in-memory stand-in for the blockchain, tracking just enough state to
/// drive the registry and satisfy the pool's `ChainAccess`.
pub struct TestChain {
    height: RwLock<u64>,
    block_ids: RwLock<Vec<(u64, Hash)>>,
    spent_images: RwLock<HashSet<KeyImage>>,
    mined_txs: RwLock<HashSet<Hash>>,
    already_generated: u64,
}

impl TestChain {
    /// A chain positioned at `height` with nothing mined.
    pub fn new(height: u64) -> Arc<TestChain> {
        Arc::new(TestChain {
            height: RwLock::new(height),
            block_ids: RwLock::new(Vec::new()),
            spent_images: RwLock::new(HashSet::new()),
            mined_txs: RwLock::new(HashSet::new()),
            already_generated: 100_000_000_000,
        })
    }

    /// Apply a block to the registry and advance the chain, recording the
    /// included transactions as mined.
    pub fn apply_block(
        &self,
        registry: &ServiceNodeList,
        winner: PublicKey,
        txs: &[Transaction],
    ) -> Hash {
        let height = *self.height.read();
        let block = block_at(height, winner, txs);
        registry
            .block_added(&block, txs)
            .expect("block applies at the chain height");
        let id = block.hash();
        self.block_ids.write().push((height, id));
        {
            let mut spent = self.spent_images.write();
            let mut mined = self.mined_txs.write();
            for tx in txs {
                spent.extend(tx.key_images());
                mined.insert(tx.hash());
            }
        }
        *self.height.write() = height + 1;
        id
    }

    /// Apply empty blocks until the chain reaches `target`.
    pub fn advance_to(&self, registry: &ServiceNodeList, target: u64) {
        while *self.height.read() < target {
            self.apply_block(registry, PublicKey::NULL, &[]);
        }
    }
}

impl ChainAccess for TestChain {
    fn current_height(&self) -> u64 {
        *self.height.read()
    }

    fn block_id_by_height(&self, height: u64) -> Option<Hash> {
        self.block_ids
            .read()
            .iter()
            .find(|(h, _)| *h == height)
            .map(|(_, id)| *id)
    }

    fn hard_fork_version(&self, height: u64) -> u8 {
        hard_fork_version_at(TEST_NETWORK, height)
    }

    fn check_fee(&self, tx_weight: u64, fee: u64) -> bool {
        fee >= tx_weight
    }

    fn check_tx_inputs(&self, tx: &Transaction) -> Option<InputCheckOutcome> {
        if self.have_tx_key_images_as_spent(tx) {
            return None;
        }
        let height = self.current_height().saturating_sub(1);
        Some(InputCheckOutcome {
            max_used_block_height: height,
            max_used_block_id: self.block_id_by_height(height).unwrap_or(Hash::NULL),
        })
    }

    fn check_tx_outputs(&self, _tx: &Transaction) -> bool {
        true
    }

    fn have_tx_key_images_as_spent(&self, tx: &Transaction) -> bool {
        let spent = self.spent_images.read();
        tx.key_images().iter().any(|image| spent.contains(image))
    }

    fn have_tx(&self, id: &Hash) -> bool {
        self.mined_txs.read().contains(id)
    }

    fn already_generated_coins(&self) -> u64 {
        self.already_generated
    }
}
