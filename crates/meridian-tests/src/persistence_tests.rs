//! Persistence round-trips and checkpoint behaviour.

use crate::generators::*;
use crate::harness::TestChain;
use meridian_checkpoints::{CheckpointError, CheckpointSet};
use meridian_consensus::staking::staking_requirement;
use meridian_consensus::{hard_fork_height, SERVICE_NODE_VERSION};
use meridian_registry::{FileStore, RegistryStore, ServiceNodeList};
use meridian_types::{Hash, PublicKey};

#[test]
fn registry_survives_a_file_round_trip() {
    let mut rng = test_rng(300);
    let start = hard_fork_height(TEST_NETWORK, SERVICE_NODE_VERSION).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("service_nodes.bin");

    let registry =
        ServiceNodeList::new(TEST_NETWORK).with_store(Box::new(FileStore::new(path.clone())));
    let chain = TestChain::new(start);

    let requirement = staking_requirement(TEST_NETWORK, start);
    let txs: Vec<_> = (0..6)
        .map(|_| {
            let node = TestNode::generate(&mut rng);
            registration_tx(&mut rng, &node, requirement, start)
        })
        .collect();
    chain.apply_block(&registry, PublicKey::NULL, &txs);
    chain.advance_to(&registry, start + 3);

    // A second registry restores from the same file.
    let restored =
        ServiceNodeList::new(TEST_NETWORK).with_store(Box::new(FileStore::new(path)));
    restored.load().unwrap();

    assert_eq!(restored.snapshot(), registry.snapshot());
    assert_eq!(restored.height(), registry.height());
    assert_eq!(restored.select_winner(), registry.select_winner());
    assert_eq!(
        restored.quorum_state(start).map(|q| (*q).clone()),
        registry.quorum_state(start).map(|q| (*q).clone())
    );
}

#[test]
fn file_store_clear_forgets_the_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path().join("registry.bin"));
    store.save(b"state").unwrap();
    assert!(store.load().unwrap().is_some());
    store.clear().unwrap();
    assert!(store.load().unwrap().is_none());
}

#[test]
fn checkpoint_insertion_is_idempotent_but_conflicts_fail() {
    let mut set = CheckpointSet::new();
    let hash = Hash::from_bytes([0x44; 32]);
    set.add_checkpoint(1_000, hash).unwrap();
    set.add_checkpoint(1_000, hash).unwrap();
    assert_eq!(set.points().len(), 1);

    let other = Hash::from_bytes([0x45; 32]);
    assert!(matches!(
        set.add_checkpoint(1_000, other),
        Err(CheckpointError::Conflict { height: 1_000, .. })
    ));
}

#[test]
fn checkpoints_gate_block_acceptance() {
    let mut set = CheckpointSet::new();
    let pinned = Hash::from_bytes([0x50; 32]);
    set.add_checkpoint(500, pinned).unwrap();

    assert!(set.check_block(499, &Hash::from_bytes([1; 32])));
    assert!(set.check_block(500, &pinned));
    assert!(!set.check_block(500, &Hash::from_bytes([2; 32])));

    // Reorganizations may only fork above the last checkpoint.
    assert!(!set.is_alternative_block_allowed(600, 500));
    assert!(set.is_alternative_block_allowed(600, 501));
}
