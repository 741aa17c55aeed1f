//! Registry lifecycle scenarios.

use crate::generators::*;
use crate::harness::TestChain;
use meridian_consensus::staking::staking_requirement;
use meridian_consensus::{
    construct_miner_tx, hard_fork_height, hard_fork_version_at, MinerTxContext,
    SERVICE_NODE_VERSION, STAKING_PORTIONS,
};
use meridian_mempool::ChainAccess;
use meridian_registry::ServiceNodeList;
use meridian_types::PublicKey;

fn activation_height() -> u64 {
    hard_fork_height(TEST_NETWORK, SERVICE_NODE_VERSION).expect("service nodes activate")
}

#[test]
fn genesis_to_first_service_node() {
    let mut rng = test_rng(100);
    let start = activation_height();
    let registry = ServiceNodeList::new(TEST_NETWORK);
    let chain = TestChain::new(start);

    // An empty registry selects no winner.
    assert_eq!(registry.select_winner(), PublicKey::NULL);

    let node = TestNode::generate(&mut rng);
    let requirement = staking_requirement(TEST_NETWORK, start);
    let tx = registration_tx(&mut rng, &node, requirement, start);
    chain.apply_block(&registry, PublicKey::NULL, &[tx]);

    let entries = registry.state_for_keys(&[]);
    assert_eq!(entries.len(), 1);
    assert!(entries[0].info.is_fully_funded());
    assert_eq!(registry.select_winner(), node.pubkey);

    // The next coinbase pays the node and validates against the registry.
    let height = chain.current_height();
    let hf = hard_fork_version_at(TEST_NETWORK, height);
    let winner_info = registry.winner_addresses_and_portions();
    let context = MinerTxContext::new(TEST_NETWORK, node.pubkey, winner_info);
    let miner = TestWallet::generate(&mut rng);
    let (miner_tx, parts) = construct_miner_tx(
        height,
        0,
        chain.already_generated_coins(),
        0,
        0,
        &miner.address(),
        &[],
        hf,
        &context,
        &mut rng,
    )
    .expect("coinbase construction succeeds");
    registry
        .validate_miner_tx(&miner_tx, height, hf, &parts)
        .expect("coinbase validates");
}

#[test]
fn pooled_funding_reaches_the_requirement() {
    let mut rng = test_rng(101);
    let start = activation_height();
    let registry = ServiceNodeList::new(TEST_NETWORK);
    let chain = TestChain::new(start);

    let node = TestNode::generate(&mut rng);
    let staker = TestWallet::generate(&mut rng);
    let requirement = staking_requirement(TEST_NETWORK, start);
    let half = STAKING_PORTIONS / 2;

    // Operator reserves half, a second contributor reserves the rest; the
    // operator stakes its half up front.
    let tx = registration_tx_with_portions(
        &mut rng,
        &node,
        &[(node.wallet.address(), half), (staker.address(), half)],
        half,
        requirement / 2,
        start,
    );
    chain.apply_block(&registry, PublicKey::NULL, &[tx]);

    let entries = registry.state_for_keys(&[node.pubkey]);
    let info = &entries[0].info;
    assert_eq!(info.total_contributed, requirement / 2);
    assert_eq!(info.total_reserved, requirement);
    assert!(!info.is_valid());
    assert!(!info.is_fully_funded());
    // Not eligible until the stakes cover the requirement.
    assert_eq!(registry.select_winner(), PublicKey::NULL);

    // The second contributor fills its reservation.
    let height = chain.current_height();
    let top_up = contribution_tx(&mut rng, node.pubkey, &staker, requirement / 2, height);
    chain.apply_block(&registry, PublicKey::NULL, &[top_up]);

    let entries = registry.state_for_keys(&[node.pubkey]);
    let info = &entries[0].info;
    assert!(info.is_fully_funded());
    assert_eq!(info.contributors.len(), 2);

    // The ledger invariants hold.
    let amount_sum: u64 = info.contributors.iter().map(|c| c.amount).sum();
    let reserved_sum: u64 = info.contributors.iter().map(|c| c.reserved).sum();
    assert_eq!(amount_sum, info.total_contributed);
    assert_eq!(reserved_sum, info.total_reserved);
    assert!(info.total_contributed <= info.total_reserved);
    assert!(info.total_reserved <= info.staking_requirement);

    // Operator takes its cut plus its own stake's share.
    let portions = registry.winner_addresses_and_portions();
    assert_eq!(portions.len(), 2);
    assert!(portions[0].1 > portions[1].1);
    assert!(portions[0].1 + portions[1].1 <= STAKING_PORTIONS);
    assert_eq!(registry.select_winner(), node.pubkey);
}

#[test]
fn quorum_selection_is_identical_across_runs() {
    let seed = 102;
    let start = activation_height();
    let requirement = staking_requirement(TEST_NETWORK, start);

    let run = || {
        let mut rng = test_rng(seed);
        let registry = ServiceNodeList::new(TEST_NETWORK);
        let chain = TestChain::new(start);
        let txs: Vec<_> = (0..15)
            .map(|_| {
                let node = TestNode::generate(&mut rng);
                registration_tx(&mut rng, &node, requirement, start)
            })
            .collect();
        chain.apply_block(&registry, PublicKey::NULL, &txs);
        chain.advance_to(&registry, start + 4);
        (
            registry.quorum_state(start).map(|q| (*q).clone()),
            registry.quorum_state(start + 3).map(|q| (*q).clone()),
        )
    };

    assert_eq!(run(), run());
}

#[test]
fn deregistered_node_is_gone_until_detach() {
    let mut rng = test_rng(103);
    let start = activation_height();
    let registry = ServiceNodeList::new(TEST_NETWORK);
    let chain = TestChain::new(start);
    let requirement = staking_requirement(TEST_NETWORK, start);

    let txs: Vec<_> = (0..14)
        .map(|_| {
            let node = TestNode::generate(&mut rng);
            registration_tx(&mut rng, &node, requirement, start)
        })
        .collect();
    chain.apply_block(&registry, PublicKey::NULL, &txs);

    let quorum = registry.quorum_state(start).expect("quorum cached");
    assert!(!quorum.nodes_to_test.is_empty());
    let victim = quorum.nodes_to_test[0];

    chain.apply_block(&registry, PublicKey::NULL, &[deregister_tx(start, 0)]);
    assert!(registry.state_for_keys(&[victim]).is_empty());
    assert!(!registry.is_service_node(&victim));

    registry.blockchain_detached(start + 1).unwrap();
    assert_eq!(registry.state_for_keys(&[victim]).len(), 1);
    assert!(registry.is_service_node(&victim));
    assert_eq!(registry.height(), start + 1);
}
