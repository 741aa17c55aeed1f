//! Reward split scenarios across the consensus crate.

use crate::generators::*;
use meridian_consensus::staking::portions_to_make_amount;
use meridian_consensus::{
    block_reward_parts, construct_miner_tx, get_portion_of_reward, governance_amount,
    validate_service_node_rewards, ConsensusError, MinerTxContext, Network,
};
use meridian_types::PublicKey;

const GENERATED: u64 = 100_000_000_000;

#[test]
fn uniform_basis_split_pays_six_and_four_tenths() {
    // Two contributors holding 600 and 400 of a 1000-unit requirement at
    // the uniform-basis fork: the payouts land on 600 and 400 exactly and
    // exhaust the pot.
    let p60 = portions_to_make_amount(1_000, 600);
    let p40 = portions_to_make_amount(1_000, 400);
    assert_eq!(get_portion_of_reward(p60, 1_000), 600);
    assert_eq!(get_portion_of_reward(p40, 1_000), 400);
    assert_eq!(
        get_portion_of_reward(p60, 1_000) + get_portion_of_reward(p40, 1_000),
        1_000
    );
}

#[test]
fn operator_and_staker_pots_split_before_the_uniform_fork() {
    let mut rng = test_rng(200);
    let operator = TestWallet::generate(&mut rng);
    let staker = TestWallet::generate(&mut rng);
    let winner_info = vec![
        (operator.address(), portions_to_make_amount(1_000, 600)),
        (staker.address(), portions_to_make_amount(1_000, 400)),
    ];

    // Pooled era (hard fork 12..17): the first row draws from the operator
    // pot, the rest from the staker pot.
    let parts = block_reward_parts(
        0,
        0,
        GENERATED,
        12,
        900_000,
        Network::Mainnet,
        0,
        &winner_info,
    )
    .unwrap();
    assert_eq!(parts.operator_reward + parts.staker_reward, parts.service_node_total);
    let op = get_portion_of_reward(winner_info[0].1, parts.operator_reward);
    let staker_cut = get_portion_of_reward(winner_info[1].1, parts.staker_reward);
    assert_eq!(parts.service_node_paid, op + staker_cut);
}

#[test]
fn coinbase_rows_follow_the_split_end_to_end() {
    let mut rng = test_rng(201);
    let operator = TestWallet::generate(&mut rng);
    let staker = TestWallet::generate(&mut rng);
    let winner = PublicKey::from_bytes([0x21; 32]);
    let p60 = portions_to_make_amount(1_000, 600);
    let p40 = portions_to_make_amount(1_000, 400);
    let context = MinerTxContext::new(
        Network::Mainnet,
        winner,
        vec![(operator.address(), p60), (staker.address(), p40)],
    );
    let miner = TestWallet::generate(&mut rng);

    // 1_060_001 sits after the uniform-basis fork with nothing scheduled.
    let (tx, parts) = construct_miner_tx(
        1_060_001,
        0,
        GENERATED,
        0,
        17,
        &miner.address(),
        &[],
        17,
        &context,
        &mut rng,
    )
    .unwrap();
    assert_eq!(parts.governance, 0);
    assert_eq!(parts.dev_fund, 0);
    assert_eq!(tx.outputs.len(), 3);
    assert_eq!(
        tx.outputs[1].amount + tx.outputs[2].amount,
        parts.service_node_paid
    );
    validate_service_node_rewards(&tx, 1_060_001, 17, &parts, winner, &context.winner_info)
        .unwrap();
}

#[test]
fn exhausted_supply_fails_closed() {
    let err = block_reward_parts(
        0,
        0,
        meridian_consensus::MONEY_SUPPLY,
        10,
        600_000,
        Network::Mainnet,
        0,
        &[],
    )
    .unwrap_err();
    assert!(matches!(err, ConsensusError::InvalidBaseReward));
}

#[test]
fn governance_mints_ride_on_top_of_the_base_reward() {
    let height = 352_846;
    let parts = block_reward_parts(0, 0, GENERATED, 7, height, Network::Mainnet, 0, &[]).unwrap();
    assert_eq!(parts.governance, governance_amount(height, Network::Mainnet));
    assert_eq!(
        parts.original_base_reward,
        parts.adjusted_base_reward + parts.governance + parts.dev_fund
    );
}
