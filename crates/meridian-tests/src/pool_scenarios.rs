//! Pool and template scenarios against a live chain harness.

use crate::generators::*;
use crate::harness::TestChain;
use meridian_consensus::{hard_fork_height, SERVICE_NODE_VERSION};
use meridian_mempool::{ChainAccess, MempoolError, RelayMethod, TxPool};
use meridian_registry::ServiceNodeList;
use meridian_types::PublicKey;

const NOW: u64 = 1_700_000_000;

fn setup() -> (TxPool, std::sync::Arc<TestChain>, ServiceNodeList, u64) {
    let start = hard_fork_height(TEST_NETWORK, SERVICE_NODE_VERSION).unwrap();
    let chain = TestChain::new(start);
    let registry = ServiceNodeList::new(TEST_NETWORK);
    let pool = TxPool::new(chain.clone(), TEST_NETWORK);
    (pool, chain, registry, start)
}

#[test]
fn template_transactions_end_up_in_a_block() {
    let (pool, chain, registry, start) = setup();
    let hf = chain.hard_fork_version(start);

    let tx_a = transfer_tx(1, 50_000);
    let tx_b = transfer_tx(2, 40_000);
    pool.add_tx(tx_a.clone(), RelayMethod::Fluff, false, hf, NOW)
        .unwrap();
    pool.add_tx(tx_b.clone(), RelayMethod::Fluff, false, hf, NOW)
        .unwrap();

    let template = pool.fill_block_template(1_000_000, hf).unwrap();
    assert_eq!(template.tx_hashes.len(), 2);
    assert_eq!(template.fee, 90_000);
    assert!(template.expected_reward > 0);

    // Mine the block with the selected transactions; the pool sweep then
    // drops what the chain already carries.
    chain.apply_block(&registry, PublicKey::NULL, &[tx_a, tx_b]);
    pool.on_blockchain_inc();
    let removed = pool.validate(hf);
    assert_eq!(removed, 2);
    assert!(pool.is_empty());
}

#[test]
fn popped_block_transactions_return_as_kept_by_block() {
    let (pool, chain, registry, _) = setup();
    let hf = chain.hard_fork_version(chain.current_height());

    let tx = transfer_tx(3, 50_000);
    // Mine it straight away; its key image is now spent on the chain.
    chain.apply_block(&registry, PublicKey::NULL, std::slice::from_ref(&tx));

    // A normal admission fails on the spent image.
    let err = pool
        .add_tx(tx.clone(), RelayMethod::Fluff, false, hf, NOW)
        .unwrap_err();
    assert!(matches!(err, MempoolError::InvalidInput));

    // Returning from a popped block it is parked instead.
    let result = pool
        .add_tx(tx.clone(), RelayMethod::Block, true, hf, NOW)
        .unwrap();
    assert!(result.flags.verification_impossible);
    assert!(pool.contains(&tx.hash()));

    // It never makes it into a template while the image stays spent.
    let template = pool.fill_block_template(1_000_000, hf).unwrap();
    assert!(template.tx_hashes.is_empty());
}

#[test]
fn weight_pressure_evicts_low_priority_transfers_only() {
    let (pool, chain, _registry, _) = setup();
    let hf = chain.hard_fork_version(chain.current_height());
    let max_weight = 500;
    pool.set_max_weight(max_weight);

    let dereg = deregister_tx(chain.current_height().saturating_sub(2), 0);
    let dereg_id = dereg.hash();
    let dereg_blob = dereg.to_bytes();
    pool.add_tx_with(
        dereg,
        dereg_id,
        dereg_blob,
        100,
        RelayMethod::Fluff,
        false,
        hf,
        NOW,
    )
    .unwrap();

    // Fill past the limit with equal-fee transfers.
    for tag in 1..=5u8 {
        let tx = transfer_tx(tag, 100_000);
        let id = tx.hash();
        let blob = tx.to_bytes();
        pool.add_tx_with(tx, id, blob, 100, RelayMethod::Fluff, false, hf, NOW)
            .unwrap();
    }

    assert!(pool.weight() <= max_weight);
    // The zero-fee deregistration outlives the paying transfers.
    assert!(pool.contains(&dereg_id));
}

#[test]
fn duplicate_deregister_decisions_never_coexist() {
    let (pool, chain, _registry, _) = setup();
    let hf = chain.hard_fork_version(chain.current_height());
    let voted = chain.current_height().saturating_sub(1);

    pool.add_tx(deregister_tx(voted, 2), RelayMethod::Fluff, false, hf, NOW)
        .unwrap();

    let mut dup = deregister_tx(voted, 2);
    dup.unlock_time = 99;
    assert!(matches!(
        pool.add_tx(dup, RelayMethod::Fluff, false, hf, NOW),
        Err(MempoolError::DuplicateDeregister { .. })
    ));

    // Every admitted deregistration targets a distinct decision.
    let decisions: Vec<_> = pool
        .transactions()
        .iter()
        .filter_map(|tx| tx.deregistration())
        .map(|d| (d.block_height, d.service_node_index))
        .collect();
    let unique: std::collections::HashSet<_> = decisions.iter().collect();
    assert_eq!(decisions.len(), unique.len());
}
