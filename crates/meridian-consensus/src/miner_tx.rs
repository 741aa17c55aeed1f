//! Coinbase transaction construction and validation.

use crate::reward::{block_reward_parts, get_portion_of_reward, null_winner, RewardParts, WinnerInfo};
use crate::{
    ConsensusError, ConsensusResult, Network, NetworkConfig, MINED_MONEY_UNLOCK_WINDOW,
    SERVICE_NODE_VERSION,
};
use meridian_types::crypto::{
    deterministic_block_keypair, deterministic_output_key, generate_keypair,
};
use meridian_types::{
    AccountAddress, CoinbaseInput, PublicKey, Transaction, TxExtraField, TxInput, TxOutput,
    TxOutputTarget, TxType, TxVersion,
};
use rand::RngCore;
use tracing::{debug, error};

/// Everything the builder needs to know about the service-node winner.
#[derive(Debug, Clone, Default)]
pub struct MinerTxContext {
    /// Network whose wallets receive the scheduled outputs.
    pub network: Network,
    /// The winning service node's public key (null when none).
    pub winner: PublicKey,
    /// The winner's contributor payout list, operator first.
    pub winner_info: WinnerInfo,
}

impl MinerTxContext {
    /// Context for a block paying the given winner.
    pub fn new(network: Network, winner: PublicKey, winner_info: WinnerInfo) -> Self {
        Self {
            network,
            winner,
            winner_info,
        }
    }
}

fn service_node_output_amount(parts: &RewardParts, portions: u64, index: usize, hf: u8) -> u64 {
    if hf >= 17 {
        get_portion_of_reward(portions, parts.service_node_total)
    } else if hf >= 12 {
        let pot = if index == 0 {
            parts.operator_reward
        } else {
            parts.staker_reward
        };
        get_portion_of_reward(portions, pot)
    } else {
        get_portion_of_reward(portions, parts.service_node_total)
    }
}

/// Build the coinbase transaction for a block.
///
/// Output order: miner, service-node contributors, governance (when
/// scheduled), dev fund (when scheduled). The service-node and scheduled
/// outputs use the deterministic block keypair so every node derives the
/// same keys.
#[allow(clippy::too_many_arguments)]
pub fn construct_miner_tx<R: RngCore>(
    height: u64,
    median_weight: u64,
    already_generated_coins: u64,
    current_block_weight: u64,
    fee: u64,
    miner_address: &AccountAddress,
    extra_nonce: &[u8],
    hf: u8,
    context: &MinerTxContext,
    rng: &mut R,
) -> ConsensusResult<(Transaction, RewardParts)> {
    let tx_key = generate_keypair(rng);
    let block_key = deterministic_block_keypair(height);

    let null = null_winner();
    let winner_info: &[(AccountAddress, u64)] = if context.winner_info.is_empty() {
        &null
    } else {
        &context.winner_info
    };

    let parts = block_reward_parts(
        median_weight,
        current_block_weight,
        already_generated_coins,
        hf,
        height,
        context.network,
        fee,
        winner_info,
    )?;

    let mut extra_fields = vec![TxExtraField::PubKey(tx_key.public)];
    if !extra_nonce.is_empty() {
        extra_fields.push(TxExtraField::Nonce(extra_nonce.to_vec()));
    }
    if already_generated_coins != 0 {
        extra_fields.push(TxExtraField::AdditionalPubKeys(vec![block_key.public]));
    }
    extra_fields.push(TxExtraField::Winner(context.winner));

    let mut tx = Transaction {
        version: TxVersion::max_for_hard_fork(hf),
        tx_type: TxType::Standard,
        unlock_time: height + MINED_MONEY_UNLOCK_WINDOW,
        inputs: vec![TxInput::Coinbase(CoinbaseInput { height })],
        extra: meridian_types::serialize_extra(&extra_fields),
        ..Default::default()
    };

    let mut summary_amounts = 0u64;

    // Miner output at index 0, keyed by the ephemeral tx key.
    {
        let key = deterministic_output_key(miner_address, &tx_key, 0)?;
        summary_amounts += parts.miner_reward();
        tx.outputs.push(TxOutput {
            amount: parts.miner_reward(),
            target: TxOutputTarget::ToKey(key),
        });
        tx.output_unlock_times.push(height + MINED_MONEY_UNLOCK_WINDOW);
    }

    if hf >= SERVICE_NODE_VERSION {
        for (i, (address, portions)) in winner_info.iter().enumerate() {
            let vout_index = (1 + i) as u64;
            let key = deterministic_output_key(address, &block_key, vout_index)?;
            let amount = service_node_output_amount(&parts, *portions, i, hf);
            summary_amounts += amount;
            tx.outputs.push(TxOutput {
                amount,
                target: TxOutputTarget::ToKey(key),
            });
            tx.output_unlock_times.push(height + MINED_MONEY_UNLOCK_WINDOW);
        }
    }

    if hf >= 7 && parts.governance > 0 {
        let config = NetworkConfig::get(context.network);
        let wallet = config.governance_wallet_at(hf);
        let key = deterministic_output_key(wallet, &block_key, tx.outputs.len() as u64)?;
        summary_amounts += parts.governance;
        tx.outputs.push(TxOutput {
            amount: parts.governance,
            target: TxOutputTarget::ToKey(key),
        });
        tx.output_unlock_times.push(height + 4);
    }

    if hf >= 17 && parts.dev_fund > 0 {
        let config = NetworkConfig::get(context.network);
        let wallet = config.dev_fund_wallet_at(hf);
        let key = deterministic_output_key(wallet, &block_key, tx.outputs.len() as u64)?;
        summary_amounts += parts.dev_fund;
        tx.outputs.push(TxOutput {
            amount: parts.dev_fund,
            target: TxOutputTarget::ToKey(key),
        });
        tx.output_unlock_times.push(height + MINED_MONEY_UNLOCK_WINDOW);
    }

    let expected =
        parts.miner_reward() + parts.service_node_paid + parts.governance + parts.dev_fund;
    if summary_amounts != expected {
        error!(
            summary_amounts,
            expected, height, "coinbase output sum does not match the reward split"
        );
        return Err(ConsensusError::RewardMismatch {
            expected,
            got: summary_amounts,
        });
    }

    debug!(
        height,
        reward = parts.original_base_reward,
        fee,
        outputs = tx.outputs.len(),
        "constructed miner tx"
    );
    Ok((tx, parts))
}

/// Validate the service-node reward rows of a coinbase against the winner
/// the registry selected.
///
/// `expected_winner` and `addresses_and_portions` come from the registry's
/// winner selection for the block being validated.
pub fn validate_service_node_rewards(
    miner_tx: &Transaction,
    height: u64,
    hf: u8,
    parts: &RewardParts,
    expected_winner: PublicKey,
    addresses_and_portions: &[(AccountAddress, u64)],
) -> ConsensusResult<()> {
    if hf < SERVICE_NODE_VERSION {
        return Ok(());
    }

    let block_winner = miner_tx.service_node_winner();
    if block_winner != expected_winner {
        error!(
            expected = %expected_winner,
            got = %block_winner,
            "service node reward winner is incorrect"
        );
        return Err(ConsensusError::WrongWinner {
            expected: expected_winner.to_string(),
            got: block_winner.to_string(),
        });
    }

    if miner_tx.outputs.len().saturating_sub(1) < addresses_and_portions.len() {
        return Err(ConsensusError::OutputCount {
            needed: addresses_and_portions.len(),
            got: miner_tx.outputs.len(),
        });
    }

    let block_key = deterministic_block_keypair(height);
    for (i, (address, portions)) in addresses_and_portions.iter().enumerate() {
        let vout_index = i + 1;
        let expected_amount = service_node_output_amount(parts, *portions, i, hf);
        let output = &miner_tx.outputs[vout_index];

        if output.amount != expected_amount {
            return Err(ConsensusError::WrongAmount {
                index: vout_index,
                expected: expected_amount,
                got: output.amount,
            });
        }

        let TxOutputTarget::ToKey(output_key) = output.target else {
            return Err(ConsensusError::WrongTarget { index: vout_index });
        };

        let expected_key = deterministic_output_key(address, &block_key, vout_index as u64)?;
        if output_key != expected_key {
            return Err(ConsensusError::WrongOutputKey { index: vout_index });
        }
    }
    Ok(())
}

/// Check a governance output key against the deterministic derivation for
/// the scheduled wallet.
pub fn validate_governance_reward_key(
    height: u64,
    wallet: &AccountAddress,
    output_index: u64,
    output_key: PublicKey,
) -> ConsensusResult<bool> {
    let block_key = deterministic_block_keypair(height);
    let expected = deterministic_output_key(wallet, &block_key, output_index)?;
    Ok(expected == output_key)
}

/// Check a dev-fund output key against the deterministic derivation for the
/// scheduled wallet.
pub fn validate_dev_fund_reward_key(
    height: u64,
    wallet: &AccountAddress,
    output_index: u64,
    output_key: PublicKey,
) -> ConsensusResult<bool> {
    validate_governance_reward_key(height, wallet, output_index, output_key)
}
