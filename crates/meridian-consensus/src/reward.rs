//! Block reward calculation.
//!
//! Splits each block's coinbase into the miner, per-contributor service
//! node, governance and dev-fund parts. The governance and dev-fund
//! schedules are height-keyed tables that form part of the consensus rules;
//! every branch below must be reproduced exactly.

use crate::staking::mul_div;
use crate::{
    ConsensusError, ConsensusResult, Network, COIN, EMISSION_SPEED_FACTOR_PER_MINUTE,
    FINAL_SUBSIDY_PER_MINUTE, MONEY_SUPPLY, SERVICE_NODE_VERSION, STAKING_PORTIONS,
};
use meridian_types::AccountAddress;
use tracing::error;

/// One-off mint amounts shared between schedule entries.
const BRIDGE_MINT: u64 = 167_195_840_000;
const SUPPLY_BURN_2: u64 = 40_000_000_000;
const CORP_MINT: u64 = 80_000_000_000;
const REPLACEMENT_BRIDGE_MINT: u64 = 20_000_000_000;

/// Winner contributor addresses with their payout portions.
pub type WinnerInfo = Vec<(AccountAddress, u64)>;

/// The null winner: one null address holding all portions. Used when the
/// registry has no eligible node so the coinbase still carries a
/// service-node output row.
pub fn null_winner() -> WinnerInfo {
    vec![(AccountAddress::NULL, STAKING_PORTIONS)]
}

/// The computed split of a block's coinbase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RewardParts {
    /// Base reward before the governance and dev-fund parts are removed.
    pub original_base_reward: u64,
    /// Base reward with the scheduled parts removed.
    pub adjusted_base_reward: u64,
    /// Scheduled governance amount at this height.
    pub governance: u64,
    /// Scheduled dev-fund amount at this height.
    pub dev_fund: u64,
    /// Total service-node share of the adjusted reward.
    pub service_node_total: u64,
    /// Operator half of the service-node share (pooled-node era).
    pub operator_reward: u64,
    /// Staker half of the service-node share (pooled-node era).
    pub staker_reward: u64,
    /// Miner share of the adjusted reward.
    pub base_miner: u64,
    /// Fees collected by the miner on top of the base share.
    pub base_miner_fee: u64,
    /// Sum of the per-contributor payouts actually owed.
    pub service_node_paid: u64,
}

impl RewardParts {
    /// What the miner output pays.
    pub fn miner_reward(&self) -> u64 {
        self.base_miner + self.base_miner_fee
    }
}

/// The base block reward with the big-block penalty applied.
///
/// Fails when the block weight exceeds twice the effective median. Returns
/// zero once the supply is exhausted (there is no tail emission).
pub fn base_block_reward(
    median_weight: u64,
    current_block_weight: u64,
    already_generated_coins: u64,
    hf: u8,
) -> ConsensusResult<u64> {
    let target_minutes: u64 = match hf {
        0 | 1 => 1,
        2 => 3,
        _ => 2,
    };
    let emission_speed_factor = EMISSION_SPEED_FACTOR_PER_MINUTE - (target_minutes - 1);

    let remaining = MONEY_SUPPLY.saturating_sub(already_generated_coins);
    let mut base_reward = remaining >> emission_speed_factor;
    if base_reward < FINAL_SUBSIDY_PER_MINUTE * target_minutes {
        base_reward = FINAL_SUBSIDY_PER_MINUTE * target_minutes;
    }

    let full_reward_zone = crate::min_block_weight(hf);
    let median_weight = median_weight.max(full_reward_zone);
    if current_block_weight <= median_weight {
        return Ok(base_reward);
    }
    if current_block_weight > 2 * median_weight {
        return Err(ConsensusError::BlockTooBig {
            weight: current_block_weight,
            max: 2 * median_weight,
        });
    }

    // Quadratic penalty: base * (2*median - weight) * weight / median^2.
    let product =
        u128::from(2 * median_weight - current_block_weight) * u128::from(current_block_weight);
    let penalized =
        u128::from(base_reward) * product / (u128::from(median_weight) * u128::from(median_weight));
    Ok(penalized as u64)
}

/// Scheduled governance amount at a height. First matching rule wins.
pub fn governance_amount(height: u64, network: Network) -> u64 {
    match network {
        Network::Mainnet | Network::Fakechain => {
            const F: u64 = 352_846;
            if (height >= F && height <= F + 6 * 21_600) && (height - F) % 21_600 == 0 {
                1_000_000 * COIN
            } else if height == 500_000 {
                11_000_000 * COIN
            } else if height == 663_269 {
                BRIDGE_MINT
            } else if height == 841_197 {
                SUPPLY_BURN_2
            } else if height == 898_176 {
                CORP_MINT
            } else if height == F + 583_654 {
                REPLACEMENT_BRIDGE_MINT
            } else if height > F + 583_654 && height % 21_600 == 0 && height < 991_430 {
                200_000 * COIN
            } else if height == F + 638_584 {
                CORP_MINT * 5
            } else if height > F + 638_584 && height % 10_800 == 0 && height < 1_056_414 {
                225_000 * COIN
            } else if height == F + 703_568 {
                // One-off bridge tranche, fixed as raw arithmetic over the
                // original hex constants.
                let principal = 0x502f_9000u64 / 0x2 * 0x3;
                (principal as f64 / (0xfe014 as f64 / 130_500.0).exp2() / 100.0 * 10e6) as u64
            } else if height > F + 0xd8303 && height % 2 == 0 && height < 0x12e56f {
                0xB_A43B_7400
            } else if height > F + 0xd8321 && height < 0x12e5d4 {
                0x2_540B_E400
            } else {
                0
            }
        }
        Network::Testnet => {
            const F: u64 = 250;
            if (height >= F && height <= F + 6 * 216) && (height - F) % 216 == 0 {
                1_000_000 * COIN
            } else if height == F + 7 {
                REPLACEMENT_BRIDGE_MINT
            } else if height > F + 7 && height % 10 == 0 {
                200_000 * COIN
            } else if height == F + 50 {
                CORP_MINT * 5
            } else if height > F + 50 && height % 5 == 0 {
                225_000 * COIN
            } else if height == 500_000 {
                11_000_000 * COIN
            } else {
                0
            }
        }
        Network::Stagenet => 0,
    }
}

/// Scheduled dev-fund amount at a height (zero before the dev-fund fork;
/// the caller gates on the hard fork).
pub fn dev_fund_amount(height: u64, network: Network) -> u64 {
    match network {
        Network::Mainnet | Network::Fakechain => {
            const F: u64 = 352_846;
            if height == F + 703_568 {
                125_000 * COIN
            } else if height > F + 703_568 && height % 10_800 == 0 && height < 1_238_350 {
                125_000 * COIN
            } else if height > F + 885_504 && height % 5_400 == 0 {
                125_000 * COIN
            } else {
                0
            }
        }
        Network::Testnet | Network::Stagenet => 0,
    }
}

/// Service-node share of the adjusted base reward.
pub fn service_node_reward_formula(adjusted_base_reward: u64, hf: u8) -> u64 {
    if hf > 11 {
        adjusted_base_reward / 4 * 3
    } else if hf >= SERVICE_NODE_VERSION {
        adjusted_base_reward / 2
    } else {
        0
    }
}

/// A contributor's cut of a reward pot, by portions.
pub fn get_portion_of_reward(portions: u64, total_service_node_reward: u64) -> u64 {
    mul_div(total_service_node_reward, portions, STAKING_PORTIONS)
}

fn calculate_sum_of_portions(winner_info: &[(AccountAddress, u64)], parts: &RewardParts, hf: u8) -> u64 {
    let mut reward = 0u64;
    for (i, (_, portions)) in winner_info.iter().enumerate() {
        reward += if hf >= 17 {
            get_portion_of_reward(*portions, parts.service_node_total)
        } else if hf >= 12 {
            let pot = if i == 0 {
                parts.operator_reward
            } else {
                parts.staker_reward
            };
            get_portion_of_reward(*portions, pot)
        } else {
            get_portion_of_reward(*portions, parts.service_node_total)
        };
    }
    reward
}

/// Compute the full reward split for a block.
///
/// `winner_info` is the winner's contributor payout list from the registry;
/// pass an empty slice when there is no winner and the null winner row is
/// substituted.
#[allow(clippy::too_many_arguments)]
pub fn block_reward_parts(
    median_weight: u64,
    current_block_weight: u64,
    already_generated_coins: u64,
    hf: u8,
    height: u64,
    network: Network,
    fee: u64,
    winner_info: &[(AccountAddress, u64)],
) -> ConsensusResult<RewardParts> {
    let mut result = RewardParts::default();
    let mut base_reward = base_block_reward(
        median_weight,
        current_block_weight,
        already_generated_coins,
        hf,
    )?;

    result.governance = if hf >= 7 {
        governance_amount(height, network)
    } else {
        0
    };
    base_reward += result.governance;

    result.dev_fund = if hf >= 17 {
        dev_fund_amount(height, network)
    } else {
        0
    };
    base_reward += result.dev_fund;

    if base_reward == 0 {
        error!(height, "unexpected base reward of 0");
        return Err(ConsensusError::InvalidBaseReward);
    }

    if already_generated_coins == 0 {
        result.original_base_reward = base_reward;
        result.adjusted_base_reward = base_reward;
        result.base_miner = base_reward;
        return Ok(result);
    }

    result.original_base_reward = base_reward;
    result.adjusted_base_reward = base_reward - result.governance - result.dev_fund;
    result.service_node_total = service_node_reward_formula(result.adjusted_base_reward, hf);
    result.operator_reward = result.service_node_total / 2;
    result.staker_reward = result.service_node_total - result.operator_reward;

    let null = null_winner();
    let payouts: &[(AccountAddress, u64)] = if winner_info.is_empty() {
        &null
    } else {
        winner_info
    };
    result.service_node_paid = calculate_sum_of_portions(payouts, &result, hf);

    result.base_miner = result.adjusted_base_reward - result.service_node_total;
    result.base_miner_fee = fee;
    Ok(result)
}
