//! # meridian-consensus
//!
//! Consensus rules for the Meridian network.
//!
//! This crate provides:
//! - Per-network hard-fork schedules and chain constants
//! - The staking requirement curve and portion arithmetic
//! - The block reward calculator (base reward, governance and dev-fund
//!   schedules, service-node split)
//! - The coinbase transaction builder and validator

mod error;
mod hardfork;
mod miner_tx;
mod network;
mod reward;
pub mod staking;

pub use error::{ConsensusError, ConsensusResult};
pub use hardfork::{hard_fork_height, hard_fork_version_at, HardForkEntry};
pub use miner_tx::{
    construct_miner_tx, validate_dev_fund_reward_key, validate_governance_reward_key,
    validate_service_node_rewards, MinerTxContext,
};
pub use network::{Network, NetworkConfig};
pub use reward::{
    base_block_reward, block_reward_parts, dev_fund_amount, get_portion_of_reward,
    governance_amount, null_winner, service_node_reward_formula, RewardParts, WinnerInfo,
};

/// Number of atomic units in one coin (4 display decimals).
pub const COIN: u64 = 10_000;

/// Total supply in atomic units.
pub const MONEY_SUPPLY: u64 = 840_000_000_000;

/// Emission speed factor per minute of target time.
pub const EMISSION_SPEED_FACTOR_PER_MINUTE: u64 = 20;

/// Tail-emission subsidy per minute (none).
pub const FINAL_SUBSIDY_PER_MINUTE: u64 = 0;

/// Hard fork that activates service nodes.
pub const SERVICE_NODE_VERSION: u8 = 5;

/// Hard fork from which declared fees may carry a burned component.
pub const FEE_BURNING_VERSION: u8 = 9;

/// Fixed denominator of staking portions, divisible by 2, 3 and 4.
pub const STAKING_PORTIONS: u64 = 0xffff_ffff_ffff_fffc;

/// Maximum reserved contributors per node, by hard fork era.
pub const MAX_NUMBER_OF_CONTRIBUTORS: usize = 4;
pub const MAX_NUMBER_OF_CONTRIBUTORS_V2: usize = 100;
pub const MAX_NUMBER_OF_CONTRIBUTORS_V3: usize = 1_000;

/// Minimum portion a reserved contributor may hold at registration.
pub const MIN_PORTIONS: u64 = STAKING_PORTIONS / MAX_NUMBER_OF_CONTRIBUTORS as u64;

/// Operator stake bounds in whole coins for the pooled-node era.
pub const MIN_OPERATOR_V12: u64 = 10_000;
pub const MAX_OPERATOR_V12: u64 = 35_000;

/// Pool staker bounds in whole coins for the pooled-node era.
pub const MIN_POOL_STAKERS_V12: u64 = 100;
pub const MAX_POOL_STAKERS_V12: u64 = 65_000;

/// Blocks a stake stays locked after registration.
pub const STAKING_LOCK_BLOCKS_MAINNET: u64 = 20_160;
pub const STAKING_LOCK_BLOCKS_TESTNET: u64 = 1_440;
pub const STAKING_LOCK_BLOCKS_FAKECHAIN: u64 = 30;

/// Grace blocks past the lock before a node expires.
pub const STAKING_LOCK_BLOCKS_EXCESS: u64 = 20;

/// Seconds a signed registration stays valid before inclusion.
pub const STAKING_AUTHORIZATION_EXPIRATION_WINDOW: u64 = 60 * 60 * 24 * 7 * 2;

/// Blocks before mined outputs unlock.
pub const MINED_MONEY_UNLOCK_WINDOW: u64 = 60;

/// Blocks a deregistration decision stays referencable. The longer window
/// applies from hard fork 8 in the registry's quorum retention and from
/// hard fork 9 in the pool's freshness check.
pub const DEREGISTER_LIFETIME_V1: u64 = 40;
pub const DEREGISTER_LIFETIME_V2: u64 = 60;

/// Bytes reserved in a block template for the coinbase blob.
pub const COINBASE_BLOB_RESERVED_SIZE: u64 = 600;

/// Full-reward zone: block weight under which no penalty applies.
pub fn min_block_weight(hf: u8) -> u64 {
    match hf {
        0 | 1 => 90_000,
        2..=4 => 80_000,
        _ => 1_000_000,
    }
}

/// Staking lock blocks for a network.
pub fn staking_lock_blocks(network: Network) -> u64 {
    match network {
        Network::Testnet => STAKING_LOCK_BLOCKS_TESTNET,
        Network::Fakechain => STAKING_LOCK_BLOCKS_FAKECHAIN,
        _ => STAKING_LOCK_BLOCKS_MAINNET,
    }
}
