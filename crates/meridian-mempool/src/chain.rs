//! The blockchain surface the pool consumes.

use crate::RelayMethod;
use meridian_types::{Hash, Transaction};

/// Outcome of a successful input check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputCheckOutcome {
    /// Highest block the inputs reference.
    pub max_used_block_height: u64,
    /// Id of that block.
    pub max_used_block_id: Hash,
}

/// Rejection flags reported to the RPC layer so peers can be penalised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VerifyFlags {
    pub verification_failed: bool,
    /// The transaction belongs to an alternative chain; it was kept but
    /// cannot be verified right now.
    pub verification_impossible: bool,
    pub added_to_pool: bool,
    pub double_spend: bool,
    pub invalid_input: bool,
    pub invalid_output: bool,
    pub too_big: bool,
    pub fee_too_low: bool,
    pub invalid_version: bool,
    /// How the transaction should be relayed onward.
    pub relay: RelayMethod,
}

/// Read access to the blockchain, implemented by the chain driver.
///
/// Lock order: the pool lock is always taken before any lock inside the
/// implementation.
pub trait ChainAccess: Send + Sync {
    /// Current chain height (top block height + 1).
    fn current_height(&self) -> u64;

    /// Block id on the main chain at a height.
    fn block_id_by_height(&self, height: u64) -> Option<Hash>;

    /// Hard-fork version in force at a height.
    fn hard_fork_version(&self, height: u64) -> u8;

    /// Dynamic fee check for a transaction of the given weight.
    fn check_fee(&self, tx_weight: u64, fee: u64) -> bool;

    /// Verify the transaction's inputs against the chain. `None` means the
    /// inputs do not currently verify.
    fn check_tx_inputs(&self, tx: &Transaction) -> Option<InputCheckOutcome>;

    /// Validate the transaction's outputs.
    fn check_tx_outputs(&self, tx: &Transaction) -> bool;

    /// Whether any of the transaction's key images is already spent on the
    /// chain.
    fn have_tx_key_images_as_spent(&self, tx: &Transaction) -> bool;

    /// Whether the transaction is already mined on the chain.
    fn have_tx(&self, id: &Hash) -> bool;

    /// Coins generated up to the chain tip.
    fn already_generated_coins(&self) -> u64;
}
