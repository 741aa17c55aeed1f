//! Per-transaction pool metadata and the relay state machine.

use meridian_types::Hash;

/// How a pool transaction is (or was) propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum RelayMethod {
    /// Received but not yet relayed anywhere.
    #[default]
    None,
    /// Held for local relay over a private route.
    Local,
    /// Dandelion++ stem phase, under an embargo timer.
    Stem,
    /// Dandelion++ fluff phase, broadcast to all peers.
    Fluff,
    /// Arrived in (or returned from) a block.
    Block,
}

impl RelayMethod {
    /// Whether a transition from `self` to `target` is legal.
    pub fn can_upgrade_to(self, target: RelayMethod) -> bool {
        use RelayMethod::*;
        match (self, target) {
            (None, Local) | (None, Stem) | (None, Fluff) | (None, Block) => true,
            (Local, Fluff) | (Local, Block) => true,
            (Stem, Fluff) | (Stem, Block) => true,
            (Fluff, Block) => true,
            _ => false,
        }
    }
}

/// Metadata tracked for every pooled transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxMeta {
    /// Transaction weight in bytes.
    pub weight: u64,
    /// Miner fee.
    pub fee: u64,
    /// Unix time the transaction entered the pool.
    pub receive_time: u64,
    /// Last relay time; while in stem this holds the embargo deadline.
    pub last_relayed_time: u64,
    /// Highest block consumed when the inputs last verified.
    pub max_used_block_height: u64,
    /// Id of that block.
    pub max_used_block_id: Hash,
    /// Height of the last failed input check.
    pub last_failed_height: u64,
    /// Id of the block at that height when it failed.
    pub last_failed_id: Hash,
    /// Current relay state.
    pub relay_method: RelayMethod,
    /// Returned to the pool by a popped block; relaxed checks apply.
    pub kept_by_block: bool,
    /// Seen from another peer already.
    pub relayed: bool,
    /// Never relay (local-only transactions).
    pub do_not_relay: bool,
    /// A conflicting spend of one of its key images was seen.
    pub double_spend_seen: bool,
    /// Signature sections were pruned away.
    pub pruned: bool,
    /// Deregistration transaction.
    pub is_deregister: bool,
}

impl TxMeta {
    /// Set the relay state unconditionally, tracking the kept-by-block
    /// origin.
    pub fn set_relay_method(&mut self, method: RelayMethod) {
        self.relay_method = method;
        if method == RelayMethod::Block {
            self.kept_by_block = true;
        }
    }

    /// Upgrade the relay state if the transition is legal. Returns whether
    /// anything changed.
    pub fn upgrade_relay_method(&mut self, target: RelayMethod) -> bool {
        if self.relay_method.can_upgrade_to(target) {
            self.set_relay_method(target);
            true
        } else {
            false
        }
    }

    /// In the Dandelion++ stem phase.
    pub fn dandelion_stem(&self) -> bool {
        self.relay_method == RelayMethod::Stem
    }

    /// Broadcast publicly: eligible for block templates.
    pub fn is_broadcast(&self) -> bool {
        matches!(self.relay_method, RelayMethod::Fluff | RelayMethod::Block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RelayMethod::*;

    #[test]
    fn legal_transitions() {
        for target in [Local, Stem, Fluff, Block] {
            assert!(None.can_upgrade_to(target));
        }
        assert!(Local.can_upgrade_to(Fluff));
        assert!(Local.can_upgrade_to(Block));
        assert!(Stem.can_upgrade_to(Fluff));
        assert!(Stem.can_upgrade_to(Block));
        assert!(Fluff.can_upgrade_to(Block));
    }

    #[test]
    fn illegal_transitions() {
        assert!(!Fluff.can_upgrade_to(Stem));
        assert!(!Fluff.can_upgrade_to(Local));
        assert!(!Block.can_upgrade_to(Fluff));
        assert!(!Stem.can_upgrade_to(Local));
        assert!(!Local.can_upgrade_to(Stem));
        assert!(!None.can_upgrade_to(None));
    }

    #[test]
    fn block_marks_kept_by_block() {
        let mut meta = TxMeta::default();
        assert!(meta.upgrade_relay_method(Block));
        assert!(meta.kept_by_block);
        // Downgrades are rejected and leave the state alone.
        assert!(!meta.upgrade_relay_method(Fluff));
        assert_eq!(meta.relay_method, Block);
    }
}
