//! Pool priority ordering.
//!
//! Deregistrations form a priority class ahead of all transfers; within a
//! class, higher fee per byte wins, then earlier arrival. The transaction
//! id breaks the final tie so the set order is total.

use meridian_types::Hash;
use std::cmp::Ordering;

/// Priority key for one pooled transaction.
#[derive(Debug, Clone)]
pub struct PoolOrderKey {
    /// Deregistrations sort ahead of everything else.
    pub is_deregister: bool,
    /// Miner fee.
    pub fee: u64,
    /// Transaction weight in bytes.
    pub weight: u64,
    /// Unix receive time.
    pub receive_time: u64,
    /// Transaction id.
    pub tx_id: Hash,
}

impl PoolOrderKey {
    /// Build the key for a transaction.
    pub fn new(is_deregister: bool, fee: u64, weight: u64, receive_time: u64, tx_id: Hash) -> Self {
        Self {
            is_deregister,
            fee,
            weight,
            receive_time,
            tx_id,
        }
    }

    /// Fee per byte used for ordering.
    pub fn fee_per_byte(&self) -> f64 {
        if self.weight == 0 {
            0.0
        } else {
            self.fee as f64 / self.weight as f64
        }
    }
}

impl PartialEq for PoolOrderKey {
    fn eq(&self, other: &Self) -> bool {
        self.tx_id == other.tx_id
    }
}

impl Eq for PoolOrderKey {}

impl PartialOrd for PoolOrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PoolOrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        // Deregisters first.
        match other.is_deregister.cmp(&self.is_deregister) {
            Ordering::Equal => {}
            ord => return ord,
        }
        // Higher fee per byte first.
        match other
            .fee_per_byte()
            .partial_cmp(&self.fee_per_byte())
            .unwrap_or(Ordering::Equal)
        {
            Ordering::Equal => {}
            ord => return ord,
        }
        // Earlier arrival first, then the id for a total order.
        match self.receive_time.cmp(&other.receive_time) {
            Ordering::Equal => self.tx_id.cmp(&other.tx_id),
            ord => ord,
        }
    }
}
