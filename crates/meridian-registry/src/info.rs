//! Per-node registry state.

use crate::swarm::SwarmId;
use meridian_consensus::staking::min_node_contribution;
use meridian_types::{AccountAddress, ByteReader, ByteWriter, TypeResult};

/// A node's swarm id before the rebalancer assigns one.
pub const UNASSIGNED_SWARM_ID: SwarmId = u64::MAX;

/// Registry entry format versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum InfoVersion {
    /// Before swarms existed.
    #[default]
    Legacy = 0,
    /// Carries a swarm id.
    WithSwarm = 1,
    /// Pooled staking era.
    Pooled = 2,
}

impl InfoVersion {
    fn from_u64(value: u64) -> InfoVersion {
        match value {
            0 => InfoVersion::Legacy,
            1 => InfoVersion::WithSwarm,
            _ => InfoVersion::Pooled,
        }
    }
}

/// One contributor's stake in a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Contribution {
    /// Amount actually staked so far.
    pub amount: u64,
    /// Amount the contributor promised at registration.
    pub reserved: u64,
    /// The contributor's wallet.
    pub address: AccountAddress,
}

impl Contribution {
    /// A fresh reservation with nothing transferred yet.
    pub fn reserved(reserved: u64, address: AccountAddress) -> Self {
        Self {
            amount: 0,
            reserved,
            address,
        }
    }
}

/// Registration state of one service node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceNodeInfo {
    /// Entry format version.
    pub version: InfoVersion,
    /// Height of the registration transaction.
    pub registration_height: u64,
    /// Height at which the node last received a reward.
    pub last_reward_block_height: u64,
    /// Index of the transaction that last rewarded the node; `u32::MAX`
    /// marks the coinbase winner bump.
    pub last_reward_transaction_index: u32,
    /// Contributors in reservation order; index 0 is the operator.
    pub contributors: Vec<Contribution>,
    /// Sum of contributor amounts.
    pub total_contributed: u64,
    /// Sum of contributor reservations.
    pub total_reserved: u64,
    /// Target stake fixed at registration.
    pub staking_requirement: u64,
    /// Operator share in units of `STAKING_PORTIONS`.
    pub portions_for_operator: u64,
    /// Swarm membership (`UNASSIGNED_SWARM_ID` until rebalanced).
    pub swarm_id: SwarmId,
    /// The operator's wallet.
    pub operator_address: AccountAddress,
}

impl ServiceNodeInfo {
    /// A node whose reservations are fully covered by actual stakes.
    pub fn is_valid(&self) -> bool {
        self.total_contributed >= self.total_reserved
    }

    /// A node whose stakes meet the full staking requirement.
    pub fn is_fully_funded(&self) -> bool {
        self.total_contributed >= self.staking_requirement
    }

    /// Minimum acceptable contribution for this node at a hard fork.
    pub fn min_contribution(&self, hf: u8) -> u64 {
        min_node_contribution(hf, self.staking_requirement, self.total_reserved)
    }

    /// Serialize in the declared persisted field order.
    pub fn write(&self, w: &mut ByteWriter) {
        w.put_varint(self.version as u64);
        w.put_varint(self.registration_height);
        w.put_varint(self.last_reward_block_height);
        w.put_varint(u64::from(self.last_reward_transaction_index));
        w.put_varint(self.contributors.len() as u64);
        for c in &self.contributors {
            w.put_varint(c.amount);
            w.put_varint(c.reserved);
            w.put_bytes(c.address.spend.as_bytes());
            w.put_bytes(c.address.view.as_bytes());
        }
        w.put_varint(self.total_contributed);
        w.put_varint(self.total_reserved);
        w.put_varint(self.staking_requirement);
        w.put_varint(self.portions_for_operator);
        if self.version >= InfoVersion::WithSwarm {
            w.put_varint(self.swarm_id);
        }
        w.put_bytes(self.operator_address.spend.as_bytes());
        w.put_bytes(self.operator_address.view.as_bytes());
    }

    /// Parse the persisted field order.
    pub fn read(r: &mut ByteReader<'_>) -> TypeResult<ServiceNodeInfo> {
        let version = InfoVersion::from_u64(r.get_varint("info version")?);
        let registration_height = r.get_varint("registration height")?;
        let last_reward_block_height = r.get_varint("last reward height")?;
        let last_reward_transaction_index = r.get_varint("last reward index")? as u32;
        let contributor_count = r.get_varint("contributor count")? as usize;
        let mut contributors = Vec::with_capacity(contributor_count);
        for _ in 0..contributor_count {
            let amount = r.get_varint("contribution amount")?;
            let reserved = r.get_varint("contribution reserved")?;
            let spend = meridian_types::PublicKey(r.get_array32("contributor spend")?);
            let view = meridian_types::PublicKey(r.get_array32("contributor view")?);
            contributors.push(Contribution {
                amount,
                reserved,
                address: AccountAddress::new(spend, view),
            });
        }
        let total_contributed = r.get_varint("total contributed")?;
        let total_reserved = r.get_varint("total reserved")?;
        let staking_requirement = r.get_varint("staking requirement")?;
        let portions_for_operator = r.get_varint("operator portions")?;
        let swarm_id = if version >= InfoVersion::WithSwarm {
            r.get_varint("swarm id")?
        } else {
            UNASSIGNED_SWARM_ID
        };
        let spend = meridian_types::PublicKey(r.get_array32("operator spend")?);
        let view = meridian_types::PublicKey(r.get_array32("operator view")?);
        Ok(ServiceNodeInfo {
            version,
            registration_height,
            last_reward_block_height,
            last_reward_transaction_index,
            contributors,
            total_contributed,
            total_reserved,
            staking_requirement,
            portions_for_operator,
            swarm_id,
            operator_address: AccountAddress::new(spend, view),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meridian_types::PublicKey;

    fn sample_info() -> ServiceNodeInfo {
        ServiceNodeInfo {
            version: InfoVersion::WithSwarm,
            registration_height: 100,
            last_reward_block_height: 120,
            last_reward_transaction_index: 3,
            contributors: vec![Contribution {
                amount: 500,
                reserved: 800,
                address: AccountAddress::new(
                    PublicKey::from_bytes([1; 32]),
                    PublicKey::from_bytes([2; 32]),
                ),
            }],
            total_contributed: 500,
            total_reserved: 800,
            staking_requirement: 1_000,
            portions_for_operator: 42,
            swarm_id: 7,
            operator_address: AccountAddress::new(
                PublicKey::from_bytes([1; 32]),
                PublicKey::from_bytes([2; 32]),
            ),
        }
    }

    #[test]
    fn predicates() {
        let mut info = sample_info();
        assert!(!info.is_valid());
        assert!(!info.is_fully_funded());
        info.total_contributed = 800;
        assert!(info.is_valid());
        info.total_contributed = 1_000;
        assert!(info.is_fully_funded());
    }

    #[test]
    fn serialization_round_trip() {
        let info = sample_info();
        let mut w = ByteWriter::new();
        info.write(&mut w);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(ServiceNodeInfo::read(&mut r).unwrap(), info);
        assert!(r.is_exhausted());
    }

    #[test]
    fn legacy_version_has_no_swarm_field() {
        let mut info = sample_info();
        info.version = InfoVersion::Legacy;
        let mut w = ByteWriter::new();
        info.write(&mut w);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        let parsed = ServiceNodeInfo::read(&mut r).unwrap();
        assert_eq!(parsed.swarm_id, UNASSIGNED_SWARM_ID);
    }
}
