//! The rollback journal.
//!
//! Every registry mutation pushes an inverse event. On chain detach the
//! journal is replayed back-to-front until the detach height; hitting the
//! retention sentinel means the reorganization is deeper than the journal
//! and the registry must be rebuilt from scratch.

use crate::info::ServiceNodeInfo;
use meridian_types::{ByteReader, ByteWriter, PublicKey, TypeError, TypeResult};
use std::collections::HashMap;
use tracing::error;

/// Persisted variant tags.
const TAG_CHANGE: u8 = 0xa1;
const TAG_NEW: u8 = 0xa2;
const TAG_PREVENT: u8 = 0xa3;

/// One reversible mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackEvent {
    /// An existing entry was modified or removed; restores the prior state.
    Change {
        block_height: u64,
        key: PublicKey,
        prior: ServiceNodeInfo,
    },
    /// A new entry was inserted; removes it again.
    New { block_height: u64, key: PublicKey },
    /// Retention sentinel. Rolling back past this point is impossible.
    PreventBefore { block_height: u64 },
}

impl RollbackEvent {
    /// The height the event belongs to.
    pub fn block_height(&self) -> u64 {
        match self {
            RollbackEvent::Change { block_height, .. }
            | RollbackEvent::New { block_height, .. }
            | RollbackEvent::PreventBefore { block_height } => *block_height,
        }
    }

    /// Undo the recorded mutation. Returns false for the sentinel, which
    /// signals that the rollback horizon was reached.
    pub fn apply(&self, infos: &mut HashMap<PublicKey, ServiceNodeInfo>) -> bool {
        match self {
            RollbackEvent::Change { key, prior, .. } => {
                infos.insert(*key, prior.clone());
                true
            }
            RollbackEvent::New { key, .. } => {
                if infos.remove(key).is_none() {
                    error!(%key, "rollback of an insertion found no entry");
                    return false;
                }
                true
            }
            RollbackEvent::PreventBefore { block_height } => {
                error!(
                    height = block_height,
                    "rollback horizon reached, cannot roll back further"
                );
                false
            }
        }
    }

    /// Serialize as a tagged variant.
    pub fn write(&self, w: &mut ByteWriter) {
        match self {
            RollbackEvent::Change {
                block_height,
                key,
                prior,
            } => {
                w.put_u8(TAG_CHANGE);
                w.put_varint(*block_height);
                w.put_bytes(key.as_bytes());
                prior.write(w);
            }
            RollbackEvent::New { block_height, key } => {
                w.put_u8(TAG_NEW);
                w.put_varint(*block_height);
                w.put_bytes(key.as_bytes());
            }
            RollbackEvent::PreventBefore { block_height } => {
                w.put_u8(TAG_PREVENT);
                w.put_varint(*block_height);
            }
        }
    }

    /// Parse a tagged variant.
    pub fn read(r: &mut ByteReader<'_>) -> TypeResult<RollbackEvent> {
        let tag = r.get_u8("rollback tag")?;
        let block_height = r.get_varint("rollback height")?;
        Ok(match tag {
            TAG_CHANGE => RollbackEvent::Change {
                block_height,
                key: PublicKey(r.get_array32("rollback key")?),
                prior: ServiceNodeInfo::read(r)?,
            },
            TAG_NEW => RollbackEvent::New {
                block_height,
                key: PublicKey(r.get_array32("rollback key")?),
            },
            TAG_PREVENT => RollbackEvent::PreventBefore { block_height },
            other => return Err(TypeError::UnknownTag(other, "rollback event")),
        })
    }
}
