//! Consensus-relevant block structure.

use crate::{ByteWriter, Hash, Transaction, TxInput};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

/// A block as seen by the consensus core.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Block {
    /// Hard-fork major version the block was mined under.
    pub major_version: u8,
    /// Vote for the next hard fork.
    pub minor_version: u8,
    /// Miner-reported timestamp.
    pub timestamp: u64,
    /// Id of the previous block.
    pub prev_id: Hash,
    /// Proof-of-work nonce.
    pub nonce: u32,
    /// The coinbase transaction.
    pub miner_tx: Transaction,
    /// Ids of the non-coinbase transactions, in block order.
    pub tx_hashes: Vec<Hash>,
}

impl Block {
    /// Block height, taken from the coinbase input. Zero when the coinbase
    /// is malformed; the chain driver rejects such blocks long before they
    /// reach the registry.
    pub fn height(&self) -> u64 {
        match self.miner_tx.inputs.first() {
            Some(TxInput::Coinbase(gen)) => gen.height,
            _ => 0,
        }
    }

    /// Block id: Blake2b-256 over the header fields and the coinbase id.
    pub fn hash(&self) -> Hash {
        let mut w = ByteWriter::new();
        w.put_u8(self.major_version);
        w.put_u8(self.minor_version);
        w.put_varint(self.timestamp);
        w.put_bytes(self.prev_id.as_bytes());
        w.put_bytes(&self.nonce.to_le_bytes());
        w.put_bytes(self.miner_tx.hash().as_bytes());
        w.put_varint(self.tx_hashes.len() as u64);
        for h in &self.tx_hashes {
            w.put_bytes(h.as_bytes());
        }
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(w.into_bytes());
        Hash(hasher.finalize().into())
    }
}
