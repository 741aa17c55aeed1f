//! Consensus-relevant transaction structures and the tx-extra codec.
//!
//! Ring signatures and range proofs are validated by the crypto layer and
//! never inspected here; the consensus core only sees the prefix fields it
//! needs: version, type, unlock times, inputs, outputs, the declared fee
//! and the tagged extra blob.

use crate::{
    AccountAddress, ByteReader, ByteWriter, Hash, KeyImage, PublicKey, SecretKey, Signature,
    TypeError, TypeResult,
};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};

/// Transaction format versions. Version 0 is never valid; version 3
/// introduced per-output unlock times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TxVersion {
    V0,
    V1,
    V2,
    V3,
    V4,
}

impl TxVersion {
    /// Highest version accepted at a hard fork.
    pub fn max_for_hard_fork(hf: u8) -> TxVersion {
        match hf {
            0..=3 => TxVersion::V1,
            4..=11 => TxVersion::V2,
            12..=17 => TxVersion::V3,
            _ => TxVersion::V4,
        }
    }

    /// Numeric encoding used on the wire.
    pub fn as_u64(self) -> u64 {
        match self {
            TxVersion::V0 => 0,
            TxVersion::V1 => 1,
            TxVersion::V2 => 2,
            TxVersion::V3 => 3,
            TxVersion::V4 => 4,
        }
    }

    fn from_u64(value: u64) -> TypeResult<Self> {
        Ok(match value {
            0 => TxVersion::V0,
            1 => TxVersion::V1,
            2 => TxVersion::V2,
            3 => TxVersion::V3,
            4 => TxVersion::V4,
            _ => return Err(TypeError::UnknownTag(value as u8, "tx version")),
        })
    }
}

/// Transaction kinds understood by consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxType {
    /// Plain transfer (doubles as registration/contribution before the
    /// typed-stake hard fork).
    #[default]
    Standard,
    /// Removes a service node by referencing a quorum decision.
    Deregister,
    /// Typed staking transaction (hard fork 18 onward).
    Stake,
    /// Typed cross-chain swap burn (hard fork 18 onward).
    Swap,
}

impl TxType {
    fn as_u64(self) -> u64 {
        match self {
            TxType::Standard => 0,
            TxType::Deregister => 1,
            TxType::Stake => 2,
            TxType::Swap => 3,
        }
    }

    fn from_u64(value: u64) -> TypeResult<Self> {
        Ok(match value {
            0 => TxType::Standard,
            1 => TxType::Deregister,
            2 => TxType::Stake,
            3 => TxType::Swap,
            _ => return Err(TypeError::UnknownTag(value as u8, "tx type")),
        })
    }
}

/// The single input of a coinbase transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoinbaseInput {
    /// Height of the block this coinbase pays for.
    pub height: u64,
}

/// Transaction inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxInput {
    /// Coinbase marker input.
    Coinbase(CoinbaseInput),
    /// Ring-referencing input spending a one-time output.
    ToKey {
        /// Cleartext amount (zero for confidential outputs).
        amount: u64,
        /// Relative ring member offsets.
        key_offsets: Vec<u64>,
        /// Key image marking the real output spent.
        key_image: KeyImage,
    },
}

/// Output destination kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOutputTarget {
    /// The standard one-time output key.
    ToKey(PublicKey),
    /// Legacy script-hash target, never produced by current wallets.
    ToScriptHash(Hash),
}

/// A transaction output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutput {
    /// Atomic-unit amount.
    pub amount: u64,
    /// Destination.
    pub target: TxOutputTarget,
}

/// Registration data embedded in a staking transaction's extra.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RegisterExtra {
    /// Public spend keys of the reserved contributors, operator first.
    pub public_spend_keys: Vec<PublicKey>,
    /// Public view keys, parallel to `public_spend_keys`.
    pub public_view_keys: Vec<PublicKey>,
    /// Operator share in units of `STAKING_PORTIONS`.
    pub portions_for_operator: u64,
    /// Reserved portions, parallel to the key lists.
    pub portions: Vec<u64>,
    /// Unix timestamp after which the registration is void.
    pub expiration_timestamp: u64,
    /// Signature by the service-node key over the registration hash.
    pub signature: Signature,
}

impl RegisterExtra {
    /// Reconstruct the contributor addresses from the parallel key lists.
    pub fn addresses(&self) -> Vec<AccountAddress> {
        self.public_spend_keys
            .iter()
            .zip(self.public_view_keys.iter())
            .map(|(&spend, &view)| AccountAddress::new(spend, view))
            .collect()
    }
}

/// One quorum member's vote inside a deregister transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeregisterVote {
    /// Index of the voter within the quorum at the voted height.
    pub voters_quorum_index: u32,
    /// The voter's signature.
    pub signature: Signature,
}

/// Deregistration data embedded in a deregister transaction's extra.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeregisterExtra {
    /// Height whose quorum produced the decision.
    pub block_height: u64,
    /// Index into that quorum's `nodes_to_test`.
    pub service_node_index: u32,
    /// The quorum votes backing the removal.
    pub votes: Vec<DeregisterVote>,
}

/// Tag bytes of the tx-extra fields. Each field is encoded as its tag byte
/// followed by a varint length and the body.
mod extra_tag {
    pub const PUB_KEY: u8 = 0x01;
    pub const NONCE: u8 = 0x02;
    pub const ADDITIONAL_PUB_KEYS: u8 = 0x04;
    pub const SERVICE_NODE_REGISTER: u8 = 0x70;
    pub const SERVICE_NODE_DEREGISTER: u8 = 0x71;
    pub const SERVICE_NODE_WINNER: u8 = 0x72;
    pub const SERVICE_NODE_CONTRIBUTOR: u8 = 0x73;
    pub const SERVICE_NODE_PUBKEY: u8 = 0x74;
    pub const TX_SECRET_KEY: u8 = 0x75;
    pub const MEMO: u8 = 0x76;
    pub const BURN_AMOUNT: u8 = 0x77;
}

/// A decoded tx-extra field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxExtraField {
    /// The transaction public key.
    PubKey(PublicKey),
    /// Free-form nonce, carries encrypted payment ids.
    Nonce(Vec<u8>),
    /// Additional per-output public keys (subaddress sends).
    AdditionalPubKeys(Vec<PublicKey>),
    /// Service-node registration.
    Register(RegisterExtra),
    /// Service-node deregistration.
    Deregister(DeregisterExtra),
    /// Coinbase winner marker.
    Winner(PublicKey),
    /// Staking contributor address.
    Contributor(AccountAddress),
    /// Service-node public key of a registration/contribution.
    ServiceNodePubkey(PublicKey),
    /// Revealed tx secret key (stake and swap transactions only).
    TxSecretKey(SecretKey),
    /// Free-form memo (swap metadata).
    Memo(Vec<u8>),
    /// Amount burned by the transaction.
    BurnAmount(u64),
}

impl TxExtraField {
    fn tag(&self) -> u8 {
        match self {
            TxExtraField::PubKey(_) => extra_tag::PUB_KEY,
            TxExtraField::Nonce(_) => extra_tag::NONCE,
            TxExtraField::AdditionalPubKeys(_) => extra_tag::ADDITIONAL_PUB_KEYS,
            TxExtraField::Register(_) => extra_tag::SERVICE_NODE_REGISTER,
            TxExtraField::Deregister(_) => extra_tag::SERVICE_NODE_DEREGISTER,
            TxExtraField::Winner(_) => extra_tag::SERVICE_NODE_WINNER,
            TxExtraField::Contributor(_) => extra_tag::SERVICE_NODE_CONTRIBUTOR,
            TxExtraField::ServiceNodePubkey(_) => extra_tag::SERVICE_NODE_PUBKEY,
            TxExtraField::TxSecretKey(_) => extra_tag::TX_SECRET_KEY,
            TxExtraField::Memo(_) => extra_tag::MEMO,
            TxExtraField::BurnAmount(_) => extra_tag::BURN_AMOUNT,
        }
    }

    fn write_body(&self, w: &mut ByteWriter) {
        match self {
            TxExtraField::PubKey(key) | TxExtraField::Winner(key) => w.put_bytes(key.as_bytes()),
            TxExtraField::ServiceNodePubkey(key) => w.put_bytes(key.as_bytes()),
            TxExtraField::Nonce(data) | TxExtraField::Memo(data) => w.put_bytes(data),
            TxExtraField::AdditionalPubKeys(keys) => {
                w.put_varint(keys.len() as u64);
                for key in keys {
                    w.put_bytes(key.as_bytes());
                }
            }
            TxExtraField::Register(reg) => {
                w.put_varint(reg.public_spend_keys.len() as u64);
                for key in &reg.public_spend_keys {
                    w.put_bytes(key.as_bytes());
                }
                for key in &reg.public_view_keys {
                    w.put_bytes(key.as_bytes());
                }
                w.put_varint(reg.portions_for_operator);
                w.put_varint(reg.portions.len() as u64);
                for &portion in &reg.portions {
                    w.put_varint(portion);
                }
                w.put_varint(reg.expiration_timestamp);
                w.put_bytes(reg.signature.as_bytes());
            }
            TxExtraField::Deregister(dereg) => {
                w.put_varint(dereg.block_height);
                w.put_varint(u64::from(dereg.service_node_index));
                w.put_varint(dereg.votes.len() as u64);
                for vote in &dereg.votes {
                    w.put_varint(u64::from(vote.voters_quorum_index));
                    w.put_bytes(vote.signature.as_bytes());
                }
            }
            TxExtraField::Contributor(addr) => {
                w.put_bytes(addr.spend.as_bytes());
                w.put_bytes(addr.view.as_bytes());
            }
            TxExtraField::TxSecretKey(key) => w.put_bytes(key.as_bytes()),
            TxExtraField::BurnAmount(amount) => w.put_varint(*amount),
        }
    }

    fn read_body(tag: u8, body: &[u8]) -> TypeResult<TxExtraField> {
        let mut r = ByteReader::new(body);
        let field = match tag {
            extra_tag::PUB_KEY => TxExtraField::PubKey(PublicKey(r.get_array32("pub key")?)),
            extra_tag::NONCE => TxExtraField::Nonce(body.to_vec()),
            extra_tag::ADDITIONAL_PUB_KEYS => {
                let count = r.get_varint("additional key count")? as usize;
                let mut keys = Vec::with_capacity(count);
                for _ in 0..count {
                    keys.push(PublicKey(r.get_array32("additional key")?));
                }
                TxExtraField::AdditionalPubKeys(keys)
            }
            extra_tag::SERVICE_NODE_REGISTER => {
                let count = r.get_varint("register key count")? as usize;
                let mut spend = Vec::with_capacity(count);
                let mut view = Vec::with_capacity(count);
                for _ in 0..count {
                    spend.push(PublicKey(r.get_array32("register spend key")?));
                }
                for _ in 0..count {
                    view.push(PublicKey(r.get_array32("register view key")?));
                }
                let portions_for_operator = r.get_varint("operator portions")?;
                let portion_count = r.get_varint("portion count")? as usize;
                let mut portions = Vec::with_capacity(portion_count);
                for _ in 0..portion_count {
                    portions.push(r.get_varint("portion")?);
                }
                let expiration_timestamp = r.get_varint("expiration")?;
                let sig_bytes = r.get_bytes(64, "register signature")?;
                let mut sig = [0u8; 64];
                sig.copy_from_slice(sig_bytes);
                TxExtraField::Register(RegisterExtra {
                    public_spend_keys: spend,
                    public_view_keys: view,
                    portions_for_operator,
                    portions,
                    expiration_timestamp,
                    signature: Signature(sig),
                })
            }
            extra_tag::SERVICE_NODE_DEREGISTER => {
                let block_height = r.get_varint("deregister height")?;
                let service_node_index = r.get_varint("deregister index")? as u32;
                let vote_count = r.get_varint("vote count")? as usize;
                let mut votes = Vec::with_capacity(vote_count);
                for _ in 0..vote_count {
                    let voters_quorum_index = r.get_varint("voter index")? as u32;
                    let sig_bytes = r.get_bytes(64, "vote signature")?;
                    let mut sig = [0u8; 64];
                    sig.copy_from_slice(sig_bytes);
                    votes.push(DeregisterVote {
                        voters_quorum_index,
                        signature: Signature(sig),
                    });
                }
                TxExtraField::Deregister(DeregisterExtra {
                    block_height,
                    service_node_index,
                    votes,
                })
            }
            extra_tag::SERVICE_NODE_WINNER => {
                TxExtraField::Winner(PublicKey(r.get_array32("winner key")?))
            }
            extra_tag::SERVICE_NODE_CONTRIBUTOR => {
                let spend = PublicKey(r.get_array32("contributor spend")?);
                let view = PublicKey(r.get_array32("contributor view")?);
                TxExtraField::Contributor(AccountAddress::new(spend, view))
            }
            extra_tag::SERVICE_NODE_PUBKEY => {
                TxExtraField::ServiceNodePubkey(PublicKey(r.get_array32("service node key")?))
            }
            extra_tag::TX_SECRET_KEY => {
                TxExtraField::TxSecretKey(SecretKey(r.get_array32("tx secret key")?))
            }
            extra_tag::MEMO => TxExtraField::Memo(body.to_vec()),
            extra_tag::BURN_AMOUNT => TxExtraField::BurnAmount(r.get_varint("burn amount")?),
            other => return Err(TypeError::UnknownTag(other, "tx extra")),
        };
        Ok(field)
    }
}

/// Serialize a list of extra fields into the raw extra blob.
pub fn serialize_extra(fields: &[TxExtraField]) -> Vec<u8> {
    let mut out = ByteWriter::new();
    for field in fields {
        out.put_u8(field.tag());
        let mut body = ByteWriter::new();
        field.write_body(&mut body);
        out.put_blob(&body.into_bytes());
    }
    out.into_bytes()
}

/// Parse a raw extra blob into fields. Unknown tags abort the parse; a
/// malformed extra is treated as having no fields by callers that tolerate
/// it, exactly like the reference behaviour.
pub fn parse_extra(extra: &[u8]) -> TypeResult<Vec<TxExtraField>> {
    let mut fields = Vec::new();
    let mut r = ByteReader::new(extra);
    while !r.is_exhausted() {
        let tag = r.get_u8("extra tag")?;
        let body = r.get_blob("extra body")?;
        fields.push(TxExtraField::read_body(tag, body)?);
    }
    Ok(fields)
}

/// A transaction as seen by the consensus core.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    /// Format version.
    pub version: TxVersion,
    /// Transaction kind.
    pub tx_type: TxType,
    /// Whole-transaction unlock time (versions 1 and 2).
    pub unlock_time: u64,
    /// Per-output unlock times (version 3 onward).
    pub output_unlock_times: Vec<u64>,
    /// Inputs.
    pub inputs: Vec<TxInput>,
    /// Outputs.
    pub outputs: Vec<TxOutput>,
    /// Raw tagged extra blob.
    pub extra: Vec<u8>,
    /// Declared total fee (the confidential-signature fee field).
    pub fee: u64,
    /// True when the signature sections were pruned away.
    pub pruned: bool,
}

impl Default for TxVersion {
    fn default() -> Self {
        TxVersion::V0
    }
}

impl Transaction {
    /// Effective unlock time of output `i`.
    pub fn output_unlock_time(&self, i: usize) -> u64 {
        if self.version >= TxVersion::V3 {
            self.output_unlock_times.get(i).copied().unwrap_or(0)
        } else {
            self.unlock_time
        }
    }

    /// True for every kind except deregistration.
    pub fn is_transfer(&self) -> bool {
        self.tx_type != TxType::Deregister
    }

    /// True for deregistration transactions.
    pub fn is_deregister(&self) -> bool {
        self.tx_type == TxType::Deregister
    }

    /// The fee the miner actually collects. From the fee-burning hard fork
    /// on, the burned portion of the declared fee is excluded.
    pub fn miner_fee(&self, fee_burning_active: bool) -> u64 {
        if fee_burning_active {
            self.fee.saturating_sub(self.burned_amount())
        } else {
            self.fee
        }
    }

    /// Key images of all ring inputs, in input order.
    pub fn key_images(&self) -> Vec<KeyImage> {
        self.inputs
            .iter()
            .filter_map(|input| match input {
                TxInput::ToKey { key_image, .. } => Some(*key_image),
                TxInput::Coinbase(_) => None,
            })
            .collect()
    }

    fn extra_fields(&self) -> Vec<TxExtraField> {
        parse_extra(&self.extra).unwrap_or_default()
    }

    /// The transaction public key, if present in the extra.
    pub fn tx_pub_key(&self) -> Option<PublicKey> {
        self.extra_fields().into_iter().find_map(|f| match f {
            TxExtraField::PubKey(key) => Some(key),
            _ => None,
        })
    }

    /// The embedded registration, if any.
    pub fn registration(&self) -> Option<RegisterExtra> {
        self.extra_fields().into_iter().find_map(|f| match f {
            TxExtraField::Register(reg) => Some(reg),
            _ => None,
        })
    }

    /// The embedded deregistration, if any.
    pub fn deregistration(&self) -> Option<DeregisterExtra> {
        self.extra_fields().into_iter().find_map(|f| match f {
            TxExtraField::Deregister(dereg) => Some(dereg),
            _ => None,
        })
    }

    /// The service-node winner marker (coinbase transactions).
    pub fn service_node_winner(&self) -> PublicKey {
        self.extra_fields()
            .into_iter()
            .find_map(|f| match f {
                TxExtraField::Winner(key) => Some(key),
                _ => None,
            })
            .unwrap_or(PublicKey::NULL)
    }

    /// The service-node pubkey marker (registrations and contributions).
    pub fn service_node_pubkey(&self) -> Option<PublicKey> {
        self.extra_fields().into_iter().find_map(|f| match f {
            TxExtraField::ServiceNodePubkey(key) => Some(key),
            _ => None,
        })
    }

    /// The staking contributor address, if any.
    pub fn contributor(&self) -> Option<AccountAddress> {
        self.extra_fields().into_iter().find_map(|f| match f {
            TxExtraField::Contributor(addr) => Some(addr),
            _ => None,
        })
    }

    /// The revealed tx secret key (stake and swap transactions).
    pub fn tx_secret_key(&self) -> Option<SecretKey> {
        self.extra_fields().into_iter().find_map(|f| match f {
            TxExtraField::TxSecretKey(key) => Some(key),
            _ => None,
        })
    }

    /// The memo blob, if any.
    pub fn memo(&self) -> Option<Vec<u8>> {
        self.extra_fields().into_iter().find_map(|f| match f {
            TxExtraField::Memo(data) => Some(data),
            _ => None,
        })
    }

    /// The declared burned amount, zero when absent.
    pub fn burned_amount(&self) -> u64 {
        self.extra_fields()
            .into_iter()
            .find_map(|f| match f {
                TxExtraField::BurnAmount(amount) => Some(amount),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// Serialize to the canonical byte form used for hashing and pool
    /// storage.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.put_varint(self.version.as_u64());
        w.put_varint(self.tx_type.as_u64());
        w.put_varint(self.unlock_time);
        w.put_varint(self.output_unlock_times.len() as u64);
        for &t in &self.output_unlock_times {
            w.put_varint(t);
        }
        w.put_varint(self.inputs.len() as u64);
        for input in &self.inputs {
            match input {
                TxInput::Coinbase(gen) => {
                    w.put_u8(0xff);
                    w.put_varint(gen.height);
                }
                TxInput::ToKey {
                    amount,
                    key_offsets,
                    key_image,
                } => {
                    w.put_u8(0x02);
                    w.put_varint(*amount);
                    w.put_varint(key_offsets.len() as u64);
                    for &off in key_offsets {
                        w.put_varint(off);
                    }
                    w.put_bytes(key_image.as_bytes());
                }
            }
        }
        w.put_varint(self.outputs.len() as u64);
        for output in &self.outputs {
            w.put_varint(output.amount);
            match output.target {
                TxOutputTarget::ToKey(key) => {
                    w.put_u8(0x02);
                    w.put_bytes(key.as_bytes());
                }
                TxOutputTarget::ToScriptHash(hash) => {
                    w.put_u8(0x01);
                    w.put_bytes(hash.as_bytes());
                }
            }
        }
        w.put_blob(&self.extra);
        w.put_varint(self.fee);
        w.put_u8(u8::from(self.pruned));
        w.into_bytes()
    }

    /// Parse the canonical byte form.
    pub fn from_bytes(bytes: &[u8]) -> TypeResult<Transaction> {
        let mut r = ByteReader::new(bytes);
        let version = TxVersion::from_u64(r.get_varint("version")?)?;
        let tx_type = TxType::from_u64(r.get_varint("type")?)?;
        let unlock_time = r.get_varint("unlock time")?;
        let unlock_count = r.get_varint("unlock count")? as usize;
        let mut output_unlock_times = Vec::with_capacity(unlock_count);
        for _ in 0..unlock_count {
            output_unlock_times.push(r.get_varint("output unlock")?);
        }
        let input_count = r.get_varint("input count")? as usize;
        let mut inputs = Vec::with_capacity(input_count);
        for _ in 0..input_count {
            let tag = r.get_u8("input tag")?;
            match tag {
                0xff => inputs.push(TxInput::Coinbase(CoinbaseInput {
                    height: r.get_varint("coinbase height")?,
                })),
                0x02 => {
                    let amount = r.get_varint("input amount")?;
                    let offset_count = r.get_varint("offset count")? as usize;
                    let mut key_offsets = Vec::with_capacity(offset_count);
                    for _ in 0..offset_count {
                        key_offsets.push(r.get_varint("key offset")?);
                    }
                    let key_image = KeyImage(r.get_array32("key image")?);
                    inputs.push(TxInput::ToKey {
                        amount,
                        key_offsets,
                        key_image,
                    });
                }
                other => return Err(TypeError::UnknownTag(other, "tx input")),
            }
        }
        let output_count = r.get_varint("output count")? as usize;
        let mut outputs = Vec::with_capacity(output_count);
        for _ in 0..output_count {
            let amount = r.get_varint("output amount")?;
            let tag = r.get_u8("output tag")?;
            let target = match tag {
                0x02 => TxOutputTarget::ToKey(PublicKey(r.get_array32("output key")?)),
                0x01 => TxOutputTarget::ToScriptHash(Hash(r.get_array32("output script hash")?)),
                other => return Err(TypeError::UnknownTag(other, "tx output")),
            };
            outputs.push(TxOutput { amount, target });
        }
        let extra = r.get_blob("extra")?.to_vec();
        let fee = r.get_varint("fee")?;
        let pruned = r.get_u8("pruned flag")? != 0;
        Ok(Transaction {
            version,
            tx_type,
            unlock_time,
            output_unlock_times,
            inputs,
            outputs,
            extra,
            fee,
            pruned,
        })
    }

    /// Transaction id: Blake2b-256 over the canonical bytes.
    pub fn hash(&self) -> Hash {
        let mut hasher = Blake2b::<U32>::new();
        hasher.update(self.to_bytes());
        Hash(hasher.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction {
            version: TxVersion::V3,
            tx_type: TxType::Standard,
            unlock_time: 0,
            output_unlock_times: vec![100, 200],
            inputs: vec![TxInput::ToKey {
                amount: 0,
                key_offsets: vec![5, 1, 9],
                key_image: KeyImage::from_bytes([7; 32]),
            }],
            outputs: vec![
                TxOutput {
                    amount: 1_000,
                    target: TxOutputTarget::ToKey(PublicKey::from_bytes([1; 32])),
                },
                TxOutput {
                    amount: 2_000,
                    target: TxOutputTarget::ToKey(PublicKey::from_bytes([2; 32])),
                },
            ],
            extra: serialize_extra(&[
                TxExtraField::PubKey(PublicKey::from_bytes([3; 32])),
                TxExtraField::BurnAmount(42),
            ]),
            fee: 90,
            pruned: false,
        }
    }

    #[test]
    fn tx_bytes_round_trip() {
        let tx = sample_tx();
        let parsed = Transaction::from_bytes(&tx.to_bytes()).unwrap();
        assert_eq!(tx, parsed);
        assert_eq!(tx.hash(), parsed.hash());
    }

    #[test]
    fn extra_fields_round_trip() {
        let reg = RegisterExtra {
            public_spend_keys: vec![PublicKey::from_bytes([1; 32])],
            public_view_keys: vec![PublicKey::from_bytes([2; 32])],
            portions_for_operator: 77,
            portions: vec![123456789],
            expiration_timestamp: 1_700_000_000,
            signature: Signature::from_bytes([9; 64]),
        };
        let dereg = DeregisterExtra {
            block_height: 5000,
            service_node_index: 3,
            votes: vec![DeregisterVote {
                voters_quorum_index: 1,
                signature: Signature::from_bytes([8; 64]),
            }],
        };
        let fields = vec![
            TxExtraField::Register(reg.clone()),
            TxExtraField::Deregister(dereg.clone()),
            TxExtraField::Winner(PublicKey::from_bytes([4; 32])),
            TxExtraField::Contributor(AccountAddress::new(
                PublicKey::from_bytes([5; 32]),
                PublicKey::from_bytes([6; 32]),
            )),
            TxExtraField::Memo(b"{\"network\":\"eth\"}".to_vec()),
        ];
        let blob = serialize_extra(&fields);
        let parsed = parse_extra(&blob).unwrap();
        assert_eq!(fields, parsed);

        let tx = Transaction {
            extra: blob,
            ..Default::default()
        };
        assert_eq!(tx.registration(), Some(reg));
        assert_eq!(tx.deregistration(), Some(dereg));
        assert_eq!(tx.service_node_winner(), PublicKey::from_bytes([4; 32]));
    }

    #[test]
    fn unknown_extra_tag_fails() {
        assert!(parse_extra(&[0x5a, 0x01, 0x00]).is_err());
    }

    #[test]
    fn winner_defaults_to_null() {
        let tx = Transaction::default();
        assert_eq!(tx.service_node_winner(), PublicKey::NULL);
    }

    #[test]
    fn miner_fee_subtracts_burn_when_active() {
        let tx = sample_tx();
        assert_eq!(tx.miner_fee(false), 90);
        assert_eq!(tx.miner_fee(true), 90 - 42);
    }

    #[test]
    fn per_output_unlock_times_apply_from_v3() {
        let tx = sample_tx();
        assert_eq!(tx.output_unlock_time(1), 200);
        let mut legacy = sample_tx();
        legacy.version = TxVersion::V2;
        legacy.unlock_time = 777;
        assert_eq!(legacy.output_unlock_time(1), 777);
    }
}
