//! # meridian-types
//!
//! Core chain types shared by every Meridian crate.
//!
//! This crate provides:
//! - 32-byte key, key-image and hash newtypes
//! - Account addresses (spend/view key pairs)
//! - Consensus-relevant block and transaction structures
//! - The tagged tx-extra field codec
//! - The varint codec used by persisted consensus state
//! - Curve helpers: key derivations, the deterministic block keypair and
//!   registration-hash signing/verification

mod address;
mod binary;
mod block;
pub mod crypto;
mod error;
mod keys;
mod transaction;

pub use address::AccountAddress;
pub use binary::{ByteReader, ByteWriter};
pub use block::Block;
pub use error::{TypeError, TypeResult};
pub use keys::{Hash, KeyImage, PublicKey, SecretKey, Signature};
pub use transaction::{
    parse_extra, serialize_extra, CoinbaseInput, DeregisterExtra, DeregisterVote, RegisterExtra,
    Transaction, TxExtraField, TxInput, TxOutput, TxOutputTarget, TxType, TxVersion,
};
