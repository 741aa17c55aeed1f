//! Curve helpers for deterministic output keys and registration signatures.
//!
//! These wrap the dalek primitives with the exact derivation scheme the
//! consensus rules fix: every network participant must reproduce the
//! deterministic block keypair and the reward output keys bit for bit.

use crate::{AccountAddress, ByteWriter, Hash, PublicKey, SecretKey, Signature, TypeError, TypeResult};
use blake2::digest::consts::{U32, U64};
use blake2::{Blake2b, Digest};
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::RngCore;

/// A shared-secret key derivation (compressed point).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDerivation(pub [u8; 32]);

/// A public/secret keypair.
#[derive(Debug, Clone, Copy)]
pub struct Keypair {
    /// Compressed public point.
    pub public: PublicKey,
    /// Secret scalar.
    pub secret: SecretKey,
}

fn decompress(key: &PublicKey, what: &'static str) -> TypeResult<EdwardsPoint> {
    CompressedEdwardsY(key.0)
        .decompress()
        .ok_or(TypeError::InvalidPoint(what))
}

/// Reduce a Blake2b-512 digest of `data` into a scalar.
pub fn hash_to_scalar(data: &[u8]) -> Scalar {
    let mut hasher = Blake2b::<U64>::new();
    hasher.update(data);
    let wide: [u8; 64] = hasher.finalize().into();
    Scalar::from_bytes_mod_order_wide(&wide)
}

/// Generate a random keypair for ephemeral transaction keys.
pub fn generate_keypair<R: RngCore>(rng: &mut R) -> Keypair {
    let mut wide = [0u8; 64];
    rng.fill_bytes(&mut wide);
    let secret = Scalar::from_bytes_mod_order_wide(&wide);
    Keypair {
        public: PublicKey(EdwardsPoint::mul_base(&secret).compress().0),
        secret: SecretKey(secret.to_bytes()),
    }
}

/// The deterministic block keypair for a height.
///
/// The secret scalar is the height as a little-endian u64 in bytes 0..8
/// with bytes 8..32 zero; the public key is the scalar-basepoint product.
/// Every network party must reproduce this exactly.
pub fn deterministic_block_keypair(height: u64) -> Keypair {
    let mut raw = [0u8; 32];
    raw[..8].copy_from_slice(&height.to_le_bytes());
    let secret = Scalar::from_bytes_mod_order(raw);
    Keypair {
        public: PublicKey(EdwardsPoint::mul_base(&secret).compress().0),
        secret: SecretKey(raw),
    }
}

/// Compute the shared-secret derivation `8 · sec · pub`.
pub fn generate_key_derivation(public: &PublicKey, secret: &SecretKey) -> TypeResult<KeyDerivation> {
    let point = decompress(public, "derivation base")?;
    let scalar = Scalar::from_bytes_mod_order(secret.0);
    let shared = (scalar * point).mul_by_cofactor();
    Ok(KeyDerivation(shared.compress().0))
}

fn derivation_to_scalar(derivation: &KeyDerivation, output_index: u64) -> Scalar {
    let mut buf = ByteWriter::new();
    buf.put_bytes(&derivation.0);
    buf.put_varint(output_index);
    hash_to_scalar(&buf.into_bytes())
}

/// Derive the one-time output key for `spend` at `output_index`.
pub fn derive_public_key(
    derivation: &KeyDerivation,
    output_index: u64,
    spend: &PublicKey,
) -> TypeResult<PublicKey> {
    let base = decompress(spend, "spend key")?;
    let scalar = derivation_to_scalar(derivation, output_index);
    Ok(PublicKey(
        (EdwardsPoint::mul_base(&scalar) + base).compress().0,
    ))
}

/// Derive the deterministic output key for an address: the derivation is
/// taken against the address's view key with the given (usually
/// deterministic block) secret key.
pub fn deterministic_output_key(
    address: &AccountAddress,
    tx_key: &Keypair,
    output_index: u64,
) -> TypeResult<PublicKey> {
    let derivation = generate_key_derivation(&address.view, &tx_key.secret)?;
    derive_public_key(&derivation, output_index, &address.spend)
}

/// The registration hash covering addresses, portions and expiration.
pub fn registration_hash(
    addresses: &[AccountAddress],
    portions_for_operator: u64,
    portions: &[u64],
    expiration_timestamp: u64,
) -> Hash {
    let mut buf = ByteWriter::new();
    for addr in addresses {
        buf.put_bytes(addr.spend.as_bytes());
        buf.put_bytes(addr.view.as_bytes());
    }
    buf.put_bytes(&portions_for_operator.to_le_bytes());
    for &portion in portions {
        buf.put_bytes(&portion.to_le_bytes());
    }
    buf.put_bytes(&expiration_timestamp.to_le_bytes());
    let mut hasher = Blake2b::<U32>::new();
    hasher.update(buf.into_bytes());
    Hash(hasher.finalize().into())
}

/// Verify a detached signature over a 32-byte hash under an Ed25519 key.
pub fn check_signature(hash: &Hash, public: &PublicKey, signature: &Signature) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(&public.0) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
    key.verify(hash.as_bytes(), &sig).is_ok()
}

/// Sign a 32-byte hash with an Ed25519 signing key.
pub fn sign_hash(hash: &Hash, key: &SigningKey) -> Signature {
    Signature(key.sign(hash.as_bytes()).to_bytes())
}

/// Generate an Ed25519 service-node keypair.
pub fn generate_service_node_keys<R: rand::CryptoRng + RngCore>(
    rng: &mut R,
) -> (PublicKey, SigningKey) {
    let signing = SigningKey::generate(rng);
    (PublicKey(signing.verifying_key().to_bytes()), signing)
}

/// A fixed wallet address derived from a human-readable tag. The spend and
/// view components are `hash_to_scalar(tag | label) · G`, which guarantees
/// valid curve points for the output-key derivations.
pub fn wallet_address_from_tag(tag: &str) -> AccountAddress {
    let spend = hash_to_scalar(format!("{tag}|spend").as_bytes());
    let view = hash_to_scalar(format!("{tag}|view").as_bytes());
    AccountAddress::new(
        PublicKey(EdwardsPoint::mul_base(&spend).compress().0),
        PublicKey(EdwardsPoint::mul_base(&view).compress().0),
    )
}
