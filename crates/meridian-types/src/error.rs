//! Error types for chain type parsing and crypto helpers.

use thiserror::Error;

/// Errors raised while decoding or deriving chain types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TypeError {
    /// Byte buffer ended before the declared field.
    #[error("unexpected end of input while reading {0}")]
    UnexpectedEof(&'static str),

    /// Varint did not terminate within 10 bytes.
    #[error("varint overflow while reading {0}")]
    VarintOverflow(&'static str),

    /// A 32-byte field failed to parse.
    #[error("invalid key material: {0}")]
    InvalidKey(&'static str),

    /// Hex string was malformed.
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    /// Unknown tag byte in a tagged encoding.
    #[error("unknown tag 0x{0:02x} in {1}")]
    UnknownTag(u8, &'static str),

    /// A point failed to decompress onto the curve.
    #[error("point decompression failed for {0}")]
    InvalidPoint(&'static str),

    /// Signature verification failed.
    #[error("signature verification failed")]
    BadSignature,
}

/// Result alias for type-level operations.
pub type TypeResult<T> = Result<T, TypeError>;
