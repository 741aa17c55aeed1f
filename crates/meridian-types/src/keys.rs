//! 32-byte identifier newtypes.
//!
//! Public keys, secret keys, key images, hashes and signatures are all
//! fixed-size byte arrays at the consensus layer. The newtypes keep them
//! from being mixed up and give them hex formatting.

use crate::{TypeError, TypeResult};
use std::fmt;

macro_rules! byte_newtype {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// The all-zero value, used as the null sentinel.
            pub const NULL: $name = $name([0u8; $len]);

            /// Construct from a byte array.
            pub const fn from_bytes(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Borrow the raw bytes.
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// True when every byte is zero.
            pub fn is_null(&self) -> bool {
                self.0.iter().all(|&b| b == 0)
            }

            /// Parse from a hex string.
            pub fn from_hex(s: &str) -> TypeResult<Self> {
                let raw = hex::decode(s).map_err(|_| TypeError::InvalidHex(s.to_string()))?;
                let arr: [u8; $len] = raw
                    .try_into()
                    .map_err(|_| TypeError::InvalidHex(s.to_string()))?;
                Ok(Self(arr))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::NULL
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), hex::encode(self.0))
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }
    };
}

byte_newtype!(
    /// An Ed25519 public key (compressed point).
    PublicKey,
    32
);
byte_newtype!(
    /// A curve scalar kept secret.
    SecretKey,
    32
);
byte_newtype!(
    /// A spent-output key image.
    KeyImage,
    32
);
byte_newtype!(
    /// A 256-bit content hash (block id, tx id, registration hash).
    Hash,
    32
);
byte_newtype!(
    /// A detached signature over a 32-byte hash.
    Signature,
    64
);

impl Hash {
    /// Interpret the first eight bytes as a little-endian u64. Used to seed
    /// the consensus shuffle from a block hash.
    pub fn low_u64_le(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let key = PublicKey::from_bytes([0xab; 32]);
        let parsed = PublicKey::from_hex(&key.to_string()).unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn null_is_null() {
        assert!(Hash::NULL.is_null());
        assert!(!Hash::from_bytes([1; 32]).is_null());
    }

    #[test]
    fn rejects_short_hex() {
        assert!(Hash::from_hex("abcd").is_err());
        assert!(Hash::from_hex("zz").is_err());
    }

    #[test]
    fn low_u64_is_little_endian() {
        let mut raw = [0u8; 32];
        raw[0] = 0x01;
        raw[7] = 0x80;
        assert_eq!(Hash::from_bytes(raw).low_u64_le(), 0x8000_0000_0000_0001);
    }
}
