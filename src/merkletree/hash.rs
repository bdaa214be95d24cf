// src/merkletree/hash.rs
//! 32-byte tree hashes.

use crate::error::{Error, Result};
use crate::utils::crypto::{field_bytes_to_fr, fr_to_field_bytes, poseidon_hash};
use crate::utils::serialization::{decode_hex_array, encode_hex};
use ark_bn254::Fr;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Hash of an empty subtree.
pub const HASH_ZERO: Hash = Hash([0u8; 32]);

/// A Poseidon output reduced to 31 big-endian bytes behind a zero top byte,
/// so it can be stored in any entry element.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn from_fr(value: &Fr) -> Self {
        Hash(fr_to_field_bytes(value))
    }

    pub fn to_fr(&self) -> Fr {
        field_bytes_to_fr(&self.0)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::InvalidInput(format!("hash of {} bytes", bytes.len())))?;
        Ok(Hash(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        *self == HASH_ZERO
    }

    /// Bit `i` of the path, least significant bit of the last byte first.
    pub fn bit(&self, i: usize) -> bool {
        (self.0[31 - i / 8] >> (i % 8)) & 1 == 1
    }

    pub fn hex(&self) -> String {
        encode_hex(self.0)
    }
}

/// Poseidon over a list of hashes.
pub fn hash_elems(elems: &[Hash]) -> Hash {
    let frs: Vec<Fr> = elems.iter().map(Hash::to_fr).collect();
    Hash::from_fr(&poseidon_hash(&frs))
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.hex())
    }
}

impl FromStr for Hash {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Hash(decode_hex_array(s)?))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_order() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0b0000_0101;
        bytes[30] = 0b0000_0001;
        let h = Hash(bytes);
        assert!(h.bit(0));
        assert!(!h.bit(1));
        assert!(h.bit(2));
        assert!(h.bit(8));
        assert!(!h.bit(9));
    }

    #[test]
    fn test_hex_roundtrip() {
        let h = hash_elems(&[HASH_ZERO, Hash([1u8; 32])]);
        assert_eq!(h.hex().parse::<Hash>().unwrap(), h);
        assert_eq!(h.0[0], 0);
    }
}
