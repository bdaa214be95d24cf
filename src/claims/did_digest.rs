// src/claims/did_digest.rs
//! DID digests: the per-DID tree prefix and the DID slot inside claim entries.

use crate::error::{Error, Result};
use crate::merkletree::Hash;
use crate::models::did::Did;
use crate::utils::crypto::{fr_to_field_bytes, poseidon_bytes};
use crate::utils::serialization::encode_hex;
use std::fmt;

/// Longest DID method that still fits the 32-byte packed form (one length
/// byte, the method, then 16 bytes of method-specific id).
pub const MAX_METHOD_LEN: usize = 15;

/// Poseidon digest of a canonical DID, reduced to 31 bytes behind a zero byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DidDigest([u8; 32]);

impl DidDigest {
    pub fn of(did: &Did) -> Result<Self> {
        if did.method().len() > MAX_METHOD_LEN {
            return Err(Error::DidMethodTooLong(did.method().to_string()));
        }
        let canonical = did.to_string();
        Ok(DidDigest(fr_to_field_bytes(&poseidon_bytes(canonical.as_bytes()))))
    }

    /// Wraps raw element bytes read back from an entry.
    pub fn from_bytes(bytes: [u8; 32]) -> Result<Self> {
        if bytes[0] != 0 {
            return Err(Error::OutOfField);
        }
        Ok(DidDigest(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn as_hash(&self) -> Hash {
        Hash(self.0)
    }

    pub fn hex(&self) -> String {
        encode_hex(self.0)
    }
}

impl fmt::Display for DidDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl fmt::Debug for DidDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DidDigest({})", self.hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_canonical_and_in_field() {
        let plain: Did = "did:ethuri:86ce6c71-27e6-4e0d-83dd-b60fe4d7785c".parse().unwrap();
        let with_fragment: Did = "did:ethuri:86ce6c71-27e6-4e0d-83dd-b60fe4d7785c#key-1"
            .parse()
            .unwrap();
        let a = DidDigest::of(&plain).unwrap();
        assert_eq!(a, DidDigest::of(&with_fragment).unwrap());
        assert_eq!(a.as_bytes()[0], 0);
        let other: Did = "did:ethuri:86ce6c71-27e6-4e0d-83dd-b60fe4d7785d".parse().unwrap();
        assert_ne!(a, DidDigest::of(&other).unwrap());
    }

    #[test]
    fn test_long_method_rejected() {
        let did = Did::new("averyveryverylongmethod", "abc").unwrap();
        assert!(matches!(DidDigest::of(&did), Err(Error::DidMethodTooLong(_))));
        let did = Did::new("fifteencharsabc", "abc").unwrap();
        assert!(DidDigest::of(&did).is_ok());
    }
}
