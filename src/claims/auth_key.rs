// src/claims/auth_key.rs
//! Authorize-KSign claims publish a secp256k1 signing key into a DID tree.
//!
//! The compressed key is 33 bytes, one more than an element can carry, so it
//! is split: `D1` holds its first two bytes right-aligned and `D2` the other
//! 31. `D0` is zero.

use crate::error::{Error, Result};
use crate::merkletree::entry::{write_header, CLAIM_TYPE_AUTHORIZE_KSIGN_SECP256K1};
use crate::merkletree::Entry;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::PublicKey;

const COMPRESSED_LEN: usize = 33;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthKey {
    pub public_key: PublicKey,
    pub version: u32,
    pub era: u32,
}

impl AuthKey {
    pub fn new(public_key: PublicKey) -> Self {
        Self {
            public_key,
            version: 0,
            era: 0,
        }
    }

    /// Parses SEC1 key material (compressed or uncompressed).
    pub fn from_sec1(bytes: &[u8]) -> Result<Self> {
        let key = PublicKey::from_sec1_bytes(bytes)
            .map_err(|e| Error::InvalidInput(format!("secp256k1 key: {e}")))?;
        Ok(Self::new(key))
    }

    pub fn compressed(&self) -> [u8; COMPRESSED_LEN] {
        let point = self.public_key.to_encoded_point(true);
        let mut out = [0u8; COMPRESSED_LEN];
        out.copy_from_slice(point.as_bytes());
        out
    }

    pub fn entry(&self) -> Result<Entry> {
        let pk = self.compressed();
        let mut data = [[0u8; 32]; 4];
        data[1][30] = pk[0];
        data[1][31] = pk[1];
        data[2][1..].copy_from_slice(&pk[2..]);
        write_header(
            &mut data[3],
            CLAIM_TYPE_AUTHORIZE_KSIGN_SECP256K1,
            self.version,
            self.era,
        );
        Entry::new(data)
    }

    pub fn from_entry(entry: &Entry) -> Result<Self> {
        if entry.claim_type() != CLAIM_TYPE_AUTHORIZE_KSIGN_SECP256K1 {
            return Err(Error::InvalidInput(format!(
                "claim type {} is not authorize-ksign",
                entry.claim_type()
            )));
        }
        let mut pk = [0u8; COMPRESSED_LEN];
        pk[0] = entry.element(1)[30];
        pk[1] = entry.element(1)[31];
        pk[2..].copy_from_slice(&entry.element(2)[1..]);
        let mut claim = Self::from_sec1(&pk)?;
        claim.version = entry.version();
        claim.era = entry.era();
        Ok(claim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::SecretKey;

    fn key() -> PublicKey {
        SecretKey::random(&mut rand::thread_rng()).public_key()
    }

    #[test]
    fn test_decode_inverts_encode() {
        let claim = AuthKey::new(key());
        let entry = claim.entry().unwrap();
        assert_eq!(AuthKey::from_entry(&entry).unwrap(), claim);
    }

    #[test]
    fn test_uncompressed_material_accepted() {
        let pk = key();
        let uncompressed = pk.to_encoded_point(false);
        let claim = AuthKey::from_sec1(uncompressed.as_bytes()).unwrap();
        assert_eq!(claim.public_key, pk);
        assert_eq!(claim.entry().unwrap(), AuthKey::new(pk).entry().unwrap());
    }

    #[test]
    fn test_distinct_keys_distinct_hindex() {
        let a = AuthKey::new(key()).entry().unwrap();
        let b = AuthKey::new(key()).entry().unwrap();
        assert_ne!(a.hindex(), b.hindex());
    }
}
