// src/claims/set_root_key.rs
//! Set-Root-Key claims: "DID X's tree has root R at version V".
//!
//! Layout: `D0 = 0`, `D1 = root`, `D2 = did digest`, `D3 = header`.

use crate::claims::did_digest::DidDigest;
use crate::claims::CLAIM_TYPE_SET_ROOT_KEY;
use crate::error::{Error, Result};
use crate::merkletree::entry::write_header;
use crate::merkletree::{Entry, Hash};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetRootKey {
    pub did: DidDigest,
    pub root: Hash,
    pub version: u32,
    pub era: u32,
}

impl SetRootKey {
    pub fn new(did: DidDigest, root: Hash, version: u32) -> Self {
        Self {
            did,
            root,
            version,
            era: 0,
        }
    }

    pub fn entry(&self) -> Result<Entry> {
        let mut data = [[0u8; 32]; 4];
        data[1] = *self.root.as_bytes();
        data[2] = *self.did.as_bytes();
        write_header(&mut data[3], CLAIM_TYPE_SET_ROOT_KEY, self.version, self.era);
        Entry::new(data)
    }

    pub fn from_entry(entry: &Entry) -> Result<Self> {
        if entry.claim_type() != CLAIM_TYPE_SET_ROOT_KEY {
            return Err(Error::InvalidInput(format!(
                "claim type {} is not set-root-key",
                entry.claim_type()
            )));
        }
        Ok(Self {
            did: DidDigest::from_bytes(*entry.element(2))?,
            root: Hash(*entry.element(1)),
            version: entry.version(),
            era: entry.era(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkletree::hash::hash_elems;
    use crate::merkletree::HASH_ZERO;
    use crate::models::did::Did;

    fn digest(id: &str) -> DidDigest {
        DidDigest::of(&Did::new("ethuri", id).unwrap()).unwrap()
    }

    #[test]
    fn test_decode_inverts_encode() {
        let claim = SetRootKey {
            did: digest("a"),
            root: hash_elems(&[HASH_ZERO]),
            version: 7,
            era: 2,
        };
        let entry = claim.entry().unwrap();
        assert_eq!(entry.claim_type(), CLAIM_TYPE_SET_ROOT_KEY);
        assert_eq!(SetRootKey::from_entry(&entry).unwrap(), claim);
    }

    #[test]
    fn test_versions_share_hindex_dids_do_not() {
        let root_a = hash_elems(&[HASH_ZERO]);
        let root_b = hash_elems(&[root_a]);
        let v0 = SetRootKey::new(digest("a"), root_a, 0).entry().unwrap();
        let v1 = SetRootKey::new(digest("a"), root_b, 1).entry().unwrap();
        assert_eq!(v0.hindex(), v1.hindex());
        assert_ne!(v0.hvalue(), v1.hvalue());
        let other = SetRootKey::new(digest("b"), root_a, 0).entry().unwrap();
        assert_ne!(v0.hindex(), other.hindex());
    }

    #[test]
    fn test_out_of_field_root_rejected() {
        let claim = SetRootKey::new(digest("a"), Hash([0xff; 32]), 0);
        assert!(matches!(claim.entry(), Err(Error::OutOfField)));
    }
}
