// src/claims/registered_document.rs
//! Registered-Document claims bind a credential multihash into its issuer's
//! DID tree. Version 0 registers the document, version 1 revokes it.
//!
//! Layout:
//! - `D0`: document type (u32, big-endian) ‖ multihash[0..3] ‖ zero padding
//! - `D1`: issuer DID digest
//! - `D2`: zero byte ‖ multihash[3..34]
//! - `D3`: header

use crate::claims::did_digest::DidDigest;
use crate::claims::{DocumentType, CLAIM_TYPE_REGISTERED_DOCUMENT};
use crate::error::{Error, Result};
use crate::merkletree::entry::write_header;
use crate::merkletree::Entry;
use crate::utils::multihash::MULTIHASH_LEN;

/// Version of a live registration.
pub const VERSION_REGISTERED: u32 = 0;
/// Version of the revocation twin.
pub const VERSION_REVOKED: u32 = 1;

const HEAD: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredDocument {
    pub multihash: [u8; MULTIHASH_LEN],
    pub did: DidDigest,
    pub doc_type: DocumentType,
    pub version: u32,
}

impl RegisteredDocument {
    pub fn new(multihash: [u8; MULTIHASH_LEN], did: DidDigest, doc_type: DocumentType) -> Self {
        Self {
            multihash,
            did,
            doc_type,
            version: VERSION_REGISTERED,
        }
    }

    /// The same claim at the revocation version.
    pub fn revoked(&self) -> Self {
        Self {
            version: VERSION_REVOKED,
            ..*self
        }
    }

    pub fn is_revocation(&self) -> bool {
        self.version == VERSION_REVOKED
    }

    pub fn entry(&self) -> Result<Entry> {
        let mut data = [[0u8; 32]; 4];
        data[0][..4].copy_from_slice(&(self.doc_type as u32).to_be_bytes());
        data[0][4..4 + HEAD].copy_from_slice(&self.multihash[..HEAD]);
        data[1] = *self.did.as_bytes();
        data[2][1..].copy_from_slice(&self.multihash[HEAD..]);
        write_header(&mut data[3], CLAIM_TYPE_REGISTERED_DOCUMENT, self.version, 0);
        Entry::new(data)
    }

    pub fn from_entry(entry: &Entry) -> Result<Self> {
        if entry.claim_type() != CLAIM_TYPE_REGISTERED_DOCUMENT {
            return Err(Error::InvalidInput(format!(
                "claim type {} is not registered-document",
                entry.claim_type()
            )));
        }
        let d0 = entry.element(0);
        let mut type_bytes = [0u8; 4];
        type_bytes.copy_from_slice(&d0[..4]);
        let doc_type = DocumentType::try_from(u32::from_be_bytes(type_bytes))?;

        let mut multihash = [0u8; MULTIHASH_LEN];
        multihash[..HEAD].copy_from_slice(&d0[4..4 + HEAD]);
        multihash[HEAD..].copy_from_slice(&entry.element(2)[1..]);
        Ok(Self {
            multihash,
            did: DidDigest::from_bytes(*entry.element(1))?,
            doc_type,
            version: entry.version(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::did::Did;
    use crate::utils::multihash::keccak_multihash;

    fn claim(content: &[u8], did: &str) -> RegisteredDocument {
        let did = DidDigest::of(&Did::new("ethuri", did).unwrap()).unwrap();
        RegisteredDocument::new(keccak_multihash(content), did, DocumentType::License)
    }

    #[test]
    fn test_decode_inverts_encode() {
        let registered = claim(b"article", "a");
        for c in [registered, registered.revoked()] {
            assert_eq!(RegisteredDocument::from_entry(&c.entry().unwrap()).unwrap(), c);
        }
    }

    #[test]
    fn test_revocation_twin_shares_hindex() {
        let registered = claim(b"article", "a");
        let v0 = registered.entry().unwrap();
        let v1 = registered.revoked().entry().unwrap();
        assert!(registered.revoked().is_revocation());
        assert_eq!(v0.hindex(), v1.hindex());
        assert_ne!(v0.hvalue(), v1.hvalue());
        assert_ne!(v0.hindex(), claim(b"article", "b").entry().unwrap().hindex());
        assert_ne!(v0.hindex(), claim(b"other", "a").entry().unwrap().hindex());
    }

    #[test]
    fn test_unknown_document_type_rejected() {
        let mut bytes = claim(b"article", "a").entry().unwrap().to_bytes();
        bytes[3] = 9;
        let entry = Entry::from_bytes(&bytes).unwrap();
        assert!(RegisteredDocument::from_entry(&entry).is_err());
    }
}
