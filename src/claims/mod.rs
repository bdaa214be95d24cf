// src/claims/mod.rs
//! Claim encodings stored in the Merkle trees.
//!
//! The root tree only holds [`SetRootKey`] claims. A DID tree holds the
//! [`AuthKey`] claims of the DID's signing keys and one [`RegisteredDocument`]
//! claim per credential (plus its revocation twin).

pub mod auth_key;
pub mod did_digest;
pub mod registered_document;
pub mod set_root_key;

pub use auth_key::AuthKey;
pub use did_digest::DidDigest;
pub use registered_document::RegisteredDocument;
pub use set_root_key::SetRootKey;

use crate::error::{Error, Result};
use crate::merkletree::entry::CLAIM_TYPE_AUTHORIZE_KSIGN_SECP256K1;
use crate::merkletree::Entry;
use serde::{Deserialize, Serialize};

pub const CLAIM_TYPE_SET_ROOT_KEY: u32 = 10;
pub const CLAIM_TYPE_REGISTERED_DOCUMENT: u32 = 11;

/// What a Registered-Document claim points at.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
#[repr(u32)]
pub enum DocumentType {
    Content = 0,
    License = 1,
    Jwt = 2,
    RawData = 3,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::Content => "content",
            DocumentType::License => "license",
            DocumentType::Jwt => "jwt",
            DocumentType::RawData => "raw_data",
        }
    }
}

impl TryFrom<u32> for DocumentType {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(DocumentType::Content),
            1 => Ok(DocumentType::License),
            2 => Ok(DocumentType::Jwt),
            3 => Ok(DocumentType::RawData),
            other => Err(Error::InvalidInput(format!("document type {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimKind {
    SetRootKey,
    RegisteredDocument,
    AuthKey,
    Other,
}

/// A decoded tree entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    SetRootKey(SetRootKey),
    RegisteredDocument(RegisteredDocument),
    AuthKey(AuthKey),
    /// Any other claim type, kept byte for byte.
    Other { claim_type: u32, entry: Entry },
}

impl Claim {
    pub fn kind_of(entry: &Entry) -> ClaimKind {
        match entry.claim_type() {
            CLAIM_TYPE_SET_ROOT_KEY => ClaimKind::SetRootKey,
            CLAIM_TYPE_REGISTERED_DOCUMENT => ClaimKind::RegisteredDocument,
            CLAIM_TYPE_AUTHORIZE_KSIGN_SECP256K1 => ClaimKind::AuthKey,
            _ => ClaimKind::Other,
        }
    }

    pub fn classify(entry: &Entry) -> Result<Claim> {
        Ok(match Self::kind_of(entry) {
            ClaimKind::SetRootKey => Claim::SetRootKey(SetRootKey::from_entry(entry)?),
            ClaimKind::RegisteredDocument => {
                Claim::RegisteredDocument(RegisteredDocument::from_entry(entry)?)
            }
            ClaimKind::AuthKey => Claim::AuthKey(AuthKey::from_entry(entry)?),
            ClaimKind::Other => Claim::Other {
                claim_type: entry.claim_type(),
                entry: *entry,
            },
        })
    }

    pub fn kind(&self) -> ClaimKind {
        match self {
            Claim::SetRootKey(_) => ClaimKind::SetRootKey,
            Claim::RegisteredDocument(_) => ClaimKind::RegisteredDocument,
            Claim::AuthKey(_) => ClaimKind::AuthKey,
            Claim::Other { .. } => ClaimKind::Other,
        }
    }

    pub fn entry(&self) -> Result<Entry> {
        match self {
            Claim::SetRootKey(c) => c.entry(),
            Claim::RegisteredDocument(c) => c.entry(),
            Claim::AuthKey(c) => c.entry(),
            Claim::Other { entry, .. } => Ok(*entry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merkletree::entry::write_header;
    use crate::merkletree::HASH_ZERO;
    use crate::models::did::Did;
    use crate::utils::multihash::keccak_multihash;

    fn digest() -> DidDigest {
        DidDigest::of(&Did::new("ethuri", "abc").unwrap()).unwrap()
    }

    #[test]
    fn test_classify_dispatches_by_type() {
        let srk = SetRootKey::new(digest(), HASH_ZERO, 3).entry().unwrap();
        let rd = RegisteredDocument::new(keccak_multihash(b"x"), digest(), DocumentType::Jwt)
            .entry()
            .unwrap();
        assert_eq!(Claim::classify(&srk).unwrap().kind(), ClaimKind::SetRootKey);
        assert_eq!(
            Claim::classify(&rd).unwrap().kind(),
            ClaimKind::RegisteredDocument
        );
    }

    #[test]
    fn test_unknown_type_roundtrips_bytes() {
        let mut data = [[0u8; 32]; 4];
        data[0][31] = 0xaa;
        data[2][5] = 0x55;
        write_header(&mut data[3], 99, 4, 1);
        let entry = Entry::new(data).unwrap();
        let claim = Claim::classify(&entry).unwrap();
        assert!(matches!(claim, Claim::Other { claim_type: 99, .. }));
        assert_eq!(claim.entry().unwrap().to_bytes(), entry.to_bytes());
    }

    #[test]
    fn test_document_type_codes() {
        assert_eq!(DocumentType::try_from(2).unwrap(), DocumentType::Jwt);
        assert_eq!(DocumentType::RawData as u32, 3);
        assert!(DocumentType::try_from(4).is_err());
    }
}
