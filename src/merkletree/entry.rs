// src/merkletree/entry.rs
//! Fixed 128-byte tree entries.
//!
//! An entry is four 32-byte field elements `D0..D3`. The top byte of every
//! element is zero. The low 64 bits of `D3` hold the claim header: a 32-bit
//! claim type and a 32-bit version, both little-endian, with a 32-bit era in
//! the four bytes above them.
//!
//! Leaves are addressed by `slot = H(HIndex, HValue)`. `HIndex` covers the
//! claim type's index elements with version and era masked out, `HValue`
//! covers the whole entry, so every version of one index gets its own leaf.

use crate::claims::{CLAIM_TYPE_REGISTERED_DOCUMENT, CLAIM_TYPE_SET_ROOT_KEY};
use crate::error::{Error, Result};
use crate::merkletree::hash::{hash_elems, Hash};
use crate::utils::serialization::{decode_hex, encode_hex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

pub const ELEM_BYTES: usize = 32;
pub const ENTRY_ELEMS: usize = 4;
pub const ENTRY_BYTES: usize = ELEM_BYTES * ENTRY_ELEMS;

/// Claim type binding a secp256k1 signing key to a DID tree.
pub const CLAIM_TYPE_AUTHORIZE_KSIGN_SECP256K1: u32 = 4;

const TYPE_RANGE: std::ops::Range<usize> = 24..28;
const VERSION_RANGE: std::ops::Range<usize> = 28..32;
const ERA_RANGE: std::ops::Range<usize> = 20..24;

/// One 32-byte entry element.
pub type Element = [u8; ELEM_BYTES];

/// Elements that form the index of each claim type.
fn index_elements(claim_type: u32) -> &'static [usize] {
    match claim_type {
        CLAIM_TYPE_SET_ROOT_KEY => &[2, 3],
        CLAIM_TYPE_REGISTERED_DOCUMENT => &[0, 1, 2, 3],
        CLAIM_TYPE_AUTHORIZE_KSIGN_SECP256K1 => &[1, 2, 3],
        _ => &[2, 3],
    }
}

/// A tree entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Entry {
    data: [Element; ENTRY_ELEMS],
}

impl Entry {
    /// Builds an entry, rejecting elements outside the field.
    pub fn new(data: [Element; ENTRY_ELEMS]) -> Result<Self> {
        if data.iter().any(|e| e[0] != 0) {
            return Err(Error::OutOfField);
        }
        Ok(Self { data })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != ENTRY_BYTES {
            return Err(Error::InvalidInput(format!("entry of {} bytes", bytes.len())));
        }
        let mut data = [[0u8; ELEM_BYTES]; ENTRY_ELEMS];
        for (elem, chunk) in data.iter_mut().zip(bytes.chunks(ELEM_BYTES)) {
            elem.copy_from_slice(chunk);
        }
        Entry::new(data)
    }

    pub fn to_bytes(&self) -> [u8; ENTRY_BYTES] {
        let mut out = [0u8; ENTRY_BYTES];
        for (chunk, elem) in out.chunks_mut(ELEM_BYTES).zip(self.data.iter()) {
            chunk.copy_from_slice(elem);
        }
        out
    }

    pub fn element(&self, i: usize) -> &Element {
        &self.data[i]
    }

    pub fn claim_type(&self) -> u32 {
        read_u32(&self.data[3], TYPE_RANGE)
    }

    pub fn version(&self) -> u32 {
        read_u32(&self.data[3], VERSION_RANGE)
    }

    pub fn era(&self) -> u32 {
        read_u32(&self.data[3], ERA_RANGE)
    }

    /// Hash of the index elements; stable across versions and eras.
    pub fn hindex(&self) -> Hash {
        let mut header = self.data[3];
        header[VERSION_RANGE].fill(0);
        header[ERA_RANGE].fill(0);
        let elems: Vec<Hash> = index_elements(self.claim_type())
            .iter()
            .map(|&i| if i == 3 { Hash(header) } else { Hash(self.data[i]) })
            .collect();
        hash_elems(&elems)
    }

    /// Hash of the whole entry.
    pub fn hvalue(&self) -> Hash {
        let elems: Vec<Hash> = self.data.iter().map(|e| Hash(*e)).collect();
        hash_elems(&elems)
    }

    /// Leaf position in the tree.
    pub fn slot(&self) -> Hash {
        slot_of(&self.hindex(), &self.hvalue())
    }
}

pub fn slot_of(hindex: &Hash, hvalue: &Hash) -> Hash {
    hash_elems(&[*hindex, *hvalue])
}

/// Writes a claim header (type, version, era) into element `D3`.
pub fn write_header(elem: &mut Element, claim_type: u32, version: u32, era: u32) {
    elem[TYPE_RANGE].copy_from_slice(&claim_type.to_le_bytes());
    elem[VERSION_RANGE].copy_from_slice(&version.to_le_bytes());
    elem[ERA_RANGE].copy_from_slice(&era.to_le_bytes());
}

fn read_u32(elem: &Element, range: std::ops::Range<usize>) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&elem[range]);
    u32::from_le_bytes(buf)
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("type", &self.claim_type())
            .field("version", &self.version())
            .field("data", &encode_hex(self.to_bytes()))
            .finish()
    }
}

impl Serialize for Entry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_hex(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for Entry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = decode_hex(&s).map_err(serde::de::Error::custom)?;
        Entry::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(claim_type: u32, version: u32, d2: u8) -> Entry {
        let mut data = [[0u8; 32]; 4];
        data[2][31] = d2;
        data[1][31] = version as u8 + 7;
        write_header(&mut data[3], claim_type, version, 0);
        Entry::new(data).unwrap()
    }

    #[test]
    fn test_out_of_field_rejected() {
        let mut data = [[0u8; 32]; 4];
        data[1][0] = 1;
        assert!(matches!(Entry::new(data), Err(Error::OutOfField)));
    }

    #[test]
    fn test_header_fields() {
        let mut data = [[0u8; 32]; 4];
        write_header(&mut data[3], 11, 1, 3);
        let e = Entry::new(data).unwrap();
        assert_eq!(e.claim_type(), 11);
        assert_eq!(e.version(), 1);
        assert_eq!(e.era(), 3);
    }

    #[test]
    fn test_hindex_ignores_version_hvalue_does_not() {
        let v0 = entry(77, 0, 5);
        let v1 = entry(77, 1, 5);
        assert_eq!(v0.hindex(), v1.hindex());
        assert_ne!(v0.hvalue(), v1.hvalue());
        assert_ne!(v0.slot(), v1.slot());
        assert_ne!(v0.hindex(), entry(78, 0, 5).hindex());
        assert_ne!(v0.hindex(), entry(77, 0, 6).hindex());
    }

    #[test]
    fn test_bytes_roundtrip() {
        let e = entry(4, 2, 9);
        assert_eq!(Entry::from_bytes(&e.to_bytes()).unwrap(), e);
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(serde_json::from_str::<Entry>(&json).unwrap(), e);
    }
}
