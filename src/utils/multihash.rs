// src/utils/multihash.rs
//! Keccak-256 multihashes.
//!
//! Credentials are keyed by `0x1b ‖ 0x20 ‖ keccak256(data)`: the multihash
//! code for `keccak-256`, the digest length, then the digest itself.

use crate::error::{Error, Result};
use crate::utils::crypto::hash_data;
use crate::utils::serialization::{decode_hex, encode_hex};

/// Multihash code assigned to `keccak-256`.
pub const KECCAK_256_CODE: u8 = 0x1b;
pub const DIGEST_LEN: usize = 32;
pub const MULTIHASH_LEN: usize = DIGEST_LEN + 2;

/// Wraps a 32-byte keccak digest as a multihash.
pub fn wrap(digest: &[u8; DIGEST_LEN]) -> [u8; MULTIHASH_LEN] {
    let mut out = [0u8; MULTIHASH_LEN];
    out[0] = KECCAK_256_CODE;
    out[1] = DIGEST_LEN as u8;
    out[2..].copy_from_slice(digest);
    out
}

/// Keccak-256 multihash of `data`.
pub fn keccak_multihash(data: &[u8]) -> [u8; MULTIHASH_LEN] {
    wrap(&hash_data(data))
}

/// Checks the header of a multihash and returns the digest.
pub fn unwrap(multihash: &[u8]) -> Result<[u8; DIGEST_LEN]> {
    if multihash.len() != MULTIHASH_LEN
        || multihash[0] != KECCAK_256_CODE
        || multihash[1] as usize != DIGEST_LEN
    {
        return Err(Error::InvalidInput("not a keccak-256 multihash".into()));
    }
    let mut digest = [0u8; DIGEST_LEN];
    digest.copy_from_slice(&multihash[2..]);
    Ok(digest)
}

/// Parses either a hex keccak digest (re-wrapped) or a hex multihash.
pub fn parse_hex(input: &str) -> Result<[u8; MULTIHASH_LEN]> {
    let bytes = decode_hex(input)?;
    match bytes.len() {
        DIGEST_LEN => {
            let mut digest = [0u8; DIGEST_LEN];
            digest.copy_from_slice(&bytes);
            Ok(wrap(&digest))
        }
        MULTIHASH_LEN => {
            unwrap(&bytes)?;
            let mut mh = [0u8; MULTIHASH_LEN];
            mh.copy_from_slice(&bytes);
            Ok(mh)
        }
        n => Err(Error::InvalidInput(format!("content hash of {n} bytes"))),
    }
}

/// Hex form used as the primary key of credential tables.
pub fn to_hex(multihash: &[u8; MULTIHASH_LEN]) -> String {
    encode_hex(multihash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_prefix() {
        let mh = keccak_multihash(b"hello");
        assert_eq!(mh[0], 0x1b);
        assert_eq!(mh[1], 0x20);
        assert_eq!(&mh[2..], &hash_data(b"hello"));
    }

    #[test]
    fn test_parse_hex_accepts_digest_or_multihash() {
        let mh = keccak_multihash(b"x");
        let digest_hex = encode_hex(&mh[2..]);
        assert_eq!(parse_hex(&digest_hex).unwrap(), mh);
        assert_eq!(parse_hex(&to_hex(&mh)).unwrap(), mh);
    }

    #[test]
    fn test_parse_hex_rejects_other_lengths_and_codes() {
        assert!(parse_hex("00ff").is_err());
        let mut mh = keccak_multihash(b"x");
        mh[0] = 0x12;
        assert!(parse_hex(&to_hex(&mh)).is_err());
    }
}
