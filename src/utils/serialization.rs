// src/utils/serialization.rs
//! Serialization helpers: hex codecs used by the tables and the JSON proof
//! format.

use crate::error::{Error, Result};
use ethers_core::utils::hex;

/// Lowercase hex without `0x` prefix.
pub fn encode_hex(bytes: impl AsRef<[u8]>) -> String {
    hex::encode(bytes)
}

/// Decodes hex with or without a `0x` prefix.
pub fn decode_hex(data: &str) -> Result<Vec<u8>> {
    let trimmed = data.strip_prefix("0x").unwrap_or(data);
    hex::decode(trimmed).map_err(|e| Error::InvalidInput(format!("bad hex: {e}")))
}

/// Decodes hex into a fixed-size array.
pub fn decode_hex_array<const N: usize>(data: &str) -> Result<[u8; N]> {
    let bytes = decode_hex(data)?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        Error::InvalidInput(format!("expected {N} bytes of hex, got {}", b.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_hex_accepts_prefix() {
        assert_eq!(decode_hex("0x0aff").unwrap(), vec![0x0a, 0xff]);
        assert_eq!(decode_hex("0aff").unwrap(), vec![0x0a, 0xff]);
    }

    #[test]
    fn test_decode_hex_array_rejects_wrong_length() {
        assert!(decode_hex_array::<4>("0aff").is_err());
        assert_eq!(decode_hex_array::<2>("0aff").unwrap(), [0x0a, 0xff]);
    }

    #[test]
    fn test_decode_hex_rejects_garbage() {
        assert!(matches!(decode_hex("zz"), Err(Error::InvalidInput(_))));
    }
}
