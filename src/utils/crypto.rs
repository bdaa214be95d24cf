// src/utils/crypto.rs
//! Hash primitives shared by the claim engine.
//!
//! - Keccak-256 (Ethereum's hash) for credential digests and signed messages.
//! - Poseidon over the BN254 scalar field for every Merkle tree hash and the
//!   DID digest.

use ark_bn254::Fr;
use ark_crypto_primitives::sponge::poseidon::{
    find_poseidon_ark_and_mds, PoseidonConfig, PoseidonSponge,
};
use ark_crypto_primitives::sponge::CryptographicSponge;
use ark_ff::{BigInteger, PrimeField};
use ethers::utils::keccak256;
use once_cell::sync::Lazy;

/// Number of bytes of a field element that carry data. The top byte of every
/// 32-byte element is kept at zero so the element always lies in the field.
pub const FIELD_DATA_BYTES: usize = 31;

const FULL_ROUNDS: usize = 8;
const PARTIAL_ROUNDS: usize = 57;
const ALPHA: u64 = 5;
const RATE: usize = 2;
const CAPACITY: usize = 1;

/// Poseidon parameters for BN254, rate 2 / capacity 1.
///
/// Round constants and the MDS matrix are derived with the Grain LFSR, so
/// every process computes the same parameters without a cache file.
static POSEIDON_CONFIG: Lazy<PoseidonConfig<Fr>> = Lazy::new(|| {
    let (ark, mds) = find_poseidon_ark_and_mds::<Fr>(
        Fr::MODULUS_BIT_SIZE as u64,
        RATE,
        FULL_ROUNDS as u64,
        PARTIAL_ROUNDS as u64,
        0,
    );
    PoseidonConfig::new(FULL_ROUNDS, PARTIAL_ROUNDS, ALPHA, mds, ark, RATE, CAPACITY)
});

/// Computes a Keccak-256 hash of the input data (Ethereum-compatible).
pub fn hash_data(data: &[u8]) -> [u8; 32] {
    keccak256(data)
}

/// Poseidon hash of a fixed-arity list of field elements.
pub fn poseidon_hash(elems: &[Fr]) -> Fr {
    let mut sponge = PoseidonSponge::new(&POSEIDON_CONFIG);
    sponge.absorb(&elems);
    let squeezed: Vec<Fr> = sponge.squeeze_field_elements(1);
    squeezed[0]
}

/// Poseidon hash of an arbitrary byte string.
///
/// Bytes are packed big-endian into 31-byte chunks; the byte length is
/// absorbed first so inputs that differ only in trailing zeros do not collide.
pub fn poseidon_bytes(data: &[u8]) -> Fr {
    let mut elems = Vec::with_capacity(1 + data.len() / FIELD_DATA_BYTES + 1);
    elems.push(Fr::from(data.len() as u64));
    elems.extend(
        data.chunks(FIELD_DATA_BYTES)
            .map(Fr::from_be_bytes_mod_order),
    );
    poseidon_hash(&elems)
}

/// Big-endian bytes of a field element reduced to 31 data bytes.
pub fn fr_to_field_bytes(value: &Fr) -> [u8; 32] {
    let be = value.into_bigint().to_bytes_be();
    let mut out = [0u8; 32];
    // BN254 elements serialize to exactly 32 bytes; drop the top one.
    let start = be.len().saturating_sub(FIELD_DATA_BYTES);
    out[32 - (be.len() - start)..].copy_from_slice(&be[start..]);
    out
}

/// Interprets a 32-byte big-endian element as a field element.
pub fn field_bytes_to_fr(bytes: &[u8; 32]) -> Fr {
    Fr::from_be_bytes_mod_order(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keccak_matches_known_vector() {
        let hash = hash_data(b"");
        assert_eq!(
            ethers_core::utils::hex::encode(hash),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_poseidon_is_deterministic_and_order_sensitive() {
        let a = Fr::from(1u64);
        let b = Fr::from(2u64);
        assert_eq!(poseidon_hash(&[a, b]), poseidon_hash(&[a, b]));
        assert_ne!(poseidon_hash(&[a, b]), poseidon_hash(&[b, a]));
    }

    #[test]
    fn test_poseidon_bytes_length_separated() {
        assert_ne!(poseidon_bytes(b"abc"), poseidon_bytes(b"abc\0"));
    }

    #[test]
    fn test_field_bytes_top_byte_zero() {
        for i in 0..16u64 {
            let h = poseidon_hash(&[Fr::from(i)]);
            let bytes = fr_to_field_bytes(&h);
            assert_eq!(bytes[0], 0);
            // reduced value converts back to the same bytes
            assert_eq!(fr_to_field_bytes(&field_bytes_to_fr(&bytes)), bytes);
        }
    }
}
