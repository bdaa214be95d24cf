// src/wallet/key_management.rs
//! Issuer-side key management.
//!
//! Holds a secp256k1 key and produces what the hub verifies:
//! - `EcdsaSecp256k1Signature2019` proofs (keccak-256 prehash of the canonical
//!   credential, hex `r ‖ s`)
//! - `ES256K` compact JWTs (SHA-256 over the signing input)
//! - the DID document entry and Authorize-KSign claim for the key

use crate::claims::AuthKey;
use crate::error::{Error, Result};
use crate::models::credential::{CredentialProof, Proofs, VerifiableCredential, SECP256K1_SIGNATURE_2019};
use crate::models::did::{Did, PublicKey as DocumentKey, SECP256K1_SUITES};
use crate::services::verifier::ALG_ES256K;
use crate::utils::crypto::hash_data;
use crate::utils::serialization::{decode_hex, encode_hex};
use k256::ecdsa::signature::hazmat::PrehashSigner;
use k256::ecdsa::signature::Signer;
use k256::ecdsa::{Signature, SigningKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::{PublicKey, SecretKey};

/// Key management for elliptic curve signing.
///
/// This struct provides:
/// - Key generation from the system RNG, or import from hex
/// - Public key derivation
/// - Credential and JWT signing
///
/// # Security Notes
/// - The secret key is never exposed
/// - Signatures are deterministic (RFC 6979) and low-S
#[derive(Clone)]
pub struct KeyManager {
    /// Private key (never exposed)
    secret_key: SecretKey,
    /// Derived public key for verification
    public_key: PublicKey,
}

impl KeyManager {
    /// Generates a KeyManager with a fresh random key.
    pub fn generate() -> Self {
        Self::from_secret(SecretKey::random(&mut rand::thread_rng()))
    }

    /// Imports a hex-encoded 32-byte private key (with or without 0x prefix).
    ///
    /// # Errors
    /// [`Error::InvalidInput`] if the hex is malformed or the scalar is invalid.
    pub fn from_hex(private_key: &str) -> Result<Self> {
        let bytes = decode_hex(private_key)?;
        let secret_key = SecretKey::from_slice(&bytes)
            .map_err(|e| Error::InvalidInput(format!("private key: {e}")))?;
        Ok(Self::from_secret(secret_key))
    }

    fn from_secret(secret_key: SecretKey) -> Self {
        let public_key = secret_key.public_key();
        KeyManager {
            secret_key,
            public_key,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// Compressed SEC1 public key as hex.
    pub fn public_key_hex(&self) -> String {
        encode_hex(self.public_key.to_encoded_point(true).as_bytes())
    }

    /// DID document entry publishing this key under `did#fragment`.
    pub fn document_key(&self, did: &Did, fragment: &str) -> DocumentKey {
        DocumentKey {
            id: format!("{did}#{fragment}"),
            key_type: SECP256K1_SUITES[0].to_string(),
            controller: did.to_string(),
            public_key_hex: Some(self.public_key_hex()),
            public_key_jwk: None,
        }
    }

    /// Authorize-KSign claim for this key.
    pub fn auth_key(&self) -> AuthKey {
        AuthKey::new(self.public_key)
    }

    fn signing_key(&self) -> SigningKey {
        SigningKey::from(&self.secret_key)
    }

    /// Signs a 32-byte digest, returning compact `r ‖ s`.
    pub fn sign_prehash(&self, digest: &[u8; 32]) -> Result<[u8; 64]> {
        let signature: Signature = self
            .signing_key()
            .sign_prehash(digest)
            .map_err(|e| Error::InvalidInput(format!("signing failed: {e}")))?;
        let mut out = [0u8; 64];
        out.copy_from_slice(&signature.to_bytes());
        Ok(out)
    }

    /// Signs a message using ECDSA (secp256k1) with Keccak-256 prehashing.
    pub fn sign_message(&self, message: &[u8]) -> Result<[u8; 64]> {
        self.sign_prehash(&hash_data(message))
    }

    /// Attaches an `EcdsaSecp256k1Signature2019` proof made by this key.
    ///
    /// # Arguments
    /// * `credential` - the credential to sign; an existing proof is replaced
    /// * `creator` - DID URL of this key in the issuer's document
    pub fn sign_credential(
        &self,
        mut credential: VerifiableCredential,
        creator: &str,
    ) -> Result<VerifiableCredential> {
        credential.proof = None;
        let signature = self.sign_prehash(&credential.signing_hash()?)?;
        credential.proof = Some(Proofs::One(CredentialProof {
            proof_type: SECP256K1_SIGNATURE_2019.to_string(),
            created: Some(chrono::Utc::now().to_rfc3339()),
            creator: creator.to_string(),
            signature_value: encode_hex(signature),
            proof_purpose: Some("assertionMethod".to_string()),
        }));
        Ok(credential)
    }

    /// Builds an `ES256K` compact JWT carrying `payload`.
    pub fn sign_jwt(&self, payload: serde_json::Value) -> Result<String> {
        let header = serde_json::json!({"alg": ALG_ES256K, "typ": "JWT"});
        let encode = |bytes: &[u8]| base64::encode_config(bytes, base64::URL_SAFE_NO_PAD);
        let input = format!(
            "{}.{}",
            encode(serde_json::to_string(&header)?.as_bytes()),
            encode(serde_json::to_string(&payload)?.as_bytes())
        );
        let signature: Signature = self
            .signing_key()
            .try_sign(input.as_bytes())
            .map_err(|e| Error::InvalidInput(format!("signing failed: {e}")))?;
        Ok(format!("{input}.{}", encode(&signature.to_bytes())))
    }
}
