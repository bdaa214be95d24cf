// src/services/verifier.rs
//! Signature verification for credentials.
//!
//! Linked-data credentials carry an `EcdsaSecp256k1Signature2019` proof: a
//! secp256k1 signature over the keccak-256 digest of the canonical credential.
//! Compact JWTs are signed with `ES256K` (secp256k1) or `ES256` (P-256) over
//! the SHA-256 of their signing input.

use crate::error::{Error, Result};
use crate::models::credential::{CompactJwt, CredentialProof, VerifiableCredential, SECP256K1_SIGNATURE_2019};
use crate::models::did::{DidDocument, KeySuite, PublicKey};
use crate::services::did_resolver::DidResolver;
use crate::utils::serialization::decode_hex;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::signature::Verifier as _;
use k256::ecdsa::{Signature, VerifyingKey};
use log::debug;
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_FIXED};
use std::sync::Arc;

pub const ALG_ES256K: &str = "ES256K";
pub const ALG_ES256: &str = "ES256";

/// Parses an `r ‖ s` signature, dropping a trailing recovery byte, and
/// normalizes it to low-S.
fn secp256k1_signature(bytes: &[u8]) -> Result<Signature> {
    let rs = match bytes.len() {
        64 => bytes,
        65 => &bytes[..64],
        _ => return Err(Error::BadSignature),
    };
    let sig = Signature::from_slice(rs).map_err(|_| Error::BadSignature)?;
    Ok(sig.normalize_s().unwrap_or(sig))
}

fn secp256k1_key(material: &[u8]) -> Result<VerifyingKey> {
    VerifyingKey::from_sec1_bytes(material)
        .map_err(|e| Error::InvalidInput(format!("secp256k1 key: {e}")))
}

/// Verifies a secp256k1 signature over a 32-byte digest.
pub fn verify_secp256k1_prehash(key: &k256::PublicKey, digest: &[u8; 32], signature: &[u8]) -> Result<()> {
    let sig = secp256k1_signature(signature)?;
    VerifyingKey::from(key)
        .verify_prehash(digest, &sig)
        .map_err(|_| Error::BadSignature)
}

/// Verifies an `ES256K` JWT signature (SHA-256 over the signing input).
pub fn verify_es256k(material: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    let sig = secp256k1_signature(signature)?;
    secp256k1_key(material)?
        .verify(message, &sig)
        .map_err(|_| Error::BadSignature)
}

/// Verifies an `ES256` JWT signature. `material` is an uncompressed SEC1 point.
pub fn verify_es256(material: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    UnparsedPublicKey::new(&ECDSA_P256_SHA256_FIXED, material)
        .verify(message, signature)
        .map_err(|_| Error::BadSignature)
}

/// Credential verifier that resolves signer keys through a [`DidResolver`].
///
/// The Verifier provides:
/// - signer key lookup for linked-data proofs
/// - proof signature checks
/// - JWT verification against every usable key of the issuer document
#[derive(Clone)]
pub struct Verifier {
    resolver: Arc<dyn DidResolver>,
}

impl Verifier {
    pub fn new(resolver: Arc<dyn DidResolver>) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &Arc<dyn DidResolver> {
        &self.resolver
    }

    /// The proof a credential is verified by: its first proof.
    pub fn primary_proof(vc: &VerifiableCredential) -> Result<&CredentialProof> {
        vc.proofs()
            .next()
            .ok_or_else(|| Error::InvalidInput("credential has no proof".into()))
    }

    /// Resolves the key named by the credential's proof `creator`.
    ///
    /// # Errors
    /// - [`Error::UnsupportedSignatureSuite`] for any proof type or key type
    ///   other than secp256k1
    /// - [`Error::DidNotFound`] / [`Error::NotFound`] when the creator DID or
    ///   its key cannot be resolved
    pub async fn signer_key(&self, vc: &VerifiableCredential) -> Result<k256::PublicKey> {
        let proof = Self::primary_proof(vc)?;
        if proof.proof_type != SECP256K1_SIGNATURE_2019 {
            return Err(Error::UnsupportedSignatureSuite(proof.proof_type.clone()));
        }
        let creator = proof.creator_url()?;
        let document = self.resolver.resolve(&creator.did).await?;
        let key = document
            .find_key(&creator)
            .ok_or_else(|| Error::NotFound(format!("key {creator}")))?;
        if key.suite() != KeySuite::Secp256k1 {
            return Err(Error::UnsupportedSignatureSuite(key.key_type.clone()));
        }
        k256::PublicKey::from_sec1_bytes(&key.material()?)
            .map_err(|e| Error::InvalidInput(format!("secp256k1 key {}: {e}", key.id)))
    }

    /// Checks the primary proof of `vc` against `key`.
    pub fn verify_proof(vc: &VerifiableCredential, key: &k256::PublicKey) -> Result<()> {
        let proof = Self::primary_proof(vc)?;
        let signature = decode_hex(&proof.signature_value).map_err(|_| Error::BadSignature)?;
        verify_secp256k1_prehash(key, &vc.signing_hash()?, &signature)
    }

    /// Verifies a JWT against its issuer's DID document. Any key of a suite
    /// matching the `alg` header that verifies is enough.
    pub async fn verify_jwt(&self, jwt: &CompactJwt) -> Result<DidDocument> {
        let suite = match jwt.header.alg.as_str() {
            ALG_ES256K => KeySuite::Secp256k1,
            ALG_ES256 => KeySuite::Secp256r1,
            other => return Err(Error::UnsupportedSignatureSuite(other.to_string())),
        };
        let issuer = jwt.issuer_did()?;
        let document = self.resolver.resolve(&issuer).await?;
        let verified = document
            .public_key
            .iter()
            .filter(|k| k.suite() == suite)
            .any(|k| Self::jwt_key_verifies(k, suite, jwt));
        if !verified {
            return Err(Error::BadSignature);
        }
        debug!("jwt from {issuer} verified with {}", jwt.header.alg);
        Ok(document)
    }

    fn jwt_key_verifies(key: &PublicKey, suite: KeySuite, jwt: &CompactJwt) -> bool {
        let material = match key.material() {
            Ok(material) => material,
            Err(_) => return false,
        };
        let message = jwt.signing_input().as_bytes();
        let result = match suite {
            KeySuite::Secp256k1 => verify_es256k(&material, message, &jwt.signature),
            KeySuite::Secp256r1 => verify_es256(&material, message, &jwt.signature),
            KeySuite::Unsupported => Err(Error::BadSignature),
        };
        result.is_ok()
    }
}
