// src/models/credential.rs
//! Verifiable Credential data model.
//!
//! Two credential shapes reach the claim engine:
//! - [`VerifiableCredential`]: a W3C credential with a linked-data style
//!   `EcdsaSecp256k1Signature2019` proof over its canonical form.
//! - [`CompactJwt`]: a credential in compact JSON-Web-Token form.
//!
//! Both are identified by the keccak-256 multihash of their canonical bytes.

use crate::claims::DocumentType;
use crate::error::{Error, Result};
use crate::models::did::{Did, DidUrl};
use crate::utils::crypto::hash_data;
use crate::utils::multihash::{keccak_multihash, MULTIHASH_LEN};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Credential `type` entry marking a license credential.
pub const LICENSE_CREDENTIAL_TYPE: &str = "LicenseCredential";

/// Signature suite accepted on linked-data proofs.
pub const SECP256K1_SIGNATURE_2019: &str = "EcdsaSecp256k1Signature2019";

/// Proof attached to a [`VerifiableCredential`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialProof {
    #[serde(rename = "type")]
    pub proof_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    /// DID URL of the signing key.
    #[serde(alias = "verificationMethod")]
    pub creator: String,
    /// Hex r ‖ s (an optional trailing recovery byte is ignored).
    pub signature_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_purpose: Option<String>,
}

impl CredentialProof {
    pub fn creator_url(&self) -> Result<DidUrl> {
        self.creator.parse()
    }
}

/// `proof` may be a single object or an array.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Proofs {
    One(CredentialProof),
    Many(Vec<CredentialProof>),
}

impl Proofs {
    pub fn iter(&self) -> impl Iterator<Item = &CredentialProof> {
        match self {
            Proofs::One(p) => std::slice::from_ref(p).iter(),
            Proofs::Many(v) => v.iter(),
        }
    }
}

/// A W3C Verifiable Credential.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerifiableCredential {
    #[serde(rename = "@context")]
    pub context: Value,
    #[serde(rename = "type")]
    pub credential_type: Value,
    pub credential_subject: Value,
    pub issuer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub credential_schema: Value,
    pub issuance_date: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Proofs>,
}

/// The signed view of a credential: proofs stripped, fields in fixed order.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CanonicalCredential<'a> {
    #[serde(rename = "@context")]
    context: &'a Value,
    #[serde(rename = "type")]
    credential_type: &'a Value,
    credential_subject: &'a Value,
    issuer: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    holder: Option<&'a str>,
    credential_schema: &'a Value,
    issuance_date: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    expiration_date: Option<&'a str>,
}

impl VerifiableCredential {
    /// Stable JSON of the credential without its proofs.
    pub fn canonical_json(&self) -> Result<String> {
        let canonical = CanonicalCredential {
            context: &self.context,
            credential_type: &self.credential_type,
            credential_subject: &self.credential_subject,
            issuer: &self.issuer,
            holder: self.holder.as_deref(),
            credential_schema: &self.credential_schema,
            issuance_date: &self.issuance_date,
            expiration_date: self.expiration_date.as_deref(),
        };
        Ok(serde_json::to_string(&canonical)?)
    }

    /// Keccak-256 of the canonical form: the message that was signed.
    pub fn signing_hash(&self) -> Result<[u8; 32]> {
        Ok(hash_data(self.canonical_json()?.as_bytes()))
    }

    pub fn multihash(&self) -> Result<[u8; MULTIHASH_LEN]> {
        Ok(keccak_multihash(self.canonical_json()?.as_bytes()))
    }

    pub fn issuer_did(&self) -> Result<Did> {
        self.issuer.parse()
    }

    pub fn proofs(&self) -> impl Iterator<Item = &CredentialProof> {
        self.proof.iter().flat_map(|p| p.iter())
    }

    pub fn has_type(&self, name: &str) -> bool {
        match &self.credential_type {
            Value::String(s) => s == name,
            Value::Array(types) => types.iter().any(|t| t.as_str() == Some(name)),
            _ => false,
        }
    }

    pub fn document_type(&self) -> DocumentType {
        if self.has_type(LICENSE_CREDENTIAL_TYPE) {
            DocumentType::License
        } else {
            DocumentType::Content
        }
    }

    /// The primary credential type name, i.e. the last entry of `type`.
    pub fn type_name(&self) -> String {
        match &self.credential_type {
            Value::String(s) => s.clone(),
            Value::Array(types) => types
                .iter()
                .rev()
                .find_map(|t| t.as_str())
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JwtHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JwtPayload {
    pub iss: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
    #[serde(flatten)]
    pub claims: serde_json::Map<String, Value>,
}

/// A parsed compact JWT (`header.payload.signature`).
#[derive(Debug, Clone, PartialEq)]
pub struct CompactJwt {
    raw: String,
    pub header: JwtHeader,
    pub payload: JwtPayload,
    pub signature: Vec<u8>,
}

fn b64url_decode(part: &str, what: &str) -> Result<Vec<u8>> {
    base64::decode_config(part, base64::URL_SAFE_NO_PAD)
        .map_err(|e| Error::InvalidInput(format!("jwt {what}: {e}")))
}

impl CompactJwt {
    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim();
        let mut parts = token.split('.');
        let (header, payload, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(h), Some(p), Some(s), None) => (h, p, s),
            _ => return Err(Error::InvalidInput("jwt must have three parts".into())),
        };
        Ok(Self {
            raw: token.to_string(),
            header: serde_json::from_slice(&b64url_decode(header, "header")?)?,
            payload: serde_json::from_slice(&b64url_decode(payload, "payload")?)?,
            signature: b64url_decode(signature, "signature")?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// `base64url(header) . base64url(payload)`, the bytes that were signed.
    pub fn signing_input(&self) -> &str {
        match self.raw.rfind('.') {
            Some(idx) => &self.raw[..idx],
            None => &self.raw,
        }
    }

    pub fn issuer_did(&self) -> Result<Did> {
        self.payload.iss.parse()
    }

    /// Multihash of the compact token bytes.
    pub fn multihash(&self) -> [u8; MULTIHASH_LEN] {
        keccak_multihash(self.raw.as_bytes())
    }
}

/// Either credential shape, as accepted by revocation and proof generation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum CredentialInput {
    Signed(VerifiableCredential),
    Jwt(String),
}

/// A credential reduced to what its Registered-Document claim needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSubject {
    pub issuer: Did,
    pub multihash: [u8; MULTIHASH_LEN],
    pub document_type: DocumentType,
    /// Canonical credential JSON or the compact token, as published.
    pub payload: String,
}

impl CredentialInput {
    pub fn claim_subject(&self) -> Result<ClaimSubject> {
        match self {
            CredentialInput::Signed(vc) => Ok(ClaimSubject {
                issuer: vc.issuer_did()?,
                multihash: vc.multihash()?,
                document_type: vc.document_type(),
                payload: vc.canonical_json()?,
            }),
            CredentialInput::Jwt(token) => {
                let jwt = CompactJwt::parse(token)?;
                Ok(ClaimSubject {
                    issuer: jwt.issuer_did()?,
                    multihash: jwt.multihash(),
                    document_type: DocumentType::Jwt,
                    payload: jwt.as_str().to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> VerifiableCredential {
        serde_json::from_value(json!({
            "@context": ["https://www.w3.org/2018/credentials/v1"],
            "type": ["VerifiableCredential", "ContentCredential"],
            "credentialSubject": {"id": "https://ap.com/article/1"},
            "issuer": "did:ethuri:abc",
            "issuanceDate": "2020-01-01T00:00:00Z",
            "proof": {
                "type": "EcdsaSecp256k1Signature2019",
                "creator": "did:ethuri:abc#key-1",
                "signatureValue": "00"
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_canonical_json_field_order_and_no_proof() {
        let json = sample().canonical_json().unwrap();
        assert!(!json.contains("proof"));
        let ctx = json.find("@context").unwrap();
        let ty = json.find("\"type\"").unwrap();
        let subject = json.find("credentialSubject").unwrap();
        let issuer = json.find("\"issuer\"").unwrap();
        let schema = json.find("credentialSchema").unwrap();
        let date = json.find("issuanceDate").unwrap();
        assert!(ctx < ty && ty < subject && subject < issuer && issuer < schema && schema < date);
    }

    #[test]
    fn test_multihash_ignores_proof() {
        let a = sample();
        let mut b = sample();
        b.proof = None;
        assert_eq!(a.multihash().unwrap(), b.multihash().unwrap());
    }

    #[test]
    fn test_document_type_from_types() {
        let mut vc = sample();
        assert_eq!(vc.document_type(), DocumentType::Content);
        vc.credential_type = json!(["VerifiableCredential", "LicenseCredential"]);
        assert_eq!(vc.document_type(), DocumentType::License);
        assert_eq!(vc.type_name(), "LicenseCredential");
    }

    #[test]
    fn test_proof_array_accepted() {
        let mut value = serde_json::to_value(sample()).unwrap();
        let proof = value["proof"].clone();
        value["proof"] = json!([proof.clone(), proof]);
        let vc: VerifiableCredential = serde_json::from_value(value).unwrap();
        assert_eq!(vc.proofs().count(), 2);
    }

    #[test]
    fn test_jwt_parse_parts() {
        let header = base64::encode_config(br#"{"alg":"ES256K","typ":"JWT"}"#, base64::URL_SAFE_NO_PAD);
        let payload = base64::encode_config(br#"{"iss":"did:ethuri:abc","sub":"x","iat":1}"#, base64::URL_SAFE_NO_PAD);
        let sig = base64::encode_config([1u8; 64], base64::URL_SAFE_NO_PAD);
        let token = format!("{header}.{payload}.{sig}");
        let jwt = CompactJwt::parse(&token).unwrap();
        assert_eq!(jwt.header.alg, "ES256K");
        assert_eq!(jwt.payload.iss, "did:ethuri:abc");
        assert_eq!(jwt.signing_input(), format!("{header}.{payload}"));
        assert_eq!(jwt.signature.len(), 64);
        assert!(CompactJwt::parse("a.b").is_err());
    }
}
