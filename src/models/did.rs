// src/models/did.rs
//! Decentralized Identifier (DID) data model.
//!
//! A [`Did`] is kept in canonical form `did:<method>:<method-specific-id>`;
//! fragments, paths and queries are dropped when parsing. A [`DidUrl`] keeps
//! the fragment so a verification key inside a [`DidDocument`] can be named.

use crate::error::{Error, Result};
use crate::utils::serialization::decode_hex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Verification suites recognised for secp256k1 keys.
pub const SECP256K1_SUITES: [&str; 2] = [
    "EcdsaSecp256k1VerificationKey2019",
    "EcdsaSecp256k1VerificationKey2018",
];

/// Verification suite recognised for P-256 keys.
pub const SECP256R1_SUITE: &str = "EcdsaSecp256r1VerificationKey2019";

/// A DID in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Did {
    method: String,
    id: String,
}

impl Did {
    pub fn new(method: &str, id: &str) -> Result<Self> {
        if method.is_empty()
            || !method
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        {
            return Err(Error::InvalidDid(format!("bad method {method:?}")));
        }
        if id.is_empty()
            || !id
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b"._-:%".contains(&b))
        {
            return Err(Error::InvalidDid(format!("bad method-specific id {id:?}")));
        }
        Ok(Self {
            method: method.to_string(),
            id: id.to_string(),
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn method_specific_id(&self) -> &str {
        &self.id
    }
}

impl FromStr for Did {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let rest = s
            .strip_prefix("did:")
            .ok_or_else(|| Error::InvalidDid(s.to_string()))?;
        let (method, tail) = rest
            .split_once(':')
            .ok_or_else(|| Error::InvalidDid(s.to_string()))?;
        let end = tail.find(['#', '?', '/']).unwrap_or(tail.len());
        Did::new(method, &tail[..end])
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "did:{}:{}", self.method, self.id)
    }
}

impl Serialize for Did {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Did {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A DID plus an optional fragment, e.g. `did:ethuri:123#key-1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DidUrl {
    pub did: Did,
    pub fragment: Option<String>,
}

impl FromStr for DidUrl {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let did = s.parse()?;
        let fragment = s
            .split_once('#')
            .map(|(_, f)| f.to_string())
            .filter(|f| !f.is_empty());
        Ok(Self { did, fragment })
    }
}

impl fmt::Display for DidUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.fragment {
            Some(frag) => write!(f, "{}#{}", self.did, frag),
            None => write!(f, "{}", self.did),
        }
    }
}

/// Key family of a document public key, derived from its `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySuite {
    Secp256k1,
    Secp256r1,
    Unsupported,
}

/// A public key entry of a DID document.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    pub id: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub controller: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_hex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_jwk: Option<serde_json::Value>,
}

impl PublicKey {
    pub fn suite(&self) -> KeySuite {
        if SECP256K1_SUITES.contains(&self.key_type.as_str()) {
            KeySuite::Secp256k1
        } else if self.key_type == SECP256R1_SUITE {
            KeySuite::Secp256r1
        } else {
            KeySuite::Unsupported
        }
    }

    /// SEC1-encoded key material, from `publicKeyHex` or an EC `publicKeyJwk`.
    pub fn material(&self) -> Result<Vec<u8>> {
        if let Some(hex) = &self.public_key_hex {
            return decode_hex(hex);
        }
        if let Some(jwk) = &self.public_key_jwk {
            let coord = |name: &str| -> Result<Vec<u8>> {
                let value = jwk
                    .get(name)
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::InvalidInput(format!("jwk without {name}")))?;
                base64::decode_config(value, base64::URL_SAFE_NO_PAD)
                    .map_err(|e| Error::InvalidInput(format!("jwk {name}: {e}")))
            };
            let mut sec1 = vec![0x04];
            sec1.extend(coord("x")?);
            sec1.extend(coord("y")?);
            return Ok(sec1);
        }
        Err(Error::InvalidInput(format!("key {} has no material", self.id)))
    }

    fn matches(&self, url: &DidUrl) -> bool {
        if self.id == url.to_string() {
            return true;
        }
        match (&url.fragment, self.id.split_once('#')) {
            (Some(frag), Some((prefix, key_frag))) => {
                key_frag == frag && (prefix.is_empty() || prefix == url.did.to_string())
            }
            _ => false,
        }
    }
}

/// A DID document: the keys and services published for a DID.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DidDocument {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
    pub id: Did,
    #[serde(default, alias = "verificationMethod")]
    pub public_key: Vec<PublicKey>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authentication: Vec<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<serde_json::Value>,
}

impl DidDocument {
    pub fn new(id: Did, public_key: Vec<PublicKey>) -> Self {
        Self {
            context: None,
            id,
            public_key,
            authentication: Vec::new(),
            service: Vec::new(),
        }
    }

    /// Looks up the key a DID URL points at.
    pub fn find_key(&self, url: &DidUrl) -> Option<&PublicKey> {
        self.public_key.iter().find(|k| k.matches(url))
    }
}
