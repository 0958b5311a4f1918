//! JWKS documents and the verifying keys built from them.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resolver::FetchError;

/// One entry of a JWKS `keys` array.
///
/// Only the members needed to rebuild a verifying key are modelled; anything
/// else is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub use_field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// RSA signing key from base64url modulus and exponent.
    pub fn rsa(kid: impl Into<String>, n: impl Into<String>, e: impl Into<String>) -> Self {
        Self {
            kty: "RSA".into(),
            kid: Some(kid.into()),
            alg: Some("RS256".into()),
            use_field: Some("sig".into()),
            n: Some(n.into()),
            e: Some(e.into()),
            crv: None,
            x: None,
            y: None,
        }
    }
}

/// Key family a signature algorithm belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum KeyFamily {
    Rsa,
    Ec,
    Ed,
}

impl KeyFamily {
    /// Family for an asymmetric algorithm; `None` for HMAC, which a public
    /// key set can never vouch for.
    pub fn of(alg: Algorithm) -> Option<Self> {
        match alg {
            Algorithm::RS256
            | Algorithm::RS384
            | Algorithm::RS512
            | Algorithm::PS256
            | Algorithm::PS384
            | Algorithm::PS512 => Some(KeyFamily::Rsa),
            Algorithm::ES256 | Algorithm::ES384 => Some(KeyFamily::Ec),
            Algorithm::EdDSA => Some(KeyFamily::Ed),
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum JwkError {
    #[error("key has no 'kid'")]
    MissingKeyId,

    #[error("key is not for signing (use '{0}')")]
    NotForSigning(String),

    #[error("unsupported key type '{0}'")]
    UnsupportedKeyType(String),

    #[error("unsupported curve '{0}'")]
    UnsupportedCurve(String),

    #[error("missing key parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("unknown algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("invalid key material: {0}")]
    InvalidKey(#[from] jsonwebtoken::errors::Error),
}

/// A public verification key, immutable once built.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithm: Option<Algorithm>,
    family: KeyFamily,
    key: DecodingKey,
}

impl SigningKey {
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, JwkError> {
        let kid = jwk.kid.clone().ok_or(JwkError::MissingKeyId)?;

        if let Some(use_field) = jwk.use_field.as_deref() {
            if use_field != "sig" {
                return Err(JwkError::NotForSigning(use_field.to_string()));
            }
        }

        let algorithm = match jwk.alg.as_deref() {
            Some(alg) => {
                Some(Algorithm::from_str(alg).map_err(|_| JwkError::UnknownAlgorithm(alg.into()))?)
            }
            None => None,
        };

        let param = |value: &Option<String>, name: &'static str| {
            value.clone().ok_or(JwkError::MissingParameter(name))
        };

        let (family, key) = match jwk.kty.as_str() {
            "RSA" => {
                let key = DecodingKey::from_rsa_components(&param(&jwk.n, "n")?, &param(&jwk.e, "e")?)?;
                (KeyFamily::Rsa, key)
            }
            "EC" => {
                let crv = param(&jwk.crv, "crv")?;
                if crv != "P-256" && crv != "P-384" {
                    return Err(JwkError::UnsupportedCurve(crv));
                }
                let key = DecodingKey::from_ec_components(&param(&jwk.x, "x")?, &param(&jwk.y, "y")?)?;
                (KeyFamily::Ec, key)
            }
            "OKP" => {
                let crv = param(&jwk.crv, "crv")?;
                if crv != "Ed25519" {
                    return Err(JwkError::UnsupportedCurve(crv));
                }
                (KeyFamily::Ed, DecodingKey::from_ed_components(&param(&jwk.x, "x")?)?)
            }
            other => return Err(JwkError::UnsupportedKeyType(other.to_string())),
        };

        if let Some(alg) = algorithm {
            if KeyFamily::of(alg) != Some(family) {
                return Err(JwkError::UnknownAlgorithm(format!("{alg:?} for {} key", jwk.kty)));
            }
        }

        Ok(Self {
            kid,
            algorithm,
            family,
            key,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    pub fn family(&self) -> KeyFamily {
        self.family
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.key
    }

    /// Whether a token signed with `alg` may be checked against this key:
    /// the family must fit and a declared key algorithm must match exactly.
    pub fn accepts(&self, alg: Algorithm) -> bool {
        KeyFamily::of(alg) == Some(self.family) && self.algorithm.is_none_or(|own| own == alg)
    }
}

impl core::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("family", &self.family)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
struct JwkDocument {
    /// Parsed lazily: one malformed entry must not discard the others.
    keys: Vec<serde_json::Value>,
}

/// Signing keys fetched from one source at one moment.
#[derive(Debug, Clone)]
pub struct KeySet {
    keys: HashMap<String, Arc<SigningKey>>,
    source: String,
    fetched_at: DateTime<Utc>,
}

impl KeySet {
    pub fn new(keys: Vec<SigningKey>, source: impl Into<String>, fetched_at: DateTime<Utc>) -> Self {
        let mut map = HashMap::with_capacity(keys.len());
        for key in keys {
            map.entry(key.kid.clone()).or_insert_with(|| Arc::new(key));
        }
        Self {
            keys: map,
            source: source.into(),
            fetched_at,
        }
    }

    /// Parse a JWKS document, keeping every usable signing key.
    ///
    /// Unusable entries are skipped; a document without a single usable key
    /// is an error.
    pub fn from_document(
        body: &[u8],
        source: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, FetchError> {
        let source = source.into();
        let document: JwkDocument =
            serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;

        let mut keys = Vec::new();
        let mut skipped = 0usize;
        for entry in document.keys {
            let parsed = serde_json::from_value::<Jwk>(entry)
                .map_err(|e| e.to_string())
                .and_then(|jwk| SigningKey::from_jwk(&jwk).map_err(|e| e.to_string()));
            match parsed {
                Ok(key) => keys.push(key),
                Err(reason) => {
                    tracing::debug!(source = %source, %reason, "skipping JWK");
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            tracing::info!(source = %source, skipped, usable = keys.len(), "some JWKs were not usable for signing");
        }
        if keys.is_empty() {
            return Err(FetchError::NoUsableKeys);
        }

        Ok(Self::new(keys, source, fetched_at))
    }

    pub fn get(&self, kid: &str) -> Option<Arc<SigningKey>> {
        self.keys.get(kid).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Key identifiers, sorted.
    pub fn key_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.keys.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }
}
