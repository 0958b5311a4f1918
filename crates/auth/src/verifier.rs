//! Bearer token verification.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde_json::{Map, Value};
use thiserror::Error;
use tollgate_core::{AdmissionError, Identity};

use crate::claims::{ClaimExpectations, ClaimsError, TokenClaims, TokenValidationError, validate_claims};
use crate::extract::ClaimRules;
use crate::jwks::KeyFamily;
use crate::resolver::{FetchError, KeyResolver, ResolveError};
use crate::EffectivePermissionSet;

/// Static verification parameters, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierSettings {
    pub issuer: String,
    pub audience: String,
    pub clock_skew: Duration,
    /// Header algorithms accepted at all. Checked before any key lookup.
    pub algorithms: Vec<Algorithm>,
}

impl VerifierSettings {
    fn expectations(&self) -> ClaimExpectations {
        ClaimExpectations {
            issuer: self.issuer.clone(),
            audience: self.audience.clone(),
            clock_skew: self.clock_skew,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("algorithm {0:?} is not allowed")]
    AlgorithmNotAllowed(Algorithm),

    #[error("token header has no 'kid'")]
    MissingKeyId,

    #[error("no signing key with kid '{0}'")]
    UnknownKey(String),

    #[error("signing keys unavailable: {0}")]
    KeySource(FetchError),

    #[error("token algorithm does not match its signing key")]
    AlgorithmMismatch,

    #[error("signature verification failed")]
    BadSignature,

    #[error(transparent)]
    Claims(#[from] ClaimsError),

    #[error(transparent)]
    Validation(#[from] TokenValidationError),
}

impl From<ResolveError> for TokenError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound(kid) => TokenError::UnknownKey(kid),
            ResolveError::Source(err) => TokenError::KeySource(err),
        }
    }
}

impl From<TokenError> for AdmissionError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::KeySource(err) => {
                AdmissionError::upstream(format!("signing keys unavailable: {err}"))
            }
            other => AdmissionError::invalid_token(other.to_string()),
        }
    }
}

/// A token that passed every check.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    pub claims: TokenClaims,
    pub permissions: EffectivePermissionSet,
    pub key_id: String,
    pub algorithm: Algorithm,
}

impl VerifiedToken {
    /// Caller identity to assert downstream.
    pub fn identity(&self) -> Identity {
        Identity {
            user_id: self.claims.user_id(),
            issuer: self.claims.issuer.clone().unwrap_or_default(),
            subject: self.claims.subject.clone().unwrap_or_default(),
        }
    }
}

/// Verifies compact JWS bearer tokens against a [`KeyResolver`].
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    resolver: Arc<KeyResolver>,
    settings: VerifierSettings,
    rules: ClaimRules,
}

impl TokenVerifier {
    pub fn new(resolver: Arc<KeyResolver>, settings: VerifierSettings) -> Self {
        Self {
            resolver,
            settings,
            rules: ClaimRules::default(),
        }
    }

    pub fn with_rules(mut self, rules: ClaimRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn resolver(&self) -> &Arc<KeyResolver> {
        &self.resolver
    }

    pub fn settings(&self) -> &VerifierSettings {
        &self.settings
    }

    /// Verify `token` as of `now`.
    ///
    /// Order matters: structure and algorithm are checked before the key is
    /// looked up, so a disallowed or garbage token never causes a fetch.
    pub async fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<VerifiedToken, TokenError> {
        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 || segments[0].is_empty() || segments[1].is_empty() {
            let err = TokenError::Malformed("expected three dot-separated segments".into());
            tracing::warn!(reason = %err, "token rejected");
            return Err(err);
        }

        let header = match jsonwebtoken::decode_header(token) {
            Ok(header) => header,
            Err(e) => {
                let err = TokenError::Malformed(format!("unreadable header: {e}"));
                tracing::warn!(reason = %err, "token rejected");
                return Err(err);
            }
        };

        let kid = header.kid.clone();
        let alg = header.alg;
        self.verify_with_header(token, header, now).await.inspect_err(|err| {
            tracing::warn!(kid = kid.as_deref().unwrap_or("-"), alg = ?alg, reason = %err, "token rejected");
        })
    }

    async fn verify_with_header(
        &self,
        token: &str,
        header: jsonwebtoken::Header,
        now: DateTime<Utc>,
    ) -> Result<VerifiedToken, TokenError> {
        if !self.settings.algorithms.contains(&header.alg) {
            return Err(TokenError::AlgorithmNotAllowed(header.alg));
        }

        let kid = header.kid.filter(|kid| !kid.is_empty()).ok_or(TokenError::MissingKeyId)?;
        let key = self.resolver.resolve(&kid).await?;

        if KeyFamily::of(header.alg) != Some(key.family()) {
            return Err(TokenError::BadSignature);
        }
        if !key.accepts(header.alg) {
            return Err(TokenError::AlgorithmMismatch);
        }

        let mut validation = Validation::new(header.alg);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let decoded = jsonwebtoken::decode::<Map<String, Value>>(token, key.decoding_key(), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => TokenError::BadSignature,
                ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                    TokenError::AlgorithmMismatch
                }
                ErrorKind::InvalidToken
                | ErrorKind::Base64(_)
                | ErrorKind::Json(_)
                | ErrorKind::Utf8(_) => TokenError::Malformed(e.to_string()),
                _ => TokenError::BadSignature,
            })?;

        let claims = TokenClaims::from_raw(decoded.claims, &self.rules)?;
        validate_claims(&claims, &self.settings.expectations(), now)?;

        let permissions = claims.effective_permissions();
        Ok(VerifiedToken {
            claims,
            permissions,
            key_id: kid,
            algorithm: header.alg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, StaticKeySource};
    use serde_json::json;

    fn settings(algorithms: Vec<Algorithm>) -> VerifierSettings {
        VerifierSettings {
            issuer: testing::ISSUER.into(),
            audience: testing::AUDIENCE.into(),
            clock_skew: Duration::seconds(10),
            algorithms,
        }
    }

    fn verifier_over(source: &Arc<StaticKeySource>) -> TokenVerifier {
        let resolver = Arc::new(KeyResolver::new(source.clone()));
        TokenVerifier::new(resolver, settings(vec![Algorithm::RS256]))
    }

    #[tokio::test]
    async fn valid_token_yields_claims_and_permissions() {
        let source = StaticKeySource::shared(vec![testing::jwk_a()]);
        let verifier = verifier_over(&source);
        let token = testing::mint(
            &testing::valid_claims(&["Historial.Read"]),
            testing::KID_A,
            testing::KEY_A_PEM,
        );

        let verified = verifier.verify(&token, Utc::now()).await.unwrap();
        assert_eq!(verified.key_id, testing::KID_A);
        assert_eq!(verified.algorithm, Algorithm::RS256);
        assert!(verified.permissions.contains_str("historial.read"));

        let identity = verified.identity();
        assert_eq!(identity.user_id, "user-123");
        assert_eq!(identity.issuer, testing::ISSUER);
        assert_eq!(identity.subject, "user-123");
    }

    #[tokio::test]
    async fn unknown_kid_is_rejected_after_one_refresh() {
        let source = StaticKeySource::shared(vec![testing::jwk_a()]);
        let verifier = verifier_over(&source);
        verifier.resolver().prime().await;

        let token = testing::mint(&testing::valid_claims(&[]), testing::KID_B, testing::KEY_B_PEM);
        let err = verifier.verify(&token, Utc::now()).await.unwrap_err();

        assert_eq!(err, TokenError::UnknownKey(testing::KID_B.into()));
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn wrong_key_under_known_kid_does_not_refresh() {
        let source = StaticKeySource::shared(vec![testing::jwk_a()]);
        let verifier = verifier_over(&source);
        verifier.resolver().prime().await;

        let token = testing::mint(&testing::valid_claims(&[]), testing::KID_A, testing::KEY_B_PEM);
        let err = verifier.verify(&token, Utc::now()).await.unwrap_err();

        assert_eq!(err, TokenError::BadSignature);
        assert_eq!(source.fetch_count(), 1);
    }

    #[tokio::test]
    async fn tampered_payload_fails_signature_check() {
        let source = StaticKeySource::shared(vec![testing::jwk_a()]);
        let verifier = verifier_over(&source);

        let honest = testing::mint(&testing::valid_claims(&[]), testing::KID_A, testing::KEY_A_PEM);
        let elevated = testing::mint(&testing::valid_claims(&["admin"]), testing::KID_A, testing::KEY_A_PEM);

        let honest: Vec<&str> = honest.split('.').collect();
        let elevated: Vec<&str> = elevated.split('.').collect();
        let forged = format!("{}.{}.{}", honest[0], elevated[1], honest[2]);

        assert_eq!(verifier.verify(&forged, Utc::now()).await.unwrap_err(), TokenError::BadSignature);
    }

    #[tokio::test]
    async fn disallowed_algorithm_is_rejected_before_fetching_keys() {
        let source = StaticKeySource::shared(vec![testing::jwk_a()]);
        let verifier = verifier_over(&source);
        let token = testing::mint_with(
            &testing::valid_claims(&[]),
            Some(testing::KID_A),
            Algorithm::RS384,
            testing::KEY_A_PEM,
        );

        assert_eq!(
            verifier.verify(&token, Utc::now()).await.unwrap_err(),
            TokenError::AlgorithmNotAllowed(Algorithm::RS384)
        );
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn header_algorithm_must_match_the_key() {
        let source = StaticKeySource::shared(vec![testing::jwk_a()]);
        let resolver = Arc::new(KeyResolver::new(source.clone()));
        let verifier = TokenVerifier::new(resolver, settings(vec![Algorithm::RS256, Algorithm::RS384]));

        // Key A declares RS256.
        let token = testing::mint_with(
            &testing::valid_claims(&[]),
            Some(testing::KID_A),
            Algorithm::RS384,
            testing::KEY_A_PEM,
        );
        assert_eq!(
            verifier.verify(&token, Utc::now()).await.unwrap_err(),
            TokenError::AlgorithmMismatch
        );
    }

    #[tokio::test]
    async fn structural_problems_are_malformed() {
        let source = StaticKeySource::shared(vec![testing::jwk_a()]);
        let verifier = verifier_over(&source);

        for token in ["", "abc", "a.b", "a.b.c.d", "..sig", "%%%.e30.sig"] {
            let err = verifier.verify(token, Utc::now()).await.unwrap_err();
            assert!(matches!(err, TokenError::Malformed(_)), "{token:?} gave {err:?}");
        }

        // {"alg":"none","typ":"JWT"} . {} . <empty>
        let unsigned = "eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.e30.";
        assert!(matches!(
            verifier.verify(unsigned, Utc::now()).await.unwrap_err(),
            TokenError::Malformed(_)
        ));
        assert_eq!(source.fetch_count(), 0);
    }

    #[tokio::test]
    async fn token_without_kid_is_rejected() {
        let source = StaticKeySource::shared(vec![testing::jwk_a()]);
        let verifier = verifier_over(&source);
        let token = testing::mint_with(&testing::valid_claims(&[]), None, Algorithm::RS256, testing::KEY_A_PEM);

        assert_eq!(verifier.verify(&token, Utc::now()).await.unwrap_err(), TokenError::MissingKeyId);
    }

    #[tokio::test]
    async fn claim_checks_run_after_the_signature() {
        let source = StaticKeySource::shared(vec![testing::jwk_a()]);
        let verifier = verifier_over(&source);
        let now = Utc::now();

        let mut expired = testing::valid_claims(&[]);
        expired["exp"] = json!(now.timestamp() - 60);
        let token = testing::mint(&expired, testing::KID_A, testing::KEY_A_PEM);
        assert_eq!(
            verifier.verify(&token, now).await.unwrap_err(),
            TokenError::Validation(TokenValidationError::Expired)
        );

        let mut foreign = testing::valid_claims(&[]);
        foreign["aud"] = json!("someone-else");
        let token = testing::mint(&foreign, testing::KID_A, testing::KEY_A_PEM);
        assert_eq!(
            verifier.verify(&token, now).await.unwrap_err(),
            TokenError::Validation(TokenValidationError::BadAudience)
        );

        let mut no_iat = testing::valid_claims(&[]);
        no_iat.as_object_mut().unwrap().remove("iat");
        let token = testing::mint(&no_iat, testing::KID_A, testing::KEY_A_PEM);
        assert_eq!(
            verifier.verify(&token, now).await.unwrap_err(),
            TokenError::Claims(ClaimsError::Missing("iat"))
        );
    }

    #[tokio::test]
    async fn key_source_outage_maps_to_upstream_failure() {
        let source = StaticKeySource::shared(vec![testing::jwk_a()]);
        source.fail_with(Some(FetchError::Timeout));
        let verifier = verifier_over(&source);
        let token = testing::mint(&testing::valid_claims(&[]), testing::KID_A, testing::KEY_A_PEM);

        let err = verifier.verify(&token, Utc::now()).await.unwrap_err();
        assert_eq!(err, TokenError::KeySource(FetchError::Timeout));

        let admission: AdmissionError = err.into();
        assert_eq!(admission.status_code(), 502);

        let admission: AdmissionError = TokenError::BadSignature.into();
        assert_eq!(admission.status_code(), 401);
    }
}
