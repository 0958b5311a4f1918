use subtle::ConstantTimeEq;
use thiserror::Error;
use tollgate_core::AdmissionError;

use crate::canonical::{CanonicalError, CanonicalFallback, canonicalize, canonicalize_strict};
use crate::digest::{DigestAlgorithm, DigestError, ExpectedDigest};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IntegrityError {
    #[error(transparent)]
    Digest(#[from] DigestError),

    #[error(transparent)]
    Canonical(#[from] CanonicalError),

    #[error("integrity mismatch: expected {expected}, computed {computed}")]
    Mismatch { expected: String, computed: String },
}

impl From<IntegrityError> for AdmissionError {
    fn from(err: IntegrityError) -> Self {
        match err {
            IntegrityError::Mismatch { expected, computed } => {
                AdmissionError::IntegrityMismatch { expected, computed }
            }
            other => AdmissionError::malformed(other.to_string()),
        }
    }
}

/// Outcome of a passing check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityEnvelope {
    pub algorithm: DigestAlgorithm,
    pub expected: String,
    pub computed: String,
    /// The bytes the digest was computed over.
    pub canonical: Vec<u8>,
}

/// Recomputes body digests and compares them to the declared one.
///
/// Stateless: the outcome depends only on the arguments to [`check`].
///
/// [`check`]: IntegrityVerifier::check
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct IntegrityVerifier {
    algorithm: DigestAlgorithm,
    fallback: CanonicalFallback,
}

impl IntegrityVerifier {
    pub fn new(algorithm: DigestAlgorithm, fallback: CanonicalFallback) -> Self {
        Self { algorithm, fallback }
    }

    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    pub fn fallback(&self) -> CanonicalFallback {
        self.fallback
    }

    /// Check `body` against the digest header value.
    pub fn check(
        &self,
        body: &[u8],
        content_type: Option<&str>,
        digest_header: &str,
    ) -> Result<IntegrityEnvelope, IntegrityError> {
        let expected = ExpectedDigest::parse(digest_header)?;
        expected.check_label(self.algorithm)?;

        let canonical = match self.fallback {
            CanonicalFallback::Raw => canonicalize(body, content_type),
            CanonicalFallback::Reject => canonicalize_strict(body, content_type)?,
        };
        let computed = self.algorithm.hex_digest(&canonical);

        if !bool::from(computed.as_bytes().ct_eq(expected.hex().as_bytes())) {
            return Err(IntegrityError::Mismatch {
                expected: expected.hex().to_string(),
                computed,
            });
        }

        Ok(IntegrityEnvelope {
            algorithm: self.algorithm,
            expected: expected.hex().to_string(),
            computed,
            canonical: canonical.into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: Option<&str> = Some("application/json");

    fn sha256(bytes: &[u8]) -> String {
        DigestAlgorithm::Sha256.hex_digest(bytes)
    }

    #[test]
    fn reordered_json_matches_sorted_digest() {
        let declared = format!("sha256={}", sha256(br#"{"a":1,"b":2}"#));
        let envelope = IntegrityVerifier::default()
            .check(br#"{"b":2,"a":1}"#, JSON, &declared)
            .unwrap();
        assert_eq!(envelope.canonical, br#"{"a":1,"b":2}"#);
        assert_eq!(envelope.computed, envelope.expected);
    }

    #[test]
    fn uppercase_digest_with_whitespace_is_accepted() {
        let declared = format!("  {}  ", sha256(b"plain text").to_uppercase());
        assert!(IntegrityVerifier::default().check(b"plain text", Some("text/plain"), &declared).is_ok());
    }

    #[test]
    fn mismatch_reports_both_digests() {
        let declared = sha256(br#"{"a":1}"#);
        let err = IntegrityVerifier::default()
            .check(br#"{"a":2}"#, JSON, &declared)
            .unwrap_err();

        assert_eq!(
            err,
            IntegrityError::Mismatch {
                expected: declared.clone(),
                computed: sha256(br#"{"a":2}"#),
            }
        );
        let admission: AdmissionError = err.into();
        assert_eq!(admission.status_code(), 403);
    }

    #[test]
    fn altered_large_integer_fails_the_check() {
        let declared = sha256(br#"{"amount":12345678901234567890123}"#);
        let verifier = IntegrityVerifier::default();

        assert!(verifier
            .check(br#"{ "amount": 12345678901234567890123 }"#, JSON, &declared)
            .is_ok());
        let err = verifier
            .check(br#"{"amount":12345678901234567890124}"#, JSON, &declared)
            .unwrap_err();
        assert!(matches!(err, IntegrityError::Mismatch { .. }));
    }

    #[test]
    fn raw_fallback_digests_unparseable_json_as_is() {
        let body = b"{\"a\": 1,";
        let lenient = IntegrityVerifier::new(DigestAlgorithm::Sha256, CanonicalFallback::Raw);
        assert!(lenient.check(body, JSON, &sha256(body)).is_ok());

        let strict = IntegrityVerifier::new(DigestAlgorithm::Sha256, CanonicalFallback::Reject);
        let err = strict.check(body, JSON, &sha256(body)).unwrap_err();
        assert!(matches!(err, IntegrityError::Canonical(_)));
        assert_eq!(AdmissionError::from(err).status_code(), 400);
    }

    #[test]
    fn bad_headers_are_malformed_requests() {
        let verifier = IntegrityVerifier::default();

        let empty = verifier.check(b"{}", JSON, "sha256=").unwrap_err();
        assert_eq!(empty, IntegrityError::Digest(DigestError::Empty));
        assert_eq!(AdmissionError::from(empty).status_code(), 400);

        let wrong_alg = verifier.check(b"{}", JSON, &format!("md5={}", sha256(b"{}"))).unwrap_err();
        assert!(matches!(wrong_alg, IntegrityError::Digest(DigestError::AlgorithmMismatch { .. })));
    }

    #[test]
    fn check_is_deterministic() {
        let verifier = IntegrityVerifier::default();
        let declared = sha256(br#"{"x":[1,2]}"#);
        let outcomes: Vec<bool> = (0..8)
            .map(|_| verifier.check(br#"{ "x" : [1, 2] }"#, JSON, &declared).is_ok())
            .collect();
        assert!(outcomes.iter().all(|ok| *ok));
    }
}
