use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DigestError {
    #[error("unsupported digest algorithm '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("integrity digest is empty")]
    Empty,

    #[error("digest declared as '{declared}' but this route verifies {configured}")]
    AlgorithmMismatch {
        declared: String,
        configured: DigestAlgorithm,
    },
}

/// Digest algorithms the integrity lane can verify.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum DigestAlgorithm {
    #[default]
    Sha256,
}

impl DigestAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
        }
    }

    /// Lower-case hex digest of `bytes`.
    pub fn hex_digest(&self, bytes: &[u8]) -> String {
        match self {
            DigestAlgorithm::Sha256 => hex::encode(Sha256::digest(bytes)),
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(DigestAlgorithm::Sha256),
            _ => Err(DigestError::UnsupportedAlgorithm(s.trim().to_string())),
        }
    }
}

impl core::fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Digest declared by the caller, from a header shaped `<alg>=<hex>` or a
/// bare `<hex>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedDigest {
    label: Option<String>,
    hex: String,
}

impl ExpectedDigest {
    /// Parse a header value. Only the part after the first `=` is the digest;
    /// it is trimmed and lower-cased.
    pub fn parse(header: &str) -> Result<Self, DigestError> {
        let (label, digest) = match header.split_once('=') {
            Some((label, digest)) => {
                let label = label.trim();
                ((!label.is_empty()).then(|| label.to_string()), digest)
            }
            None => (None, header),
        };

        let hex = digest.trim().to_ascii_lowercase();
        if hex.is_empty() {
            return Err(DigestError::Empty);
        }
        Ok(Self { label, hex })
    }

    /// The algorithm prefix as sent, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Reject a prefix that names another algorithm than `configured`.
    pub fn check_label(&self, configured: DigestAlgorithm) -> Result<(), DigestError> {
        match self.label.as_deref() {
            None => Ok(()),
            Some(label) => match label.parse::<DigestAlgorithm>() {
                Ok(declared) if declared == configured => Ok(()),
                _ => Err(DigestError::AlgorithmMismatch {
                    declared: label.to_string(),
                    configured,
                }),
            },
        }
    }
}
