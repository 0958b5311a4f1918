//! Admission error model.

use thiserror::Error;

/// Result type used at the admission boundary.
pub type AdmissionResult<T> = Result<T, AdmissionError>;

/// Request-level admission failure.
///
/// Every lane maps its own failures into this taxonomy. Configuration
/// problems are not represented here: they abort startup instead of failing
/// individual requests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    /// A required header or body was missing or unparseable.
    #[error("malformed request: {0}")]
    MalformedRequest(String),

    /// The bearer token failed verification.
    ///
    /// `reason` is for logs only; clients see the collapsed category.
    #[error("invalid token: {reason}")]
    InvalidToken { reason: String },

    /// The recomputed body digest differs from the declared one.
    #[error("integrity mismatch: expected {expected}, computed {computed}")]
    IntegrityMismatch { expected: String, computed: String },

    /// The token is valid but does not grant the required permission.
    #[error("permission denied: requires {required:?}")]
    PermissionDenied { required: Vec<String> },

    /// A collaborator (key-set source, backend) failed or timed out.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The outbound service credential could not be minted.
    #[error("upstream credential unavailable: {0}")]
    CredentialUnavailable(String),
}

impl AdmissionError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRequest(msg.into())
    }

    pub fn invalid_token(reason: impl Into<String>) -> Self {
        Self::InvalidToken {
            reason: reason.into(),
        }
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    /// Machine-readable kind, used as the `error` field of responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "malformed_request",
            Self::InvalidToken { .. } => "invalid_token",
            Self::IntegrityMismatch { .. } => "integrity_mismatch",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::CredentialUnavailable(_) => "upstream_auth",
        }
    }

    /// HTTP status code for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedRequest(_) => 400,
            Self::InvalidToken { .. } => 401,
            Self::IntegrityMismatch { .. } | Self::PermissionDenied { .. } => 403,
            Self::UpstreamUnavailable(_) | Self::CredentialUnavailable(_) => 502,
        }
    }

    /// Human-readable detail that is safe to hand back to the caller.
    ///
    /// Token failures collapse to one message so the response cannot be used
    /// as an oracle for which check failed.
    pub fn public_detail(&self) -> String {
        match self {
            Self::MalformedRequest(msg) => msg.clone(),
            Self::InvalidToken { .. } => "bearer token rejected".to_string(),
            Self::IntegrityMismatch { .. } => "integrity check failed".to_string(),
            Self::PermissionDenied { .. } => "forbidden: missing permission/role".to_string(),
            Self::UpstreamUnavailable(msg) => msg.clone(),
            Self::CredentialUnavailable(_) => "missing service credential for upstream".to_string(),
        }
    }
}
