//! Trust-marker contract between the gateway and its backends.
//!
//! The gateway is the only party allowed to set these headers. It strips
//! every one of them from inbound requests before admission runs and injects
//! them again only after a lane has verified the request. Backends apply
//! [`marker_asserted`] independently so the contract holds even if the
//! gateway is bypassed.

use serde::{Deserialize, Serialize};

pub const AUTH_VALIDATED_HEADER: &str = "x-auth-validated";
pub const INTEGRITY_VALIDATED_HEADER: &str = "x-integrity-validated";
pub const USER_ID_HEADER: &str = "x-user-id";
pub const AUTH_ISSUER_HEADER: &str = "x-auth-iss";
pub const AUTH_SUBJECT_HEADER: &str = "x-auth-subject";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Every header the gateway asserts on its own authority (lower-case).
pub const GATEWAY_ASSERTED_HEADERS: &[&str] = &[
    AUTH_VALIDATED_HEADER,
    INTEGRITY_VALIDATED_HEADER,
    USER_ID_HEADER,
    AUTH_ISSUER_HEADER,
    AUTH_SUBJECT_HEADER,
    REQUEST_ID_HEADER,
];

/// Which admission mechanism vouched for a request.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustMarker {
    /// Bearer token verified and policy allowed.
    Token,
    /// Body digest matched the declared one.
    Integrity,
}

impl TrustMarker {
    /// Header carrying the boolean "validated" flag for this marker.
    pub fn header_name(&self) -> &'static str {
        match self {
            TrustMarker::Token => AUTH_VALIDATED_HEADER,
            TrustMarker::Integrity => INTEGRITY_VALIDATED_HEADER,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TrustMarker::Token => "token",
            TrustMarker::Integrity => "integrity",
        }
    }
}

impl core::fmt::Display for TrustMarker {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity established by a verified token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user identifier forwarded as `X-User-Id`.
    pub user_id: String,
    pub issuer: String,
    pub subject: String,
}

/// Whether `name` is one of the headers only the gateway may set.
pub fn is_gateway_asserted(name: &str) -> bool {
    GATEWAY_ASSERTED_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Backend-side check of a trust-marker header value.
///
/// Only a case-insensitive `true` counts; absence or anything else is
/// unauthenticated.
pub fn marker_asserted(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}
