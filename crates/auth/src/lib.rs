//! `tollgate-auth`: bearer token admission.
//!
//! Key resolution, token verification, claim extraction and the access
//! policy. This crate is intentionally decoupled from HTTP serving; the only
//! network it touches is the JWKS endpoint.

pub mod claims;
pub mod extract;
pub mod jwks;
pub mod permissions;
pub mod policy;
pub mod resolver;
pub mod roles;
pub mod verifier;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use claims::{Audience, ClaimExpectations, TokenClaims, TokenValidationError, validate_claims};
pub use extract::{ClaimRule, ClaimRules, ClaimSource, GrantKind, Grants};
pub use jwks::{Jwk, KeySet, SigningKey};
pub use permissions::{EffectivePermissionSet, Permission};
pub use policy::{AccessPolicy, Grant, PolicyDenied};
pub use resolver::{FetchError, HttpKeySetSource, KeyResolver, KeySetSource, ResolveError};
pub use roles::Role;
pub use verifier::{TokenError, TokenVerifier, VerifiedToken, VerifierSettings};

pub use jsonwebtoken::Algorithm;
