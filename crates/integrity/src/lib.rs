//! `tollgate-integrity`: request body integrity checks.
//!
//! Pure functions over bytes: no IO, no HTTP types.

pub mod canonical;
pub mod digest;
pub mod verify;

pub use canonical::{CanonicalError, CanonicalFallback, canonicalize, canonicalize_strict, is_json_media_type};
pub use digest::{DigestAlgorithm, DigestError, ExpectedDigest};
pub use verify::{IntegrityEnvelope, IntegrityError, IntegrityVerifier};
