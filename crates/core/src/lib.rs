//! `tollgate-core`: admission primitives shared by every gateway lane.
//!
//! This crate is intentionally decoupled from HTTP and from any particular
//! verification mechanism.

pub mod error;
pub mod id;
pub mod trust;

pub use error::{AdmissionError, AdmissionResult};
pub use id::RequestId;
pub use trust::{Identity, TrustMarker};
