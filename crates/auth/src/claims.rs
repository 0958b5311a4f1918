use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::extract::{ClaimRules, Grants};
use crate::{EffectivePermissionSet, Permission, Role};

/// The `aud` claim: a single string or a list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, expected: &str) -> bool {
        match self {
            Audience::Single(aud) => aud == expected,
            Audience::Many(auds) => auds.iter().any(|aud| aud == expected),
        }
    }
}

/// Claims of a token whose signature has been verified.
///
/// Derived per request and never persisted. Time claims are checked by
/// [`validate_claims`], not on construction.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    pub issuer: Option<String>,
    pub audience: Option<Audience>,
    pub subject: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub not_before: Option<DateTime<Utc>>,
    pub roles: BTreeSet<Role>,
    pub permissions: BTreeSet<Permission>,
    /// Every claim as it appeared in the payload.
    pub raw: Map<String, Value>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimsError {
    #[error("missing required claim '{0}'")]
    Missing(&'static str),

    #[error("claim '{0}' has an invalid type or value")]
    Invalid(&'static str),
}

impl TokenClaims {
    /// Build claims from a decoded payload, running `rules` to collect roles
    /// and permissions. `exp` and `iat` are required.
    pub fn from_raw(raw: Map<String, Value>, rules: &ClaimRules) -> Result<Self, ClaimsError> {
        let expires_at = numeric_date(&raw, "exp")?.ok_or(ClaimsError::Missing("exp"))?;
        let issued_at = numeric_date(&raw, "iat")?.ok_or(ClaimsError::Missing("iat"))?;
        let not_before = numeric_date(&raw, "nbf")?;

        let issuer = optional_string(&raw, "iss")?;
        let subject = optional_string(&raw, "sub")?;
        let audience = match raw.get("aud") {
            None | Some(Value::Null) => None,
            Some(Value::String(aud)) => Some(Audience::Single(aud.clone())),
            Some(Value::Array(items)) => Some(Audience::Many(
                items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or(ClaimsError::Invalid("aud"))?,
            )),
            Some(_) => return Err(ClaimsError::Invalid("aud")),
        };

        let Grants { roles, permissions } = rules.extract(&raw);

        Ok(Self {
            issuer,
            audience,
            subject,
            issued_at,
            expires_at,
            not_before,
            roles,
            permissions,
            raw,
        })
    }

    /// Roles and explicit permissions merged into one set.
    pub fn effective_permissions(&self) -> EffectivePermissionSet {
        Grants {
            roles: self.roles.clone(),
            permissions: self.permissions.clone(),
        }
        .effective()
    }

    /// Identifier to forward as the caller's user id.
    ///
    /// First non-empty of `sub`, `preferred_username`, `email`, `client_id`,
    /// `clientId`; `"unknown"` if none is present.
    pub fn user_id(&self) -> String {
        ["sub", "preferred_username", "email", "client_id", "clientId"]
            .iter()
            .filter_map(|name| self.raw.get(*name))
            .find_map(|value| match value {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .unwrap_or_else(|| "unknown".to_string())
    }
}

fn optional_string(raw: &Map<String, Value>, name: &'static str) -> Result<Option<String>, ClaimsError> {
    match raw.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ClaimsError::Invalid(name)),
    }
}

/// RFC 7519 NumericDate: seconds since the epoch, integer or fractional.
fn numeric_date(
    raw: &Map<String, Value>,
    name: &'static str,
) -> Result<Option<DateTime<Utc>>, ClaimsError> {
    let Some(value) = raw.get(name) else {
        return Ok(None);
    };
    let secs = match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.floor() as i64)),
        _ => None,
    }
    .ok_or(ClaimsError::Invalid(name))?;

    DateTime::from_timestamp(secs, 0)
        .map(Some)
        .ok_or(ClaimsError::Invalid(name))
}

/// What a verified token must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimExpectations {
    pub issuer: String,
    pub audience: String,
    /// Tolerance applied to `exp`, `nbf` and `iat`.
    pub clock_skew: Duration,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("issuer does not match")]
    BadIssuer,

    #[error("audience does not match")]
    BadAudience,

    #[error("token has expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,
}

/// Deterministically validate claims against expectations at `now`.
///
/// Checks run in order: issuer (exact match), audience (membership), then
/// the time window. A token is live while `exp > now - skew`; `nbf` and
/// `iat` may be at most `skew` in the future.
pub fn validate_claims(
    claims: &TokenClaims,
    expected: &ClaimExpectations,
    now: DateTime<Utc>,
) -> Result<(), TokenValidationError> {
    if claims.issuer.as_deref() != Some(expected.issuer.as_str()) {
        return Err(TokenValidationError::BadIssuer);
    }

    let audience_ok = claims
        .audience
        .as_ref()
        .is_some_and(|aud| aud.contains(&expected.audience));
    if !audience_ok {
        return Err(TokenValidationError::BadAudience);
    }

    let earliest_end = now
        .checked_sub_signed(expected.clock_skew)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);
    if claims.expires_at <= earliest_end {
        return Err(TokenValidationError::Expired);
    }

    let latest_start = now
        .checked_add_signed(expected.clock_skew)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    if claims.not_before.is_some_and(|nbf| nbf > latest_start) || claims.issued_at > latest_start {
        return Err(TokenValidationError::NotYetValid);
    }

    Ok(())
}
