//! Gateway configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;
use tollgate_auth::jwks::KeyFamily;
use tollgate_auth::{Algorithm, Permission, Role};
use tollgate_integrity::{CanonicalFallback, DigestAlgorithm};
use tollgate_observability::LogFormat;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),

    #[error("invalid {var}: {reason}")]
    Invalid { var: &'static str, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Upper bound on `TOLLGATE_CLOCK_SKEW_SECS` (one day).
pub const MAX_CLOCK_SKEW_SECS: i64 = 24 * 60 * 60;

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.into(),
    }
}

/// How the token lane authenticates itself to its backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamAuth {
    None,
    /// Identity token from the cloud metadata server, scoped to `audience`.
    Metadata { base_url: String, audience: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLaneConfig {
    pub jwks_url: String,
    pub issuer: String,
    pub audience: String,
    pub algorithms: Vec<Algorithm>,
    pub clock_skew: chrono::Duration,
    pub required_permission: Permission,
    pub superuser_roles: Vec<Role>,
    /// Route prefix, without a trailing slash.
    pub prefix: String,
    pub upstream: String,
    pub upstream_auth: UpstreamAuth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityLaneConfig {
    pub route: String,
    pub header: String,
    pub algorithm: DigestAlgorithm,
    /// Unset means validate-only.
    pub upstream: Option<String>,
    pub forward_path: String,
    pub fallback: CanonicalFallback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub bind: SocketAddr,
    pub token: TokenLaneConfig,
    pub integrity: IntegrityLaneConfig,
    pub http_timeout: Duration,
    pub jwks_timeout: Duration,
    pub max_body_bytes: usize,
    pub log_format: LogFormat,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let clock_skew_secs: i64 = env.parse_or("TOLLGATE_CLOCK_SKEW_SECS", 10)?;
        if !(0..=MAX_CLOCK_SKEW_SECS).contains(&clock_skew_secs) {
            return Err(invalid(
                "TOLLGATE_CLOCK_SKEW_SECS",
                format!("must be between 0 and {MAX_CLOCK_SKEW_SECS} seconds"),
            ));
        }

        let token_upstream = base_url("TOLLGATE_TOKEN_UPSTREAM", env.required("TOLLGATE_TOKEN_UPSTREAM")?)?;
        let upstream_auth = match env
            .get("TOLLGATE_UPSTREAM_AUTH")
            .unwrap_or_else(|| "none".into())
            .to_ascii_lowercase()
            .as_str()
        {
            "none" => UpstreamAuth::None,
            "metadata" | "gcp" => UpstreamAuth::Metadata {
                base_url: base_url(
                    "TOLLGATE_METADATA_URL",
                    env.get("TOLLGATE_METADATA_URL")
                        .unwrap_or_else(|| "http://metadata.google.internal".into()),
                )?,
                audience: env
                    .get("TOLLGATE_UPSTREAM_AUDIENCE")
                    .unwrap_or_else(|| token_upstream.clone()),
            },
            other => {
                return Err(invalid(
                    "TOLLGATE_UPSTREAM_AUTH",
                    format!("'{other}' (expected none|metadata)"),
                ));
            }
        };

        let token = TokenLaneConfig {
            jwks_url: env.required("TOLLGATE_JWKS_URL")?,
            issuer: env.required("TOLLGATE_JWT_ISSUER")?,
            audience: env.required("TOLLGATE_JWT_AUDIENCE")?,
            algorithms: algorithms(&env.get("TOLLGATE_JWT_ALGORITHMS").unwrap_or_else(|| "RS256".into()))?,
            clock_skew: chrono::Duration::seconds(clock_skew_secs),
            required_permission: required_permission(env.required("TOLLGATE_REQUIRED_PERMISSION")?)?,
            superuser_roles: env
                .get("TOLLGATE_SUPERUSER_ROLES")
                .map(|roles| {
                    roles
                        .split(',')
                        .map(Role::new)
                        .filter(|role| !role.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            prefix: route("TOLLGATE_TOKEN_PREFIX", env.get("TOLLGATE_TOKEN_PREFIX").unwrap_or_else(|| "/api".into()))?,
            upstream: token_upstream,
            upstream_auth,
        };

        let integrity = IntegrityLaneConfig {
            route: route(
                "TOLLGATE_INTEGRITY_ROUTE",
                env.get("TOLLGATE_INTEGRITY_ROUTE").unwrap_or_else(|| "/integrity".into()),
            )?,
            header: header_name(
                env.get("TOLLGATE_INTEGRITY_HEADER")
                    .unwrap_or_else(|| "X-Message-Integrity".into()),
            )?,
            algorithm: env
                .parse_or("TOLLGATE_INTEGRITY_ALGORITHM", DigestAlgorithm::Sha256)?,
            upstream: env
                .get("TOLLGATE_INTEGRITY_UPSTREAM")
                .map(|url| base_url("TOLLGATE_INTEGRITY_UPSTREAM", url))
                .transpose()?,
            forward_path: route(
                "TOLLGATE_INTEGRITY_FORWARD_PATH",
                env.get("TOLLGATE_INTEGRITY_FORWARD_PATH")
                    .unwrap_or_else(|| "/inventory/products".into()),
            )?,
            fallback: env.parse_or("TOLLGATE_CANONICAL_FALLBACK", CanonicalFallback::Raw)?,
        };

        if overlaps(&integrity.route, &token.prefix) || ["/health", "/_debug/jwks"].contains(&integrity.route.as_str()) {
            return Err(invalid(
                "TOLLGATE_INTEGRITY_ROUTE",
                format!("'{}' collides with another gateway route", integrity.route),
            ));
        }

        let max_body_bytes: usize = env.parse_or("TOLLGATE_MAX_BODY_BYTES", 1024 * 1024)?;
        if max_body_bytes == 0 {
            return Err(invalid("TOLLGATE_MAX_BODY_BYTES", "must be positive"));
        }

        Ok(Self {
            bind: env.parse_or("TOLLGATE_BIND", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            token,
            integrity,
            http_timeout: Duration::from_secs(env.parse_or("TOLLGATE_HTTP_TIMEOUT_SECS", 10u64)?),
            jwks_timeout: Duration::from_secs(env.parse_or("TOLLGATE_JWKS_TIMEOUT_SECS", 5u64)?),
            max_body_bytes,
            log_format: env.parse_or("TOLLGATE_LOG_FORMAT", LogFormat::Json)?,
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parse_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: core::fmt::Display,
    {
        match self.get(name) {
            Some(raw) => raw.parse().map_err(|e: T::Err| invalid(name, e.to_string())),
            None => Ok(default),
        }
    }
}

fn algorithms(raw: &str) -> Result<Vec<Algorithm>, ConfigError> {
    const VAR: &str = "TOLLGATE_JWT_ALGORITHMS";
    let mut out = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let alg = Algorithm::from_str(name)
            .or_else(|_| Algorithm::from_str(&name.to_ascii_uppercase()))
            .map_err(|_| invalid(VAR, format!("unknown algorithm '{name}'")))?;
        if KeyFamily::of(alg).is_none() {
            return Err(invalid(VAR, format!("'{name}' is symmetric; only public-key algorithms are allowed")));
        }
        if !out.contains(&alg) {
            out.push(alg);
        }
    }
    if out.is_empty() {
        return Err(invalid(VAR, "allow-list is empty"));
    }
    Ok(out)
}

fn required_permission(raw: String) -> Result<Permission, ConfigError> {
    let permission = Permission::new(raw);
    if permission.is_empty() {
        return Err(ConfigError::Missing("TOLLGATE_REQUIRED_PERMISSION"));
    }
    Ok(permission)
}

fn route(var: &'static str, raw: String) -> Result<String, ConfigError> {
    let trimmed = raw.trim_end_matches('/');
    if !trimmed.starts_with('/') {
        return Err(invalid(var, format!("'{raw}' must start with '/' and not be the root")));
    }
    if trimmed.contains(['*', ':', '{', '}', '?', '#']) {
        return Err(invalid(var, format!("'{raw}' must be a literal path")));
    }
    Ok(trimmed.to_string())
}

fn base_url(var: &'static str, raw: String) -> Result<String, ConfigError> {
    let url = reqwest::Url::parse(&raw).map_err(|e| invalid(var, format!("'{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(var, format!("'{raw}' must be an http(s) URL")));
    }
    Ok(raw.trim_end_matches('/').to_string())
}

fn header_name(raw: String) -> Result<String, ConfigError> {
    axum::http::HeaderName::from_bytes(raw.as_bytes())
        .map(|name| name.as_str().to_string())
        .map_err(|_| invalid("TOLLGATE_INTEGRITY_HEADER", format!("'{raw}' is not a header name")))
}

fn overlaps(route: &str, prefix: &str) -> bool {
    route == prefix || route.starts_with(&format!("{prefix}/"))
}
