//! HTTP application wiring (Axum router + lane wiring).
//!
//! This folder is structured like:
//! - `mod.rs`: shared state and the router
//! - `routes/`: HTTP handlers (system endpoints, lane relays)
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::HeaderName,
    routing::{any, get, post},
};
use tower::ServiceBuilder;

use tollgate_auth::{AccessPolicy, HttpKeySetSource, KeyResolver, KeySetSource, TokenVerifier, VerifierSettings};
use tollgate_integrity::IntegrityVerifier;

use crate::config::{ConfigError, GatewayConfig, UpstreamAuth};
use crate::credentials::{CredentialProvider, MetadataServerCredentials};
use crate::forward::Forwarder;
use crate::middleware;

pub mod errors;
pub mod routes;

/// Token lane: bearer verification, policy, relay.
pub struct TokenLane {
    pub verifier: TokenVerifier,
    pub policy: AccessPolicy,
    pub prefix: String,
    pub upstream: String,
    pub credentials: Option<Arc<dyn CredentialProvider>>,
}

/// Integrity lane: digest check, then relay or validate-only.
pub struct IntegrityLane {
    pub verifier: IntegrityVerifier,
    pub route: String,
    pub header: HeaderName,
    pub upstream: Option<String>,
    pub forward_path: String,
}

/// State shared by every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub token: Arc<TokenLane>,
    pub integrity: Arc<IntegrityLane>,
    pub forwarder: Forwarder,
    pub max_body_bytes: usize,
}

impl AppState {
    /// Wire both lanes from `config`, fetching keys from `source`.
    pub fn from_config(config: &GatewayConfig, source: Arc<dyn KeySetSource>) -> Result<Self, ConfigError> {
        let client_error = |e: reqwest::Error| ConfigError::Client(e.to_string());

        let resolver = Arc::new(KeyResolver::new(source));
        let verifier = TokenVerifier::new(
            resolver,
            VerifierSettings {
                issuer: config.token.issuer.clone(),
                audience: config.token.audience.clone(),
                clock_skew: config.token.clock_skew,
                algorithms: config.token.algorithms.clone(),
            },
        );
        let policy = AccessPolicy::new(config.token.required_permission.clone())
            .with_superusers(config.token.superuser_roles.iter().cloned());

        let credentials: Option<Arc<dyn CredentialProvider>> = match &config.token.upstream_auth {
            UpstreamAuth::None => None,
            UpstreamAuth::Metadata { base_url, audience } => Some(Arc::new(
                MetadataServerCredentials::new(base_url.clone(), audience.clone(), config.http_timeout)
                    .map_err(client_error)?,
            )),
        };

        let header = HeaderName::from_bytes(config.integrity.header.as_bytes()).map_err(|_| {
            ConfigError::Invalid {
                var: "TOLLGATE_INTEGRITY_HEADER",
                reason: format!("'{}' is not a header name", config.integrity.header),
            }
        })?;

        let forwarder = Forwarder::new(config.http_timeout)
            .map_err(client_error)?
            .also_strip(header.clone());

        Ok(Self {
            token: Arc::new(TokenLane {
                verifier,
                policy,
                prefix: config.token.prefix.clone(),
                upstream: config.token.upstream.clone(),
                credentials,
            }),
            integrity: Arc::new(IntegrityLane {
                verifier: IntegrityVerifier::new(config.integrity.algorithm, config.integrity.fallback),
                route: config.integrity.route.clone(),
                header,
                upstream: config.integrity.upstream.clone(),
                forward_path: config.integrity.forward_path.clone(),
            }),
            forwarder,
            max_body_bytes: config.max_body_bytes,
        })
    }

    pub fn resolver(&self) -> &Arc<KeyResolver> {
        self.token.verifier.resolver()
    }
}

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Primes the key cache before returning; a failed prime is logged and the
/// first request retries it.
pub async fn build_app(config: &GatewayConfig) -> Result<Router, ConfigError> {
    let source = HttpKeySetSource::new(config.token.jwks_url.clone(), config.jwks_timeout)
        .map_err(|e| ConfigError::Client(e.to_string()))?;
    let state = AppState::from_config(config, Arc::new(source))?;
    state.resolver().prime().await;
    Ok(router(state))
}

pub fn router(state: AppState) -> Router {
    let token_routes = Router::new()
        .route(&format!("{}/*rest", state.token.prefix), any(routes::relay::token_lane))
        .route_layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::token_admission,
        ));

    Router::new()
        .route("/health", get(routes::system::health))
        .route("/_debug/jwks", get(routes::system::debug_jwks))
        .route(&state.integrity.route, post(routes::relay::integrity_lane))
        .merge(token_routes)
        .layer(
            ServiceBuilder::new()
                .layer(axum::middleware::from_fn(middleware::admission_context))
                .layer(DefaultBodyLimit::max(state.max_body_bytes)),
        )
        .with_state(state)
}
