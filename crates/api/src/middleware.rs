use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use tracing::Instrument;

use tollgate_core::trust::is_gateway_asserted;
use tollgate_core::{AdmissionError, AdmissionResult, RequestId};

use crate::app::AppState;
use crate::app::errors::admission_error_to_response;
use crate::context::TrustedForwardContext;

/// Runs on every route before anything else: drops caller-supplied trust
/// headers, mints the request id and opens the request span.
///
/// Paths with dot segments are refused here, before any lane sees them, so
/// a relayed path can never resolve outside the route it was admitted on.
pub async fn admission_context(mut req: Request, next: Next) -> Response {
    if has_dot_segment(req.uri().path()) {
        return reject(AdmissionError::malformed("request path contains dot segments"));
    }
    let spoofed = strip_gateway_headers(req.headers_mut());

    let request_id = RequestId::new();
    req.extensions_mut().insert(request_id);

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %req.method(),
        path = %req.uri().path(),
        lane = tracing::field::Empty,
    );
    if spoofed > 0 {
        span.in_scope(|| tracing::warn!(headers = spoofed, "stripped caller-supplied trust headers"));
    }

    next.run(req).instrument(span).await
}

/// Whether any segment of `path` is `.` or `..`, including percent-encoded
/// dots and segments split by an encoded slash or a backslash.
pub fn has_dot_segment(path: &str) -> bool {
    let decoded = path
        .to_ascii_lowercase()
        .replace("%2e", ".")
        .replace("%2f", "/")
        .replace("%5c", "/")
        .replace('\\', "/");
    decoded.split('/').any(|segment| segment == "." || segment == "..")
}

/// Remove every gateway-asserted header. Returns how many were present.
pub fn strip_gateway_headers(headers: &mut HeaderMap) -> usize {
    let spoofed: Vec<_> = headers
        .keys()
        .filter(|name| is_gateway_asserted(name.as_str()))
        .cloned()
        .collect();
    for name in &spoofed {
        headers.remove(name);
    }
    spoofed.len()
}

/// Token lane admission: bearer → verify → decide.
///
/// On success the request continues with a [`TrustedForwardContext`] in its
/// extensions.
pub async fn token_admission(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    tracing::Span::current().record("lane", "token");
    let request_id = req.extensions().get::<RequestId>().copied().unwrap_or_default();
    let lane = &state.token;

    let token = extract_bearer(req.headers()).map_err(reject)?.to_string();

    let verified = lane
        .verifier
        .verify(&token, Utc::now())
        .await
        .map_err(|e| reject(e.into()))?;

    let grant = match lane.policy.decide(&verified.permissions) {
        Ok(grant) => grant,
        Err(denied) => {
            tracing::debug!(explanation = ?lane.policy.explain(&verified.permissions), "policy denied");
            return Err(reject(denied.into()));
        }
    };

    let identity = verified.identity();
    tracing::info!(
        user_id = %identity.user_id,
        kid = %verified.key_id,
        grant = ?grant,
        "token admitted"
    );

    req.extensions_mut()
        .insert(TrustedForwardContext::token(request_id, identity));
    Ok(next.run(req).await)
}

/// Log a rejection with its specific reason and render the public response.
pub fn reject(err: AdmissionError) -> Response {
    match &err {
        AdmissionError::UpstreamUnavailable(_) | AdmissionError::CredentialUnavailable(_) => {
            tracing::error!(error = %err, "admission failed on a collaborator")
        }
        _ => tracing::warn!(error = %err, status = err.status_code(), "request rejected"),
    }
    admission_error_to_response(&err)
}

/// Bearer token from `X-Forwarded-Authorization` or `Authorization`.
///
/// A fronting API gateway may move the caller's header to
/// `X-Forwarded-Authorization`, so that one wins.
pub fn extract_bearer(headers: &HeaderMap) -> AdmissionResult<&str> {
    for name in ["x-forwarded-authorization", "authorization"] {
        let Some(value) = headers.get(name) else {
            continue;
        };
        let Ok(value) = value.to_str() else {
            continue;
        };
        let Some((scheme, token)) = value.trim().split_once(' ') else {
            continue;
        };
        if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
            return Ok(token.trim());
        }
    }
    Err(AdmissionError::malformed("missing bearer token"))
}
