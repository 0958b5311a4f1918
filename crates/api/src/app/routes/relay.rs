//! Lane handlers: everything after admission up to the backend's answer.

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{State, rejection::BytesRejection},
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde_json::json;

use tollgate_core::{AdmissionError, RequestId};

use crate::app::AppState;
use crate::app::errors::json_error;
use crate::context::TrustedForwardContext;
use crate::middleware::reject;

/// Relay a request the token lane admitted, preserving method, path and
/// query.
pub async fn token_lane(
    State(state): State<AppState>,
    Extension(context): Extension<TrustedForwardContext>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match read_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let lane = &state.token;

    let context = match &lane.credentials {
        Some(provider) => match provider.credential().await {
            Ok(credential) => {
                tracing::debug!(audience = provider.audience(), "minted upstream credential");
                context.with_credential(credential)
            }
            Err(err) => return reject(err.into()),
        },
        None => context,
    };

    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path());
    let url = format!("{}{}", lane.upstream, path_and_query);

    match state.forwarder.forward(method, &url, &headers, body, &context).await {
        Ok(response) => response,
        Err(err) => reject(err.into()),
    }
}

/// Check the body digest, then forward or answer validate-only.
pub async fn integrity_lane(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    tracing::Span::current().record("lane", "integrity");
    let body = match read_body(body) {
        Ok(body) => body,
        Err(response) => return response,
    };
    let lane = &state.integrity;

    let Some(declared) = headers.get(&lane.header) else {
        return reject(AdmissionError::malformed(format!("missing {} header", lane.header)));
    };
    let Ok(declared) = declared.to_str() else {
        return reject(AdmissionError::malformed(format!("unreadable {} header", lane.header)));
    };
    let content_type = headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok());

    let envelope = match lane.verifier.check(&body, content_type, declared) {
        Ok(envelope) => envelope,
        Err(err) => return reject(err.into()),
    };
    tracing::info!(
        algorithm = %envelope.algorithm,
        digest = %envelope.computed,
        canonical_bytes = envelope.canonical.len(),
        "integrity verified"
    );

    let Some(upstream) = &lane.upstream else {
        return (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "note": "validated only; no integrity upstream configured",
            })),
        )
            .into_response();
    };

    let url = format!("{upstream}{}", lane.forward_path);
    let context = TrustedForwardContext::integrity(request_id);
    match state
        .forwarder
        .forward(Method::POST, &url, &headers, body, &context)
        .await
    {
        Ok(response) => response,
        Err(err) => reject(err.into()),
    }
}

/// Over-limit or unreadable bodies, rendered like every other rejection.
fn read_body(body: Result<Bytes, BytesRejection>) -> Result<Bytes, Response> {
    body.map_err(|rejection| {
        let status = rejection.status();
        tracing::warn!(status = status.as_u16(), "request body rejected");
        let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
            "payload_too_large"
        } else {
            "malformed_request"
        };
        json_error(status, code, rejection.body_text())
    })
}
