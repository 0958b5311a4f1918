use axum::{Json, extract::State};
use serde_json::{Value, json};

use crate::app::AppState;

pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let settings = state.token.verifier.settings();
    Json(json!({
        "status": "ok",
        "issuer": settings.issuer,
        "audience": settings.audience,
        "jwks_url": state.resolver().source(),
    }))
}

/// Cached signing key ids. Never touches the network.
pub async fn debug_jwks(State(state): State<AppState>) -> Json<Value> {
    let (kids, fetched_at) = state.resolver().cached_key_ids();
    Json(json!({
        "kids": kids,
        "fetched_at": fetched_at.map(|at| at.to_rfc3339()),
        "source": state.resolver().source(),
    }))
}
