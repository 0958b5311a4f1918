use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::{Value, json};

use tollgate_core::AdmissionError;

/// Render an admission failure as the gateway's JSON error body.
///
/// Token failures are collapsed to one public detail; the specific reason
/// only goes to the log.
pub fn admission_error_to_response(err: &AdmissionError) -> axum::response::Response {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = json!({
        "error": err.kind(),
        "detail": err.public_detail(),
    });

    match err {
        AdmissionError::PermissionDenied { required } => {
            body["required"] = json!(required);
        }
        AdmissionError::IntegrityMismatch { expected, computed } => {
            body["expected"] = Value::String(expected.clone());
            body["actual"] = Value::String(computed.clone());
        }
        _ => {}
    }

    (status, axum::Json(body)).into_response()
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    detail: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "detail": detail.into(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_of(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn token_failures_do_not_leak_the_reason() {
        let response = admission_error_to_response(&AdmissionError::invalid_token("issuer does not match"));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_of(response).await;
        assert_eq!(body["error"], "invalid_token");
        assert_eq!(body["detail"], "bearer token rejected");
    }

    #[tokio::test]
    async fn denial_names_the_required_permission() {
        let response = admission_error_to_response(&AdmissionError::PermissionDenied {
            required: vec!["historial.read".into()],
        });
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_of(response).await;
        assert_eq!(body["error"], "permission_denied");
        assert_eq!(body["required"], json!(["historial.read"]));
    }

    #[tokio::test]
    async fn integrity_mismatch_reports_both_digests() {
        let response = admission_error_to_response(&AdmissionError::IntegrityMismatch {
            expected: "aa".into(),
            computed: "bb".into(),
        });
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_of(response).await;
        assert_eq!(body["expected"], "aa");
        assert_eq!(body["actual"], "bb");
    }
}
