//! Relaying admitted requests to backends.

use std::time::Duration;

use axum::body::Bytes;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tollgate_core::AdmissionError;
use tollgate_core::trust::is_gateway_asserted;

use crate::context::TrustedForwardContext;

/// Hop-by-hop headers (RFC 9110 §7.6.1) plus the ones recomputed per hop.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Caller credentials that must not reach a backend.
const CALLER_CREDENTIALS: &[&str] = &["authorization", "x-forwarded-authorization"];

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream request timed out")]
    Timeout,

    #[error("upstream request failed: {0}")]
    Transport(String),

    #[error("cannot carry '{0}' in a header")]
    InvalidHeader(&'static str),
}

impl From<reqwest::Error> for ForwardError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ForwardError::Timeout
        } else {
            ForwardError::Transport(err.to_string())
        }
    }
}

impl From<ForwardError> for AdmissionError {
    fn from(err: ForwardError) -> Self {
        match err {
            ForwardError::InvalidHeader(_) => AdmissionError::malformed(err.to_string()),
            other => AdmissionError::upstream(other.to_string()),
        }
    }
}

/// Forwards admitted requests and relays the backend's answer.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    also_strip: Vec<HeaderName>,
}

impl Forwarder {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            also_strip: Vec::new(),
        }
    }

    /// Strip `name` from every forwarded request too.
    pub fn also_strip(mut self, name: HeaderName) -> Self {
        self.also_strip.push(name);
        self
    }

    /// Inbound headers minus everything a backend must not see from the
    /// caller.
    pub fn sanitize(&self, inbound: &HeaderMap) -> HeaderMap {
        let named_by_connection: Vec<String> = inbound
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(|name| name.trim().to_ascii_lowercase())
            .filter(|name| !name.is_empty())
            .collect();

        let mut out = HeaderMap::with_capacity(inbound.len());
        for (name, value) in inbound {
            let name_str = name.as_str();
            let dropped = HOP_BY_HOP.contains(&name_str)
                || CALLER_CREDENTIALS.contains(&name_str)
                || is_gateway_asserted(name_str)
                || named_by_connection.iter().any(|n| n == name_str)
                || self.also_strip.contains(name);
            if !dropped {
                out.append(name.clone(), value.clone());
            }
        }
        out
    }

    /// Send `body` to `url` with sanitized inbound headers plus the
    /// context's trust headers, and relay the answer.
    ///
    /// Backend status codes are relayed as-is; only transport failures and
    /// timeouts are errors.
    pub async fn forward(
        &self,
        method: Method,
        url: &str,
        inbound: &HeaderMap,
        body: Bytes,
        context: &TrustedForwardContext,
    ) -> Result<Response, ForwardError> {
        let mut headers = self.sanitize(inbound);
        let trust = context.trust_headers().map_err(ForwardError::InvalidHeader)?;
        for (name, value) in &trust {
            headers.insert(name.clone(), value.clone());
        }

        let upstream = self
            .client
            .request(method, url)
            .headers(headers)
            .body(body)
            .send()
            .await?;

        let status = upstream.status();
        let content_type = upstream
            .headers()
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));
        let location = upstream.headers().get(header::LOCATION).cloned();
        let body = upstream.bytes().await?;

        tracing::info!(
            request_id = %context.request_id(),
            lane = %context.marker(),
            status = status.as_u16(),
            bytes = body.len(),
            "upstream responded"
        );

        Ok(relay(status, content_type, location, body))
    }
}

fn relay(status: StatusCode, content_type: HeaderValue, location: Option<HeaderValue>, body: Bytes) -> Response {
    let mut response = (status, body).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, content_type);
    if let Some(location) = location {
        headers.insert(header::LOCATION, location);
    }
    response
}
