use axum::http::{HeaderMap, HeaderName, HeaderValue, header};
use tollgate_core::trust::{AUTH_ISSUER_HEADER, AUTH_SUBJECT_HEADER, REQUEST_ID_HEADER, USER_ID_HEADER};
use tollgate_core::{Identity, RequestId, TrustMarker};

/// What a lane established about a request, and nothing else.
///
/// Created fresh by whichever lane admitted the request; the forwarder
/// derives every trust header from this value, never from inbound headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedForwardContext {
    request_id: RequestId,
    marker: TrustMarker,
    identity: Option<Identity>,
    upstream_credential: Option<String>,
}

impl TrustedForwardContext {
    /// Context for a request admitted by the token lane.
    pub fn token(request_id: RequestId, identity: Identity) -> Self {
        Self {
            request_id,
            marker: TrustMarker::Token,
            identity: Some(identity),
            upstream_credential: None,
        }
    }

    /// Context for a request admitted by the integrity lane.
    pub fn integrity(request_id: RequestId) -> Self {
        Self {
            request_id,
            marker: TrustMarker::Integrity,
            identity: None,
            upstream_credential: None,
        }
    }

    pub fn with_credential(mut self, credential: String) -> Self {
        self.upstream_credential = Some(credential);
        self
    }

    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn marker(&self) -> TrustMarker {
        self.marker
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// Headers to add to the outbound request.
    ///
    /// Fails only if a claim value cannot be carried in a header.
    pub fn trust_headers(&self) -> Result<HeaderMap, &'static str> {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static(self.marker.header_name()),
            HeaderValue::from_static("true"),
        );
        headers.insert(
            HeaderName::from_static(REQUEST_ID_HEADER),
            value(&self.request_id.to_string(), REQUEST_ID_HEADER)?,
        );

        if let Some(identity) = &self.identity {
            headers.insert(
                HeaderName::from_static(USER_ID_HEADER),
                value(&identity.user_id, USER_ID_HEADER)?,
            );
            headers.insert(
                HeaderName::from_static(AUTH_ISSUER_HEADER),
                value(&identity.issuer, AUTH_ISSUER_HEADER)?,
            );
            headers.insert(
                HeaderName::from_static(AUTH_SUBJECT_HEADER),
                value(&identity.subject, AUTH_SUBJECT_HEADER)?,
            );
        }

        if let Some(credential) = &self.upstream_credential {
            let mut bearer = value(&format!("Bearer {credential}"), "authorization")?;
            bearer.set_sensitive(true);
            headers.insert(header::AUTHORIZATION, bearer);
        }

        Ok(headers)
    }
}

fn value(raw: &str, name: &'static str) -> Result<HeaderValue, &'static str> {
    HeaderValue::from_bytes(raw.as_bytes()).map_err(|_| name)
}
