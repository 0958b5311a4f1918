//! Outbound service credentials for privately networked backends.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tollgate_core::AdmissionError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential request timed out")]
    Timeout,

    #[error("credential request failed: {0}")]
    Transport(String),

    #[error("identity provider returned status {0}")]
    Status(u16),

    #[error("identity provider returned an empty credential")]
    Empty,
}

impl From<CredentialError> for AdmissionError {
    fn from(err: CredentialError) -> Self {
        AdmissionError::CredentialUnavailable(err.to_string())
    }
}

/// Mints short-lived bearer credentials the gateway presents to a backend.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self) -> Result<String, CredentialError>;

    /// Audience the minted credential is scoped to.
    fn audience(&self) -> &str;
}

/// Identity tokens from the cloud metadata server of the host the gateway
/// runs on.
#[derive(Debug, Clone)]
pub struct MetadataServerCredentials {
    client: reqwest::Client,
    base_url: String,
    audience: String,
}

const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";

impl MetadataServerCredentials {
    pub fn new(
        base_url: impl Into<String>,
        audience: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            audience: audience.into(),
        })
    }
}

#[async_trait]
impl CredentialProvider for MetadataServerCredentials {
    async fn credential(&self) -> Result<String, CredentialError> {
        let response = self
            .client
            .get(format!("{}{IDENTITY_PATH}", self.base_url))
            .query(&[("audience", self.audience.as_str())])
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CredentialError::Timeout
                } else {
                    CredentialError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CredentialError::Status(status.as_u16()));
        }

        let token = response
            .text()
            .await
            .map_err(|e| CredentialError::Transport(e.to_string()))?;
        let token = token.trim();
        if token.is_empty() {
            return Err(CredentialError::Empty);
        }
        Ok(token.to_string())
    }

    fn audience(&self) -> &str {
        &self.audience
    }
}
