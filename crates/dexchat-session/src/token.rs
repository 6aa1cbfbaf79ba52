//! Transport credential issuance.
//!
//! The backend signs a short-lived credential for `(room, identity, role)`:
//! `POST {backend}/token` with `{roomId, identity, role}` returns
//! `{token, transportAppId, expiresAt}`. A 500 means the backend lacks its
//! signing credentials; a 400 means the request was missing parameters.

use std::time::Duration;

use async_trait::async_trait;
use dexchat_core::{ErrorKind, RoomId, Uid};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

const MAX_ERROR_BODY: usize = 512;

/// Role requested for the credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportRole {
    /// May publish audio.
    Publisher,
    /// Listen only.
    Subscriber,
}

/// Credential request body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    /// Channel to join.
    pub room_id: RoomId,
    /// Numeric identity.
    pub identity: Uid,
    /// Requested role.
    pub role: TransportRole,
}

/// Issued credential.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportCredential {
    /// Signed token.
    pub token: String,
    /// Transport application id the token is valid for.
    #[serde(alias = "appId")]
    pub transport_app_id: String,
    /// Expiry as unix seconds, when the backend reports it.
    #[serde(default, alias = "expirationTime")]
    pub expires_at: Option<i64>,
}

/// Credential issuance failures.
#[derive(Debug, Error)]
pub enum TokenError {
    /// The backend is missing its transport credentials.
    #[error("token service misconfigured: {0}")]
    Configuration(String),
    /// The request was rejected as incomplete or malformed.
    #[error("token request rejected: {0}")]
    Validation(String),
    /// Network fault, timeout or server error.
    #[error("token service unavailable: {0}")]
    Unavailable(String),
    /// Transport-level HTTP failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TokenError {
    /// Shared classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Unavailable(_) | Self::Http(_) => ErrorKind::TransientNetwork,
        }
    }
}

/// Issues transport credentials.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Request a credential.
    async fn issue(&self, request: &TokenRequest) -> Result<TransportCredential, TokenError>;
}

/// [`TokenService`] over the backend's HTTP API.
#[derive(Clone, Debug)]
pub struct HttpTokenService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTokenService {
    /// Service using `client` against `base_url`.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Service with its own client and request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TokenError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::new(client, base_url))
    }
}

#[async_trait]
impl TokenService for HttpTokenService {
    async fn issue(&self, request: &TokenRequest) -> Result<TransportCredential, TokenError> {
        let url = format!("{}/token", self.base_url);
        debug!(room = %request.room_id, uid = %request.identity, "requesting transport token");
        let response = self.client.post(&url).json(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        let mut body = response.text().await.unwrap_or_default();
        body.truncate(MAX_ERROR_BODY);
        Err(match status.as_u16() {
            500 => TokenError::Configuration(body),
            400..=499 => TokenError::Validation(body),
            code => TokenError::Unavailable(format!("status {code}: {body}")),
        })
    }
}
