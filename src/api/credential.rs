//! Capability token endpoint

use std::sync::Arc;

use serde::Deserialize;

use super::{send, ApiClient, ApiError};
use crate::telephony::Credential;

/// Source of fresh capability credentials. Called on every (re)initialize.
#[async_trait::async_trait]
pub trait CredentialSource: Send + Sync {
    async fn fetch(&self) -> Result<Credential, ApiError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    identity: Option<String>,
}

/// `GET {base}{path}` returning `{ "token": ..., "identity": ... }`.
pub struct HttpCredentialSource {
    client: Arc<ApiClient>,
    path: String,
}

impl HttpCredentialSource {
    pub fn new(client: Arc<ApiClient>, path: impl Into<String>) -> Self {
        Self {
            client,
            path: path.into(),
        }
    }
}

#[async_trait::async_trait]
impl CredentialSource for HttpCredentialSource {
    async fn fetch(&self) -> Result<Credential, ApiError> {
        let response = send(self.client.get(&self.path)?).await?;
        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::ParseError(e.to_string()))?;

        let credential = Credential::new(body.token.unwrap_or_default());
        if credential.is_empty() {
            return Err(ApiError::EmptyCredential);
        }

        log::info!(
            "Fetched phone credential (identity={})",
            body.identity.as_deref().unwrap_or("unknown")
        );
        Ok(credential)
    }
}
