//! Token endpoint client.
//!
//! Refresh-token and authorization-code grants against `{base}/oauth/token`.
//! Any non-200 response is an [`ServiceError::OAuth`]; the caller decides
//! whether to re-authenticate interactively.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use whist_settings::AuthSettings;

use crate::errors::ServiceError;

/// Tokens returned by the token endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Absent when the provider does not rotate refresh tokens.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

/// Exchanges a refresh token for a new access token.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ServiceError>;
}

/// HTTP client for the auth provider's token endpoint.
#[derive(Clone, Debug)]
pub struct TokenClient {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    redirect_uri: String,
}

impl TokenClient {
    pub fn new(settings: &AuthSettings) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            token_url: format!("{}/oauth/token", settings.base_url.trim_end_matches('/')),
            client_id: settings.client_id.clone(),
            redirect_uri: settings.redirect_uri.clone(),
        })
    }

    /// Exchange an authorization code (PKCE verifier optional) for tokens.
    #[tracing::instrument(skip_all)]
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<TokenResponse, ServiceError> {
        let mut body = serde_json::json!({
            "grant_type": "authorization_code",
            "client_id": self.client_id,
            "code": code,
            "redirect_uri": self.redirect_uri,
        });
        if let Some(verifier) = code_verifier {
            body["code_verifier"] = serde_json::Value::String(verifier.to_string());
        }
        self.post_grant(&body).await
    }

    async fn post_grant(&self, body: &serde_json::Value) -> Result<TokenResponse, ServiceError> {
        let response = self.http.post(&self.token_url).json(body).send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        if !(200..300).contains(&status) {
            warn!(status, "token endpoint rejected grant");
            return Err(ServiceError::OAuth {
                status,
                message: text,
            });
        }

        let tokens: TokenResponse = serde_json::from_str(&text)?;
        debug!(
            rotated = tokens.refresh_token.is_some(),
            expires_in = tokens.expires_in,
            "token grant succeeded"
        );
        Ok(tokens)
    }
}

#[async_trait]
impl TokenRefresher for TokenClient {
    #[tracing::instrument(skip_all)]
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, ServiceError> {
        let body = serde_json::json!({
            "grant_type": "refresh_token",
            "client_id": self.client_id,
            "refresh_token": refresh_token,
        });
        self.post_grant(&body).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
