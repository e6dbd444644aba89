//! Credentials as they enter and leave the auth stage.
//!
//! Access tokens are JWTs issued by the auth provider. The client never holds
//! the signing key, so claims are decoded without signature verification and
//! used only to decide whether a refresh is due.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{DecodingKey, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::errors::TokenError;

/// Custom claim carrying the user's Stripe subscription status.
pub const SUBSCRIPTION_STATUS_CLAIM: &str = "https://api.fractal.co/subscription_status";

/// Number of random bytes in a generated config token.
const CONFIG_TOKEN_BYTES: usize = 32;

/// Credentials handed to the auth stage, typically loaded from the persisted store.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInput {
    pub user_email: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_token: Option<String>,
}

/// Validated credentials produced by the auth stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    pub user_email: String,
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Per-install key the host uses to encrypt browser state at rest.
    pub config_token: String,
    /// True when `config_token` was generated during this attempt.
    pub is_new_config_token: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<String>,
}

/// The subset of access-token claims the client reads.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AccessClaims {
    /// Expiry, seconds since the Unix epoch.
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default, rename = "https://api.fractal.co/subscription_status")]
    pub subscription_status: Option<String>,
}

impl AccessClaims {
    /// Decode the claims segment of a JWT without verifying its signature.
    pub fn decode(token: &str) -> Result<Self, TokenError> {
        if token.trim().is_empty() {
            return Err(TokenError::Empty);
        }
        let mut validation = Validation::default();
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        jsonwebtoken::decode::<Self>(token, &DecodingKey::from_secret(&[]), &validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::Malformed(e.to_string()))
    }

    /// Whether the token has expired at `now_secs`. A token without `exp` never expires.
    pub fn is_expired_at(&self, now_secs: i64) -> bool {
        self.exp.is_some_and(|exp| exp <= now_secs)
    }

    /// Whether the token has expired now.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }
}

/// Generate a fresh per-install config token.
pub fn generate_config_token() -> String {
    let mut bytes = [0u8; CONFIG_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
