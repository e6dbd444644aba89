use serde::{Deserialize, Serialize};
use whist_core::RetryPolicy;

/// OAuth token endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Base URL; requests go to `{base_url}/oauth/token`.
    pub base_url: String,
    pub client_id: String,
    /// Redirect URI registered for the authorization-code grant.
    pub redirect_uri: String,
    pub request_timeout_ms: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            base_url: "https://auth.whist.com".to_string(),
            client_id: "Ulk5B2RfB7mM8BVjA3JtkrZT7HhWIBLD".to_string(),
            redirect_uri: "http://localhost/callback".to_string(),
            request_timeout_ms: 15_000,
        }
    }
}

/// Scaling service settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScalingSettings {
    pub base_url: String,
    /// Retry policy for mandelbox assignment.
    pub retry: RetryPolicy,
    pub request_timeout_ms: u64,
}

impl Default for ScalingSettings {
    fn default() -> Self {
        Self {
            base_url: "https://prod-scaling-service.whist.com".to_string(),
            retry: RetryPolicy::default(),
            request_timeout_ms: 30_000,
        }
    }
}

/// Host service settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostSettings {
    pub port: u16,
    pub scheme: String,
    /// Hosts present self-signed certificates.
    pub accept_invalid_certs: bool,
    pub request_timeout_ms: u64,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            port: 4678,
            scheme: "https".to_string(),
            accept_invalid_certs: true,
            request_timeout_ms: 60_000,
        }
    }
}
