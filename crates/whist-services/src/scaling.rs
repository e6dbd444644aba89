//! Scaling service client: assigns a mandelbox for a session.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use whist_core::{AwsRegion, MandelboxInfo};
use whist_settings::ScalingSettings;

use crate::errors::ServiceError;

/// Every instance in the requested regions is full.
pub const NO_INSTANCE_AVAILABLE: &str = "NO_INSTANCE_AVAILABLE";
/// The client build is not the one the service is running.
pub const COMMIT_HASH_MISMATCH: &str = "COMMIT_HASH_MISMATCH";
/// None of the requested regions is enabled for this user.
pub const REGION_NOT_ENABLED: &str = "REGION_NOT_ENABLED";
/// The user already holds a running mandelbox.
pub const USER_ALREADY_ACTIVE: &str = "USER_ALREADY_ACTIVE";

/// Body of `POST /mandelbox/assign`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignRequest {
    /// Ordered by preference, closest first.
    pub regions: Vec<AwsRegion>,
    pub client_commit_hash: String,
    pub session_id: String,
    pub user_email: String,
    pub version: String,
}

/// Decoded assign response body. Every field is optional on the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignBody {
    #[serde(default, alias = "mandelboxID")]
    pub mandelbox_id: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Status and body of one assign call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignResponse {
    pub status: u16,
    pub body: AssignBody,
}

impl AssignResponse {
    /// The assigned mandelbox, if the call succeeded.
    ///
    /// Success needs status 200 or 202 and both an id and an ip.
    pub fn mandelbox(&self) -> Option<MandelboxInfo> {
        if !matches!(self.status, 200 | 202) {
            return None;
        }
        let mandelbox_id = self.body.mandelbox_id.as_deref().filter(|s| !s.is_empty())?;
        let ip = self.body.ip.as_deref().filter(|s| !s.is_empty())?;
        Some(MandelboxInfo {
            mandelbox_id: mandelbox_id.to_string(),
            ip: ip.to_string(),
        })
    }

    pub fn error_code(&self) -> Option<&str> {
        self.body.error.as_deref()
    }
}

/// Requests a mandelbox from the scaling service.
#[async_trait]
pub trait MandelboxAssigner: Send + Sync {
    /// One assign call. `Err` only for transport failures; any HTTP answer,
    /// including errors, is an [`AssignResponse`].
    async fn assign(
        &self,
        access_token: &str,
        request: &AssignRequest,
    ) -> Result<AssignResponse, ServiceError>;
}

#[derive(Clone, Debug)]
pub struct ScalingClient {
    http: reqwest::Client,
    assign_url: String,
}

impl ScalingClient {
    pub fn new(settings: &ScalingSettings) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .build()?;
        Ok(Self {
            http,
            assign_url: format!("{}/mandelbox/assign", settings.base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl MandelboxAssigner for ScalingClient {
    #[tracing::instrument(skip_all, fields(session_id = %request.session_id))]
    async fn assign(
        &self,
        access_token: &str,
        request: &AssignRequest,
    ) -> Result<AssignResponse, ServiceError> {
        let response = self
            .http
            .post(&self.assign_url)
            .bearer_auth(access_token)
            .json(request)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let body = serde_json::from_str(&text).unwrap_or_else(|err| {
            debug!(status, error = %err, "assign body is not JSON");
            AssignBody::default()
        });
        let response = AssignResponse { status, body };
        info!(status, error = ?response.error_code(), "mandelbox assign answered");
        Ok(response)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
