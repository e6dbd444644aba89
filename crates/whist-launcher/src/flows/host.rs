//! Host stage: the configuration handshake with the assigned machine.
//!
//! One call per input, never retried. The host answers with the three
//! protocol ports and an AES key; anything less is a failure, whatever the
//! status code says.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use whist_core::{
    AttemptId, AuthInfo, HostPreferences, HostSpinUpResult, ImportedData, MandelboxInfo, Scoped,
};
use whist_flow::{AttemptTracker, Channel, Flow, FlowError, FlowOutputs, flow, split_result};
use whist_services::{HostConfigRequest, HostConfigurer};

/// Input of the host stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostRequest {
    pub auth: AuthInfo,
    pub mandelbox: MandelboxInfo,
    pub imported: ImportedData,
}

/// Why the host could not be configured.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum HostError {
    /// A response arrived without every required field.
    #[error("host returned HTTP {status} without a complete result{}", error.as_deref().map(|e| format!(": {e}")).unwrap_or_default())]
    Incomplete { status: u16, error: Option<String> },
    #[error("host unreachable: {0}")]
    Unreachable(String),
    /// The preferences could not be encoded into `json_data`.
    #[error("could not encode host preferences: {0}")]
    Encode(String),
    #[error(transparent)]
    Faulted(FlowError),
}

/// Failure output of the host stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFailure {
    pub attempt: Option<AttemptId>,
    pub mandelbox_id: Option<String>,
    pub error: HostError,
}

impl From<FlowError> for HostFailure {
    fn from(err: FlowError) -> Self {
        Self {
            attempt: None,
            mandelbox_id: None,
            error: HostError::Faulted(err),
        }
    }
}

pub struct HostOutputs {
    pub success: Channel<Scoped<HostSpinUpResult>>,
    pub failure: Channel<HostFailure>,
}

impl FlowOutputs for HostOutputs {
    fn faulted(flow: &Flow, error: FlowError) -> Self {
        Self {
            success: Channel::closed(format!("{}.success", flow.name())),
            failure: Channel::once(format!("{}.failure", flow.name()), error.into()),
        }
    }
}

/// Build the `json_transport` body for one request.
pub fn config_request(
    request: &HostRequest,
    preferences: &HostPreferences,
) -> Result<HostConfigRequest, HostError> {
    let json_data = preferences
        .to_json_data()
        .map_err(|e| HostError::Encode(e.to_string()))?;
    Ok(HostConfigRequest {
        config_encryption_token: request.auth.config_token.clone(),
        is_new_config_encryption_token: request.auth.is_new_config_token,
        jwt_access_token: request.auth.access_token.clone(),
        mandelbox_id: request.mandelbox.mandelbox_id.clone(),
        json_data,
        imported: request.imported.clone(),
    })
}

/// Configure one host.
pub async fn spin_up_host(
    configurer: &dyn HostConfigurer,
    preferences: &HostPreferences,
    request: &HostRequest,
) -> Result<HostSpinUpResult, HostError> {
    let body = config_request(request, preferences)?;
    let ip = &request.mandelbox.ip;
    let response = configurer
        .configure(ip, &body)
        .await
        .map_err(|e| HostError::Unreachable(e.to_string()))?;
    response.spin_up_result(ip).ok_or(HostError::Incomplete {
        status: response.status,
        error: response.error,
    })
}

#[derive(Clone)]
pub struct HostDeps {
    pub configurer: Arc<dyn HostConfigurer>,
    pub preferences: HostPreferences,
    pub tracker: AttemptTracker,
}

/// The host flow. Stale attempts are dropped before any request goes out.
pub fn host_flow(input: BoxStream<'static, Scoped<HostRequest>>, deps: HostDeps) -> HostOutputs {
    flow("host", input, move |ctx, input| {
        let results = input
            .then(move |Scoped { attempt, value }| {
                let deps = deps.clone();
                async move {
                    if !deps.tracker.is_current(&attempt) {
                        debug!(%attempt, "attempt superseded before host handshake");
                        return None;
                    }
                    let outcome =
                        spin_up_host(deps.configurer.as_ref(), &deps.preferences, &value).await;
                    Some(match outcome {
                        Ok(host) => {
                            info!(%attempt, ip = %host.mandelbox_ip, "host configured");
                            Ok(Scoped::new(attempt, host))
                        }
                        Err(error) => {
                            warn!(%attempt, %error, "host handshake failed");
                            Err(HostFailure {
                                attempt: Some(attempt),
                                mandelbox_id: Some(value.mandelbox.mandelbox_id),
                                error,
                            })
                        }
                    })
                }
            })
            .filter_map(std::future::ready);
        let (success, failure) = split_result(ctx.name(), results);
        Ok(HostOutputs {
            success: ctx.trace("success", &success),
            failure: ctx.trace("failure", &failure),
        })
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
