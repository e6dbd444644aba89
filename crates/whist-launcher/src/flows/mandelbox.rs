//! Mandelbox stage: ask the scaling service for a session container.
//!
//! Transient failures are retried under the configured [`RetryPolicy`]
//! (bounded attempts, fixed delay by default). This covers clients that start
//! before the OS has finished bringing the network up. Policy refusals
//! (payment, auth, maintenance, version) fail at once. The retry loop runs
//! under the attempt's cancellation token, so a superseded launch stops
//! issuing requests.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use whist_core::{AttemptId, AuthInfo, AwsRegion, MandelboxInfo, RetryPolicy, Scoped, SessionId};
use whist_flow::{
    AttemptOutcome, AttemptTracker, Channel, Flow, FlowError, FlowOutputs, RetryFailure, flow, retry,
    split_result,
};
use whist_services::scaling::{COMMIT_HASH_MISMATCH, NO_INSTANCE_AVAILABLE, USER_ALREADY_ACTIVE};
use whist_services::{AssignRequest, AssignResponse, MandelboxAssigner, ServiceError};
use whist_settings::ClientSettings;

/// Input of the mandelbox stage: validated credentials plus region preference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MandelboxRequest {
    pub auth: AuthInfo,
    /// Closest first.
    pub regions: Vec<AwsRegion>,
}

/// Why no mandelbox was assigned. Carries the last response seen.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum MandelboxError {
    /// The scaling service answered with an error status.
    #[error("assign refused with HTTP {status}{}", error.as_deref().map(|e| format!(" ({e})")).unwrap_or_default())]
    Refused { status: u16, error: Option<String> },
    /// A success status without both an id and an ip.
    #[error("assign returned HTTP {status} without a mandelbox")]
    Incomplete { status: u16 },
    /// No response at all.
    #[error("scaling service unreachable: {0}")]
    Unreachable(String),
    /// A response arrived but could not be read.
    #[error("unreadable assign response: {0}")]
    Malformed(String),
    #[error(transparent)]
    Faulted(FlowError),
}

/// Failure output of the mandelbox stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandelboxFailure {
    pub attempt: Option<AttemptId>,
    /// Requests issued before giving up.
    pub attempts: u32,
    pub error: MandelboxError,
}

impl MandelboxFailure {
    /// HTTP status of the last response, if one arrived.
    pub fn status(&self) -> Option<u16> {
        match &self.error {
            MandelboxError::Refused { status, .. } | MandelboxError::Incomplete { status } => {
                Some(*status)
            }
            MandelboxError::Unreachable(_)
            | MandelboxError::Malformed(_)
            | MandelboxError::Faulted(_) => None,
        }
    }
}

impl std::fmt::Display for MandelboxFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} after {} attempt(s)", self.error, self.attempts)
    }
}

impl From<FlowError> for MandelboxFailure {
    fn from(err: FlowError) -> Self {
        Self {
            attempt: None,
            attempts: 0,
            error: MandelboxError::Faulted(err),
        }
    }
}

pub struct MandelboxOutputs {
    pub success: Channel<Scoped<MandelboxInfo>>,
    pub failure: Channel<MandelboxFailure>,
}

impl FlowOutputs for MandelboxOutputs {
    fn faulted(flow: &Flow, error: FlowError) -> Self {
        Self {
            success: Channel::closed(format!("{}.success", flow.name())),
            failure: Channel::once(format!("{}.failure", flow.name()), error.into()),
        }
    }
}

/// Decide whether one assign call succeeded, is worth repeating, or is final.
pub fn classify_assign(
    result: Result<AssignResponse, ServiceError>,
) -> AttemptOutcome<MandelboxInfo, MandelboxError> {
    let response = match result {
        Ok(response) => response,
        Err(err) if err.is_transport() => {
            return AttemptOutcome::Retry(MandelboxError::Unreachable(err.to_string()));
        }
        Err(err) => return AttemptOutcome::Fail(MandelboxError::Malformed(err.to_string())),
    };
    if let Some(mandelbox) = response.mandelbox() {
        return AttemptOutcome::Done(mandelbox);
    }
    let status = response.status;
    let error = response.body.error;
    match (status, error.as_deref()) {
        (200 | 202, _) => AttemptOutcome::Retry(MandelboxError::Incomplete { status }),
        (503, Some(NO_INSTANCE_AVAILABLE | USER_ALREADY_ACTIVE)) => {
            AttemptOutcome::Retry(MandelboxError::Refused { status, error })
        }
        (401 | 402 | 422 | 512, _) | (503, Some(COMMIT_HASH_MISMATCH)) => {
            AttemptOutcome::Fail(MandelboxError::Refused { status, error })
        }
        (500..=599, _) => AttemptOutcome::Retry(MandelboxError::Refused { status, error }),
        _ => AttemptOutcome::Fail(MandelboxError::Refused { status, error }),
    }
}

/// Run the assign call under `policy` until it succeeds or gives up.
pub async fn create_mandelbox(
    assigner: &dyn MandelboxAssigner,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    access_token: &str,
    request: &AssignRequest,
) -> (Result<MandelboxInfo, RetryFailure<MandelboxError>>, u32) {
    let outcome = retry(policy, cancel, |attempt| async move {
        debug!(attempt, "requesting mandelbox");
        classify_assign(assigner.assign(access_token, request).await)
    })
    .await;
    (outcome.result, outcome.attempts)
}

/// Everything the mandelbox flow needs besides its input.
#[derive(Clone)]
pub struct MandelboxDeps {
    pub assigner: Arc<dyn MandelboxAssigner>,
    pub policy: RetryPolicy,
    pub client: ClientSettings,
    pub tracker: AttemptTracker,
}

/// The mandelbox flow. Requests are handled one at a time; inputs for an
/// attempt that is no longer current are dropped unanswered.
pub fn mandelbox_flow(
    input: BoxStream<'static, Scoped<MandelboxRequest>>,
    deps: MandelboxDeps,
) -> MandelboxOutputs {
    flow("mandelbox", input, move |ctx, input| {
        let results = input
            .then(move |Scoped { attempt, value }| {
                let deps = deps.clone();
                async move { run_attempt(&deps, attempt, value).await }
            })
            .filter_map(std::future::ready);
        let (success, failure) = split_result(ctx.name(), results);
        Ok(MandelboxOutputs {
            success: ctx.trace("success", &success),
            failure: ctx.trace("failure", &failure),
        })
    })
}

async fn run_attempt(
    deps: &MandelboxDeps,
    attempt: AttemptId,
    request: MandelboxRequest,
) -> Option<Result<Scoped<MandelboxInfo>, MandelboxFailure>> {
    let Some(cancel) = deps.tracker.token_for(&attempt) else {
        debug!(%attempt, "attempt superseded before mandelbox request");
        return None;
    };
    let assign = AssignRequest {
        regions: request.regions,
        client_commit_hash: deps.client.commit_hash.clone(),
        session_id: SessionId::new().to_string(),
        user_email: request.auth.user_email,
        version: deps.client.version.clone(),
    };

    let (result, attempts) = create_mandelbox(
        deps.assigner.as_ref(),
        &deps.policy,
        &cancel,
        &request.auth.access_token,
        &assign,
    )
    .await;

    match result {
        Ok(mandelbox) => {
            info!(%attempt, attempts, mandelbox_id = %mandelbox.mandelbox_id, ip = %mandelbox.ip, "mandelbox assigned");
            Some(Ok(Scoped::new(attempt, mandelbox)))
        }
        Err(RetryFailure::Cancelled(_)) => {
            debug!(%attempt, attempts, "mandelbox request cancelled");
            None
        }
        Err(failure) => {
            let failure = MandelboxFailure {
                attempt: Some(attempt),
                attempts,
                error: failure
                    .into_error()
                    .unwrap_or_else(|| MandelboxError::Unreachable("no attempt completed".into())),
            };
            warn!(%failure, "mandelbox request failed");
            Some(Err(failure))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use futures::stream;
    use whist_services::mock::{MockAssigner, MockReply};
    use whist_services::AssignBody;

    use super::*;

    fn response(status: u16, error: Option<&str>) -> Result<AssignResponse, ServiceError> {
        Ok(AssignResponse {
            status,
            body: AssignBody {
                error: error.map(str::to_string),
                ..AssignBody::default()
            },
        })
    }

    fn auth() -> AuthInfo {
        AuthInfo {
            user_email: "user@example.com".into(),
            access_token: "at".into(),
            refresh_token: None,
            config_token: "ct".into(),
            is_new_config_token: false,
            subscription_status: None,
        }
    }

    fn assign_request() -> AssignRequest {
        AssignRequest {
            regions: vec![AwsRegion::UsEast1],
            client_commit_hash: "c".into(),
            session_id: "s".into(),
            user_email: "user@example.com".into(),
            version: "v".into(),
        }
    }

    fn deps(assigner: Arc<MockAssigner>, tracker: AttemptTracker) -> MandelboxDeps {
        MandelboxDeps {
            assigner,
            policy: RetryPolicy::fixed(10, 1000),
            client: ClientSettings::default(),
            tracker,
        }
    }

    #[test]
    fn policy_refusals_are_final() {
        for status in [401, 402, 422, 512] {
            assert_matches!(classify_assign(response(status, None)), AttemptOutcome::Fail(_));
        }
        assert_matches!(
            classify_assign(response(503, Some(COMMIT_HASH_MISMATCH))),
            AttemptOutcome::Fail(MandelboxError::Refused { status: 503, .. })
        );
        assert_matches!(classify_assign(response(404, None)), AttemptOutcome::Fail(_));
    }

    #[test]
    fn transient_failures_are_retried() {
        assert_matches!(
            classify_assign(response(503, Some(NO_INSTANCE_AVAILABLE))),
            AttemptOutcome::Retry(MandelboxError::Refused { status: 503, .. })
        );
        assert_matches!(classify_assign(response(502, None)), AttemptOutcome::Retry(_));
        assert_matches!(
            classify_assign(response(200, None)),
            AttemptOutcome::Retry(MandelboxError::Incomplete { status: 200 })
        );
        assert_matches!(
            classify_assign(Err(ServiceError::Transport("down".into()))),
            AttemptOutcome::Retry(MandelboxError::Unreachable(_))
        );
        let garbled = serde_json::from_str::<serde_json::Value>("<html>").unwrap_err();
        assert_matches!(
            classify_assign(Err(ServiceError::Json(garbled))),
            AttemptOutcome::Fail(MandelboxError::Malformed(_))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let mut script = vec![MockReply::Transport("no network".into()); 9];
        script.push(MockAssigner::assigned("m1", "1.2.3.4"));
        let assigner = MockAssigner::new(script);
        let (result, attempts) = create_mandelbox(
            &assigner,
            &RetryPolicy::fixed(10, 1000),
            &CancellationToken::new(),
            "at",
            &assign_request(),
        )
        .await;
        assert_eq!(result.unwrap().mandelbox_id, "m1");
        assert_eq!(attempts, 10);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_and_stops() {
        let assigner = MockAssigner::new(vec![MockAssigner::refused(503, Some(NO_INSTANCE_AVAILABLE))]);
        let (result, attempts) = create_mandelbox(
            &assigner,
            &RetryPolicy::fixed(10, 1000),
            &CancellationToken::new(),
            "at",
            &assign_request(),
        )
        .await;
        assert_matches!(result, Err(RetryFailure::Exhausted(MandelboxError::Refused { status: 503, .. })));
        assert_eq!(attempts, 10);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(assigner.call_count(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn flow_emits_failure_with_last_response() {
        let tracker = AttemptTracker::default();
        let (attempt, _) = tracker.begin();
        let assigner = Arc::new(MockAssigner::new(vec![MockAssigner::refused(402, None)]));
        let outputs = mandelbox_flow(
            stream::iter(vec![Scoped::new(
                attempt.clone(),
                MandelboxRequest {
                    auth: auth(),
                    regions: vec![AwsRegion::UsEast1, AwsRegion::EuWest1],
                },
            )])
            .boxed(),
            deps(Arc::clone(&assigner), tracker),
        );
        let (success, failure) = (outputs.success.subscribe(), outputs.failure.subscribe());
        let (success, failure): (Vec<_>, Vec<_>) = futures::join!(success.collect(), failure.collect());

        assert!(success.is_empty());
        assert_eq!(failure.len(), 1);
        assert_eq!(failure[0].attempt, Some(attempt));
        assert_eq!(failure[0].attempts, 1);
        assert_eq!(failure[0].status(), Some(402));

        let sent = assigner.requests();
        assert_eq!(sent[0].regions, vec![AwsRegion::UsEast1, AwsRegion::EuWest1]);
        assert_eq!(sent[0].user_email, "user@example.com");
    }

    #[tokio::test]
    async fn stale_attempts_are_not_requested() {
        let tracker = AttemptTracker::default();
        let (stale, _) = tracker.begin();
        let _ = tracker.begin();
        let assigner = Arc::new(MockAssigner::new(vec![MockAssigner::assigned("m1", "1.2.3.4")]));
        let outputs = mandelbox_flow(
            stream::iter(vec![Scoped::new(
                stale,
                MandelboxRequest {
                    auth: auth(),
                    regions: vec![AwsRegion::UsEast1],
                },
            )])
            .boxed(),
            deps(Arc::clone(&assigner), tracker),
        );
        let (success, failure) = (outputs.success.subscribe(), outputs.failure.subscribe());
        let (success, failure): (Vec<_>, Vec<_>) = futures::join!(success.collect(), failure.collect());
        assert!(success.is_empty() && failure.is_empty());
        assert_eq!(assigner.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn superseding_the_attempt_stops_retries() {
        let tracker = AttemptTracker::default();
        let (attempt, _) = tracker.begin();
        let assigner = Arc::new(MockAssigner::new(vec![MockReply::Transport("down".into())]));
        let outputs = mandelbox_flow(
            stream::iter(vec![Scoped::new(
                attempt,
                MandelboxRequest {
                    auth: auth(),
                    regions: vec![AwsRegion::UsEast1],
                },
            )])
            .boxed(),
            deps(Arc::clone(&assigner), tracker.clone()),
        );
        let failure = outputs.failure.subscribe();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        let _ = tracker.begin();
        let failures: Vec<_> = failure.collect().await;

        assert!(failures.is_empty());
        assert_eq!(assigner.call_count(), 3);
    }

    #[test]
    fn failure_display_counts_attempts() {
        let failure = MandelboxFailure {
            attempt: None,
            attempts: 10,
            error: MandelboxError::Refused {
                status: 503,
                error: Some(NO_INSTANCE_AVAILABLE.into()),
            },
        };
        assert_eq!(
            failure.to_string(),
            "assign refused with HTTP 503 (NO_INSTANCE_AVAILABLE) after 10 attempt(s)"
        );
    }
}
