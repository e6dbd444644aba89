//! Auth stage.
//!
//! Unexpired credentials pass through. An expired (or unreadable) access
//! token is refreshed once when a refresh token exists; a rejected refresh is
//! a failure and is never retried here. Every success carries a config token,
//! generated on the spot if the input had none.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use whist_core::{AccessClaims, AttemptId, AuthInfo, AuthInput, Scoped, TokenError, generate_config_token};
use whist_flow::{Channel, Flow, FlowError, FlowOutputs, flow, split_result};
use whist_services::{ServiceError, TokenRefresher, TokenResponse};

/// Why credentials could not be validated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case")]
pub enum AuthError {
    #[error("no access token")]
    MissingToken,
    #[error("malformed access token: {0}")]
    MalformedToken(String),
    /// The token endpoint answered with an error status.
    #[error("refresh rejected ({status}): {message}")]
    RefreshRejected { status: u16, message: String },
    /// The token endpoint answered 200 with a body that is not a token response.
    #[error("refresh returned a malformed body: {0}")]
    MalformedResponse(String),
    /// The token endpoint could not be reached.
    #[error("refresh failed: {0}")]
    RefreshUnavailable(String),
    #[error(transparent)]
    Faulted(FlowError),
}

impl From<ServiceError> for AuthError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::OAuth { status, message } => Self::RefreshRejected { status, message },
            ServiceError::Json(e) => Self::MalformedResponse(e.to_string()),
            other => Self::RefreshUnavailable(other.to_string()),
        }
    }
}

/// Failure output of the auth stage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFailure {
    /// `None` when the stage itself failed before handling any input.
    pub attempt: Option<AttemptId>,
    pub error: AuthError,
}

impl From<FlowError> for AuthFailure {
    fn from(err: FlowError) -> Self {
        Self {
            attempt: None,
            error: AuthError::Faulted(err),
        }
    }
}

pub struct AuthOutputs {
    pub success: Channel<Scoped<AuthInfo>>,
    pub failure: Channel<AuthFailure>,
}

impl FlowOutputs for AuthOutputs {
    fn faulted(flow: &Flow, error: FlowError) -> Self {
        Self {
            success: Channel::closed(format!("{}.success", flow.name())),
            failure: Channel::once(format!("{}.failure", flow.name()), error.into()),
        }
    }
}

/// Validate one set of credentials, refreshing at most once.
pub async fn authenticate(
    input: AuthInput,
    refresher: &dyn TokenRefresher,
) -> Result<AuthInfo, AuthError> {
    let claims = AccessClaims::decode(&input.access_token);
    let expired = claims.as_ref().map_or(true, AccessClaims::is_expired);

    let (access_token, refresh_token, claims) = match (expired, input.refresh_token.as_deref()) {
        (true, Some(refresh_token)) => {
            debug!(user = %input.user_email, "access token expired, refreshing");
            let tokens = refresher.refresh(refresh_token).await?;
            let TokenResponse {
                access_token,
                refresh_token: rotated,
                ..
            } = tokens;
            let claims = AccessClaims::decode(&access_token).ok();
            (access_token, rotated.or(input.refresh_token), claims)
        }
        (_, None) => match claims {
            Ok(claims) => {
                if expired {
                    warn!(user = %input.user_email, "access token expired and no refresh token, passing through");
                }
                (input.access_token, None, Some(claims))
            }
            Err(TokenError::Empty) => return Err(AuthError::MissingToken),
            Err(TokenError::Malformed(message)) => return Err(AuthError::MalformedToken(message)),
        },
        (false, Some(_)) => (input.access_token, input.refresh_token, claims.ok()),
    };

    let (config_token, is_new_config_token) = match input.config_token.filter(|t| !t.is_empty()) {
        Some(token) => (token, false),
        None => {
            info!(user = %input.user_email, "generated new config token");
            (generate_config_token(), true)
        }
    };

    Ok(AuthInfo {
        user_email: input.user_email,
        access_token,
        refresh_token,
        config_token,
        is_new_config_token,
        subscription_status: claims.and_then(|c| c.subscription_status),
    })
}

/// The auth flow. Inputs are handled one at a time, in arrival order.
pub fn auth_flow(
    input: BoxStream<'static, Scoped<AuthInput>>,
    refresher: Arc<dyn TokenRefresher>,
) -> AuthOutputs {
    flow("auth", input, move |ctx, input| {
        let results = input.then(move |Scoped { attempt, value }| {
            let refresher = Arc::clone(&refresher);
            async move {
                match authenticate(value, refresher.as_ref()).await {
                    Ok(info) => Ok(Scoped::new(attempt, info)),
                    Err(error) => {
                        warn!(%attempt, %error, "auth failed");
                        Err(AuthFailure {
                            attempt: Some(attempt),
                            error,
                        })
                    }
                }
            }
        });
        let (success, failure) = split_result(ctx.name(), results);
        Ok(AuthOutputs {
            success: ctx.trace("success", &success),
            failure: ctx.trace("failure", &failure),
        })
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use futures::stream;
    use jsonwebtoken::{EncodingKey, Header};
    use whist_services::mock::{MockRefresher, MockReply};

    use super::*;

    const FUTURE: i64 = 4_000_000_000;
    const PAST: i64 = 1_000_000_000;

    fn jwt(exp: i64) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            &serde_json::json!({
                "exp": exp,
                "https://api.fractal.co/subscription_status": "active",
            }),
            &EncodingKey::from_secret(b"test"),
        )
        .unwrap()
    }

    fn input(access_token: String, refresh_token: Option<&str>, config_token: Option<&str>) -> AuthInput {
        AuthInput {
            user_email: "user@example.com".into(),
            access_token,
            refresh_token: refresh_token.map(str::to_string),
            config_token: config_token.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn valid_token_passes_through_unchanged() {
        let refresher = MockRefresher::issuing("unused");
        let token = jwt(FUTURE);
        let info = authenticate(input(token.clone(), Some("rt"), Some("ct")), &refresher)
            .await
            .unwrap();
        assert_eq!(info.access_token, token);
        assert_eq!(info.refresh_token.as_deref(), Some("rt"));
        assert_eq!(info.config_token, "ct");
        assert!(!info.is_new_config_token);
        assert_eq!(info.subscription_status.as_deref(), Some("active"));
        assert_eq!(refresher.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_config_token_is_generated() {
        let refresher = MockRefresher::issuing("unused");
        let info = authenticate(input(jwt(FUTURE), None, None), &refresher).await.unwrap();
        assert!(info.is_new_config_token);
        assert_eq!(info.config_token.len(), 43);
    }

    #[tokio::test]
    async fn expired_token_refreshes_exactly_once() {
        let fresh = jwt(FUTURE);
        let refresher = MockRefresher::issuing(&fresh);
        let info = authenticate(input(jwt(PAST), Some("rt"), Some("ct")), &refresher)
            .await
            .unwrap();
        assert_eq!(info.access_token, fresh);
        assert_eq!(info.refresh_token.as_deref(), Some("rt"));
        assert_eq!(refresher.refresh_tokens(), vec!["rt".to_string()]);
    }

    #[tokio::test]
    async fn rotated_refresh_token_replaces_old_one() {
        let refresher = MockRefresher::new(vec![MockReply::Ok(TokenResponse {
            access_token: jwt(FUTURE),
            refresh_token: Some("rt-2".into()),
            id_token: None,
            expires_in: Some(3600),
        })]);
        let info = authenticate(input(jwt(PAST), Some("rt-1"), None), &refresher)
            .await
            .unwrap();
        assert_eq!(info.refresh_token.as_deref(), Some("rt-2"));
    }

    #[tokio::test]
    async fn expired_without_refresh_token_passes_through() {
        let refresher = MockRefresher::issuing("unused");
        let token = jwt(PAST);
        let info = authenticate(input(token.clone(), None, Some("ct")), &refresher).await.unwrap();
        assert_eq!(info.access_token, token);
        assert_eq!(refresher.call_count(), 0);
    }

    #[tokio::test]
    async fn rejected_refresh_fails() {
        let refresher = MockRefresher::new(vec![MockReply::Rejected {
            status: 403,
            message: "invalid_grant".into(),
        }]);
        let err = authenticate(input(jwt(PAST), Some("rt"), None), &refresher).await.unwrap_err();
        assert_matches!(err, AuthError::RefreshRejected { status: 403, .. });
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_fails() {
        let refresher = MockRefresher::new(vec![MockReply::Transport("offline".into())]);
        let err = authenticate(input(jwt(PAST), Some("rt"), None), &refresher).await.unwrap_err();
        assert_matches!(err, AuthError::RefreshUnavailable(_));
    }

    #[tokio::test]
    async fn unreadable_tokens_without_refresh_fail() {
        let refresher = MockRefresher::issuing("unused");
        assert_eq!(
            authenticate(input(String::new(), None, None), &refresher).await,
            Err(AuthError::MissingToken)
        );
        assert_matches!(
            authenticate(input("garbage".into(), None, None), &refresher).await,
            Err(AuthError::MalformedToken(_))
        );
    }

    #[tokio::test]
    async fn garbage_token_with_refresh_token_is_refreshed() {
        let refresher = MockRefresher::issuing("new");
        let info = authenticate(input("garbage".into(), Some("rt"), None), &refresher)
            .await
            .unwrap();
        assert_eq!(info.access_token, "new");
        assert_eq!(refresher.call_count(), 1);
    }

    #[tokio::test]
    async fn flow_routes_each_input_to_one_channel() {
        let refresher = Arc::new(MockRefresher::new(vec![MockReply::Rejected {
            status: 401,
            message: "nope".into(),
        }]));
        let ok = Scoped::new(AttemptId::from_raw("a1"), input(jwt(FUTURE), None, Some("ct")));
        let bad = Scoped::new(AttemptId::from_raw("a2"), input(jwt(PAST), Some("rt"), None));
        let outputs = auth_flow(stream::iter(vec![ok, bad]).boxed(), refresher.clone());

        let (success, failure) = (outputs.success.subscribe(), outputs.failure.subscribe());
        let (success, failure): (Vec<_>, Vec<_>) =
            futures::join!(success.collect(), failure.collect());

        assert_eq!(success.len(), 1);
        assert_eq!(success[0].attempt.as_str(), "a1");
        assert_eq!(failure.len(), 1);
        assert_eq!(failure[0].attempt, Some(AttemptId::from_raw("a2")));
        assert_eq!(refresher.call_count(), 1);
    }
}
