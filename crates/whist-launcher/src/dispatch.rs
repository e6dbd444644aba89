//! Error dispatch: turn any stage failure into one user-facing error window.
//!
//! Classification is a total `match`; `Internal` catches everything without a
//! more specific category. Windows are held until the app is ready.

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use whist_core::{AttemptId, ErrorCategory, TriggerName};
use whist_flow::{Channel, FlowError, TriggerBus, with_app_ready};
use whist_services::scaling::{COMMIT_HASH_MISMATCH, NO_INSTANCE_AVAILABLE, REGION_NOT_ENABLED};

use crate::flows::{AuthError, AuthFailure, HostFailure, MandelboxError, MandelboxFailure};
use crate::protocol::{ProtocolError, ProtocolFailure};

/// A failure from any stage of the pipeline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "failure", rename_all = "snake_case")]
pub enum StageFailure {
    Auth(AuthFailure),
    /// The region stage only fails when it cannot be built.
    Region(FlowError),
    Mandelbox(MandelboxFailure),
    Host(HostFailure),
    Protocol(ProtocolFailure),
}

impl StageFailure {
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth",
            Self::Region(_) => "region",
            Self::Mandelbox(_) => "mandelbox",
            Self::Host(_) => "host",
            Self::Protocol(_) => "protocol",
        }
    }

    /// The attempt the failure belongs to, if it got far enough to have one.
    pub fn attempt(&self) -> Option<&AttemptId> {
        match self {
            Self::Auth(f) => f.attempt.as_ref(),
            Self::Region(_) => None,
            Self::Mandelbox(f) => f.attempt.as_ref(),
            Self::Host(f) => f.attempt.as_ref(),
            Self::Protocol(f) => f.attempt.as_ref(),
        }
    }

    pub fn detail(&self) -> String {
        match self {
            Self::Auth(f) => f.error.to_string(),
            Self::Region(e) => e.to_string(),
            Self::Mandelbox(f) => f.to_string(),
            Self::Host(f) => f.error.to_string(),
            Self::Protocol(f) => f.error.to_string(),
        }
    }

    pub fn classify(&self) -> ErrorCategory {
        match self {
            Self::Auth(f) => match f.error {
                AuthError::MissingToken
                | AuthError::MalformedToken(_)
                | AuthError::RefreshRejected { .. }
                | AuthError::MalformedResponse(_) => ErrorCategory::Unauthorized,
                AuthError::RefreshUnavailable(_) => ErrorCategory::Offline,
                AuthError::Faulted(_) => ErrorCategory::Internal,
            },
            Self::Mandelbox(f) => classify_mandelbox(&f.error),
            Self::Protocol(f) => match f.error {
                ProtocolError::Spawn(_) | ProtocolError::Io(_) | ProtocolError::Exited { .. } => {
                    ErrorCategory::ProtocolCrash
                }
                ProtocolError::Handshake(_) | ProtocolError::Faulted(_) => ErrorCategory::Internal,
            },
            Self::Region(_) | Self::Host(_) => ErrorCategory::Internal,
        }
    }
}

fn classify_mandelbox(error: &MandelboxError) -> ErrorCategory {
    match error {
        MandelboxError::Refused { status, error } => match (*status, error.as_deref()) {
            (402, _) => ErrorCategory::PaymentRequired,
            (401 | 422, _) => ErrorCategory::Unauthorized,
            (512, _) => ErrorCategory::Maintenance,
            (_, Some(COMMIT_HASH_MISMATCH)) => ErrorCategory::VersionMismatch,
            (503, Some(NO_INSTANCE_AVAILABLE | REGION_NOT_ENABLED)) => ErrorCategory::NoCapacity,
            _ => ErrorCategory::Internal,
        },
        MandelboxError::Unreachable(_) => ErrorCategory::Offline,
        MandelboxError::Incomplete { .. }
        | MandelboxError::Malformed(_)
        | MandelboxError::Faulted(_) => ErrorCategory::Internal,
    }
}

impl From<AuthFailure> for StageFailure {
    fn from(f: AuthFailure) -> Self {
        Self::Auth(f)
    }
}

impl From<MandelboxFailure> for StageFailure {
    fn from(f: MandelboxFailure) -> Self {
        Self::Mandelbox(f)
    }
}

impl From<HostFailure> for StageFailure {
    fn from(f: HostFailure) -> Self {
        Self::Host(f)
    }
}

impl From<ProtocolFailure> for StageFailure {
    fn from(f: ProtocolFailure) -> Self {
        Self::Protocol(f)
    }
}

/// Payload of the `error_window` trigger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorWindow {
    pub category: ErrorCategory,
    pub title: String,
    pub message: String,
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<AttemptId>,
    /// Technical detail for logs and support.
    pub detail: String,
}

impl From<&StageFailure> for ErrorWindow {
    fn from(failure: &StageFailure) -> Self {
        let category = failure.classify();
        Self {
            category,
            title: category.title().to_string(),
            message: category.message().to_string(),
            stage: failure.stage().to_string(),
            attempt: failure.attempt().cloned(),
            detail: failure.detail(),
        }
    }
}

/// Publish an `error_window` trigger for every failure, once the app is ready.
pub fn error_dispatch(bus: &TriggerBus, failures: &Channel<StageFailure>) -> Channel<ErrorWindow> {
    let windows = failures.subscribe().map(|failure| {
        let window = ErrorWindow::from(&failure);
        error!(
            stage = %window.stage,
            category = %window.category,
            detail = %window.detail,
            "launch failed"
        );
        window
    });
    let gated = with_app_ready(bus, windows).inspect(|w| {
        info!(category = %w.category, "showing error window");
    });
    bus.create_trigger(TriggerName::ErrorWindow, Channel::from_stream("error.window", gated))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
