use serde::{Deserialize, Serialize};

/// Why an access token could not be read.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("access token is empty")]
    Empty,
    #[error("malformed access token: {0}")]
    Malformed(String),
}

/// The fixed set of failures a user can be shown.
///
/// Every stage failure maps to exactly one category; `Internal` is the catch-all.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    PaymentRequired,
    Unauthorized,
    Maintenance,
    NoCapacity,
    VersionMismatch,
    Offline,
    Internal,
    ProtocolCrash,
}

impl ErrorCategory {
    /// Every category, in presentation order.
    pub const ALL: [Self; 8] = [
        Self::PaymentRequired,
        Self::Unauthorized,
        Self::Maintenance,
        Self::NoCapacity,
        Self::VersionMismatch,
        Self::Offline,
        Self::Internal,
        Self::ProtocolCrash,
    ];

    /// Short classification string for logging.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PaymentRequired => "payment_required",
            Self::Unauthorized => "unauthorized",
            Self::Maintenance => "maintenance",
            Self::NoCapacity => "no_capacity",
            Self::VersionMismatch => "version_mismatch",
            Self::Offline => "offline",
            Self::Internal => "internal",
            Self::ProtocolCrash => "protocol_crash",
        }
    }

    /// Window title.
    pub const fn title(self) -> &'static str {
        match self {
            Self::PaymentRequired => "Your subscription has ended",
            Self::Unauthorized => "Please sign in again",
            Self::Maintenance => "Whist is under maintenance",
            Self::NoCapacity => "No servers available",
            Self::VersionMismatch => "An update is required",
            Self::Offline => "No internet connection",
            Self::Internal => "Something went wrong",
            Self::ProtocolCrash => "The stream stopped unexpectedly",
        }
    }

    /// Window body.
    pub const fn message(self) -> &'static str {
        match self {
            Self::PaymentRequired => "Update your payment details to keep browsing with Whist.",
            Self::Unauthorized => "Your login has expired. Sign in to continue.",
            Self::Maintenance => "We are upgrading our servers. Please try again in a few minutes.",
            Self::NoCapacity => "All servers near you are busy. Please try again shortly.",
            Self::VersionMismatch => "This version of Whist is out of date. Restart to update.",
            Self::Offline => "We could not reach Whist. Check your network connection and retry.",
            Self::Internal => "An unexpected error occurred while starting your browser.",
            Self::ProtocolCrash => "Your browser window closed unexpectedly. Relaunch to reconnect.",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
