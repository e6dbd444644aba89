//! Branded ID newtypes and attempt-scoped payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident, $prefix:expr) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generate a fresh, time-ordered ID.
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            /// Wrap an existing string without validation.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the raw string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(
    /// One session-establishment attempt, from launch request to protocol start.
    AttemptId,
    "attempt"
);
branded_id!(
    /// Client session identifier reported to the scaling service.
    SessionId,
    "sess"
);

/// A payload tagged with the attempt that produced it.
///
/// Every value that crosses a stage boundary is scoped, so joins between
/// stages match on [`AttemptId`] rather than emission order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scoped<T> {
    /// Attempt this value belongs to.
    pub attempt: AttemptId,
    /// The stage payload.
    pub value: T,
}

impl<T> Scoped<T> {
    /// Tag `value` with `attempt`.
    pub fn new(attempt: AttemptId, value: T) -> Self {
        Self { attempt, value }
    }

    /// Transform the payload, keeping the attempt.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Scoped<U> {
        Scoped {
            attempt: self.attempt,
            value: f(self.value),
        }
    }
}
