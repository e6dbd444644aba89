//! # whist-core
//!
//! Foundation types shared by every Whist launcher crate.
//!
//! - **Triggers**: [`Trigger`] and the closed [`TriggerName`] topic set carried on the bus
//! - **Branded IDs**: [`AttemptId`], [`SessionId`] and the [`Scoped`] wrapper that
//!   correlates every pipeline payload with its launch attempt
//! - **Auth**: [`AuthInput`], [`AuthInfo`] and access-token claim decoding
//! - **Regions**: [`AwsRegion`] candidates and [`RegionLatency`] ranking
//! - **Sessions**: [`MandelboxInfo`], [`HostSpinUpResult`] and host `json_data` preferences
//! - **Errors**: the user-facing [`ErrorCategory`] set
//! - **Retry**: [`RetryPolicy`] parameters (execution lives in `whist-flow`)
//! - **Logging**: `tracing` subscriber setup

#![deny(unsafe_code)]

pub mod auth;
pub mod errors;
pub mod host;
pub mod ids;
pub mod logging;
pub mod mandelbox;
pub mod region;
pub mod retry;
pub mod trigger;

pub use auth::{AccessClaims, AuthInfo, AuthInput, generate_config_token};
pub use errors::{ErrorCategory, TokenError};
pub use host::{HostPreferences, HostSpinUpResult, ImportedData, MandelboxPorts};
pub use ids::{AttemptId, Scoped, SessionId};
pub use mandelbox::MandelboxInfo;
pub use logging::{LogFormat, init_subscriber};
pub use region::{AwsRegion, RegionLatency, UnknownRegion, eligible_regions, rank_by_latency};
pub use retry::{Backoff, RetryPolicy};
pub use trigger::{Trigger, TriggerName};
