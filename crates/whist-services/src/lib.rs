//! # whist-services
//!
//! The launcher's external collaborators, each behind a trait so flows can
//! run against scripted fakes:
//!
//! - [`TokenRefresher`] / [`TokenClient`]: the auth provider's token endpoint
//! - [`MandelboxAssigner`] / [`ScalingClient`]: `POST /mandelbox/assign`
//! - [`HostConfigurer`] / [`HostClient`]: `PUT /json_transport` on the assigned host
//! - [`RegionProber`] / [`HttpProber`]: per-region latency probes
//! - [`KeyValueStore`]: persisted tokens, region ordering and flags
//!
//! [`mock`] holds deterministic fakes for every seam.

#![deny(unsafe_code)]

pub mod auth;
pub mod errors;
pub mod host;
pub mod mock;
pub mod ping;
pub mod scaling;
pub mod store;

pub use auth::{TokenClient, TokenRefresher, TokenResponse};
pub use errors::ServiceError;
pub use host::{HostClient, HostConfigRequest, HostConfigurer, HostResponse, HostResult};
pub use ping::{HttpProber, RegionProber};
pub use scaling::{AssignBody, AssignRequest, AssignResponse, MandelboxAssigner, ScalingClient};
pub use store::{KeyValueStore, MemoryStore, SqliteStore, StoreKey};
