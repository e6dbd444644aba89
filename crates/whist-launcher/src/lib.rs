//! # whist-launcher
//!
//! The session-establishment pipeline built on `whist-flow`.
//!
//! - [`flows`]: the auth, region, mandelbox and host stages
//! - [`protocol`]: streaming client subprocess and its stdin handshake
//! - [`dispatch`]: total classification of stage failures into error windows
//! - [`pipeline`]: wiring of every stage onto a [`TriggerBus`](whist_flow::TriggerBus)
//!
//! Every stage exposes its outputs as named [`Channel`](whist_flow::Channel)s
//! and never panics on bad input: failures are values on a `failure` channel.

#![deny(unsafe_code)]

pub mod dispatch;
pub mod flows;
pub mod pipeline;
pub mod protocol;

pub use dispatch::{ErrorWindow, StageFailure, error_dispatch};
pub use pipeline::{LaunchRequest, Pipeline, Services, persist_auth, stored_credentials};
pub use protocol::{Launch, ProtocolExit, ProtocolLauncher, StreamLauncher};
