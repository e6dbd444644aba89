//! # whist-flow
//!
//! The orchestration runtime the launcher stages are built from.
//!
//! - [`TriggerBus`]: injectable, exact-match multicast bus of named triggers
//! - [`Channel`]: shared, multicast flow output with a single upstream pump
//! - [`flow`]: traced flow wrapper that turns build failures into faulted outputs
//! - [`fork`] / [`split_result`]: partition one source into labelled channels
//! - Signal gates: [`wait_for_signal`], [`emit_on_signal`], [`with_app_ready`]
//! - [`join_by_key`]: correlate two streams by attempt id instead of position
//! - [`retry`]: bounded, cancellable retry driven by a [`RetryPolicy`](whist_core::RetryPolicy)
//! - [`AttemptTracker`]: one in-flight launch attempt at a time
//!
//! Wiring is expected to run on a current-thread runtime: channels must be
//! subscribed before the wiring task yields, or early values are missed.

#![deny(unsafe_code)]

pub mod attempt;
pub mod bus;
pub mod channel;
pub mod errors;
pub mod fork;
pub mod gates;
pub mod join;
pub mod retry;

pub use attempt::AttemptTracker;
pub use bus::{Lifecycle, TriggerBus};
pub use channel::{Channel, Flow, FlowOutputs, Publisher, flow};
pub use errors::FlowError;
pub use fork::{Predicate, fork, split_result};
pub use gates::{emit_on_signal, wait_for_signal, with_app_ready};
pub use join::join_by_key;
pub use retry::{AttemptOutcome, RetryFailure, RetryOutcome, retry};
