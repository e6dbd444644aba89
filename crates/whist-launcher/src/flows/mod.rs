//! The launch stages, in pipeline order.

pub mod auth;
pub mod host;
pub mod mandelbox;
pub mod region;

pub use auth::{AuthError, AuthFailure, AuthOutputs, auth_flow, authenticate};
pub use host::{HostDeps, HostError, HostFailure, HostOutputs, HostRequest, host_flow, spin_up_host};
pub use mandelbox::{
    MandelboxDeps, MandelboxError, MandelboxFailure, MandelboxOutputs, MandelboxRequest,
    classify_assign, create_mandelbox, mandelbox_flow,
};
pub use region::{Ranking, RegionOutputs, rank, region_flow};
