use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Every topic that can travel on the trigger bus.
///
/// Subscription is by exact name. Adding a topic means adding a variant here.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerName {
    // Application lifecycle
    AppReady,
    AppSuspended,
    AppResumed,

    // User intent
    LaunchRequested,

    // Stage outputs
    AuthFlowSuccess,
    AuthFlowFailure,
    RegionCached,
    RegionRefresh,
    RegionOffline,
    MandelboxCreateSuccess,
    MandelboxCreateFailure,
    HostSpinUpSuccess,
    HostSpinUpFailure,
    ProtocolLaunched,
    ProtocolClosed,
    ProtocolFailure,

    // Error presentation
    ErrorWindow,
}

impl TriggerName {
    /// Wire name, matching the serde representation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AppReady => "app_ready",
            Self::AppSuspended => "app_suspended",
            Self::AppResumed => "app_resumed",
            Self::LaunchRequested => "launch_requested",
            Self::AuthFlowSuccess => "auth_flow_success",
            Self::AuthFlowFailure => "auth_flow_failure",
            Self::RegionCached => "region_cached",
            Self::RegionRefresh => "region_refresh",
            Self::RegionOffline => "region_offline",
            Self::MandelboxCreateSuccess => "mandelbox_create_success",
            Self::MandelboxCreateFailure => "mandelbox_create_failure",
            Self::HostSpinUpSuccess => "host_spin_up_success",
            Self::HostSpinUpFailure => "host_spin_up_failure",
            Self::ProtocolLaunched => "protocol_launched",
            Self::ProtocolClosed => "protocol_closed",
            Self::ProtocolFailure => "protocol_failure",
            Self::ErrorWindow => "error_window",
        }
    }
}

impl std::fmt::Display for TriggerName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, fire-and-forget message on the bus.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// The only identity a trigger has.
    pub name: TriggerName,
    /// Stage-specific payload.
    pub payload: Value,
}

impl Trigger {
    /// Build a trigger from an already-encoded payload.
    pub fn new(name: TriggerName, payload: Value) -> Self {
        Self { name, payload }
    }

    /// A trigger with no payload.
    pub fn signal(name: TriggerName) -> Self {
        Self {
            name,
            payload: Value::Null,
        }
    }

    /// Encode `payload` and build a trigger.
    pub fn encode<T: Serialize>(name: TriggerName, payload: &T) -> Result<Self, serde_json::Error> {
        Ok(Self {
            name,
            payload: serde_json::to_value(payload)?,
        })
    }
}
