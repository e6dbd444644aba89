//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so partial JSON
//! fills missing fields from [`Default`].

mod launcher;
mod services;

pub use launcher::*;
pub use services::*;

use serde::{Deserialize, Serialize};
use whist_core::HostPreferences;

/// Root settings type for the Whist launcher.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhistSettings {
    /// OAuth token endpoint.
    pub auth: AuthSettings,
    /// Scaling service and mandelbox retry policy.
    pub scaling: ScalingSettings,
    /// Host service connection.
    pub host: HostSettings,
    /// Region candidates and latency probing.
    pub regions: RegionSettings,
    /// Streaming protocol subprocess.
    pub protocol: ProtocolSettings,
    /// Build identity reported to the scaling service.
    pub client: ClientSettings,
    /// Preferences forwarded to the remote browser.
    pub session: HostPreferences,
    pub storage: StorageSettings,
    pub logging: LoggingSettings,
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level, `EnvFilter` syntax.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(WhistSettings::default()).unwrap();
        assert!(json["host"].get("acceptInvalidCerts").is_some());
        assert!(json["regions"].get("allowCrossBorder").is_some());
        assert!(json["scaling"]["retry"].get("maxAttempts").is_some());
    }

    #[test]
    fn session_preferences_keep_host_names() {
        let json = serde_json::to_value(WhistSettings::default()).unwrap();
        assert!(json["session"].get("desired_timezone").is_some());
    }
}
