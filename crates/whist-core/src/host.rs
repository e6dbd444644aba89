//! Host configuration inputs and the spin-up result handed to the protocol.

use serde::{Deserialize, Serialize};

/// The three ports a configured host exposes for the streaming protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MandelboxPorts {
    pub port_32262: u16,
    pub port_32263: u16,
    pub port_32273: u16,
}

/// A fully configured host, ready for the protocol to connect.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSpinUpResult {
    pub mandelbox_ip: String,
    /// Hex AES key the protocol uses to authenticate with the host.
    pub mandelbox_secret: String,
    pub mandelbox_ports: MandelboxPorts,
}

/// Browser data imported from a local browser and forwarded to the host.
///
/// Each field is an opaque, already-encoded blob.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmarks: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<String>,
}

impl ImportedData {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_none()
            && self.bookmarks.is_none()
            && self.extensions.is_none()
            && self.preferences.is_none()
    }
}

/// Display, locale and keyboard settings applied inside the remote browser.
///
/// Serialized to a JSON string and sent to the host as `json_data`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostPreferences {
    pub dark_mode: bool,
    pub desired_timezone: String,
    pub client_dpi: u32,
    pub restore_last_session: bool,
    pub kiosk_mode: bool,
    pub initial_key_repeat: u32,
    pub key_repeat: u32,
    pub local_client: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub system_languages: String,
    pub browser_languages: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard_layout: Option<String>,
    pub client_os: String,
}

impl Default for HostPreferences {
    fn default() -> Self {
        Self {
            dark_mode: false,
            desired_timezone: "Etc/UTC".to_string(),
            client_dpi: 96,
            restore_last_session: true,
            kiosk_mode: false,
            initial_key_repeat: 300,
            key_repeat: 30,
            local_client: true,
            user_agent: None,
            system_languages: "en_US".to_string(),
            browser_languages: "en-US,en".to_string(),
            keyboard_layout: None,
            client_os: std::env::consts::OS.to_string(),
        }
    }
}

impl HostPreferences {
    /// Encode as the `json_data` string the host expects.
    pub fn to_json_data(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
