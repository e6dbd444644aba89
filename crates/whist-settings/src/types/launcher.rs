use serde::{Deserialize, Serialize};
use whist_core::AwsRegion;

use crate::loader::whist_home;

/// Region candidates and latency probing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegionSettings {
    /// Curated candidate list, before eligibility filtering.
    pub candidates: Vec<AwsRegion>,
    /// ISO 3166 alpha-2 country the user is in.
    pub home_country: String,
    pub allow_cross_border: bool,
    /// Probes per region; the minimum is kept.
    pub samples: u32,
    pub probe_timeout_ms: u64,
    /// Probe URL with a `{region}` placeholder.
    pub probe_url_template: String,
}

impl Default for RegionSettings {
    fn default() -> Self {
        Self {
            candidates: AwsRegion::ALL.to_vec(),
            home_country: "US".to_string(),
            allow_cross_border: false,
            samples: 3,
            probe_timeout_ms: 2_000,
            probe_url_template: "https://dynamodb.{region}.amazonaws.com/ping".to_string(),
        }
    }
}

impl RegionSettings {
    pub fn probe_url(&self, region: AwsRegion) -> String {
        self.probe_url_template.replace("{region}", region.as_str())
    }
}

/// Streaming protocol subprocess.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProtocolSettings {
    pub binary_path: String,
    pub args: Vec<String>,
    /// How long to wait after `kill?0` before force-killing.
    pub kill_grace_ms: u64,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            binary_path: "WhistClient".to_string(),
            args: vec!["--read-pipe".to_string()],
            kill_grace_ms: 1_500,
        }
    }
}

/// Build identity reported to the scaling service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    pub commit_hash: String,
    pub version: String,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            commit_hash: "local_dev".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Persisted key-value store location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    pub path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            path: whist_home().join("store.db").to_string_lossy().into_owned(),
        }
    }
}
