//! Host service client: the one-shot configuration handshake sent directly
//! to the assigned machine.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use whist_core::{HostSpinUpResult, ImportedData, MandelboxPorts};
use whist_settings::HostSettings;

use crate::errors::ServiceError;

/// Body of `PUT /json_transport`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostConfigRequest {
    pub config_encryption_token: String,
    pub is_new_config_encryption_token: bool,
    pub jwt_access_token: String,
    pub mandelbox_id: String,
    /// JSON-encoded display, locale and keyboard preferences.
    pub json_data: String,
    #[serde(flatten)]
    pub imported: ImportedData,
}

/// Fields the host returns on a completed handshake.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResult {
    #[serde(default)]
    pub port_32262: Option<u16>,
    #[serde(default)]
    pub port_32263: Option<u16>,
    #[serde(default)]
    pub port_32273: Option<u16>,
    #[serde(default)]
    pub aes_key: Option<String>,
}

/// Status and decoded body of one handshake.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResponse {
    pub status: u16,
    #[serde(default)]
    pub result: Option<HostResult>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Deserialize)]
struct WireBody {
    #[serde(default)]
    result: Option<HostResult>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl HostResponse {
    /// The configured host, when all three ports and the AES key are present.
    ///
    /// The status code is not consulted: a 200 with a missing field is a failure.
    pub fn spin_up_result(&self, mandelbox_ip: &str) -> Option<HostSpinUpResult> {
        let result = self.result.as_ref()?;
        let mandelbox_ports = MandelboxPorts {
            port_32262: result.port_32262?,
            port_32263: result.port_32263?,
            port_32273: result.port_32273?,
        };
        let mandelbox_secret = result.aes_key.as_deref().filter(|k| !k.is_empty())?;
        Some(HostSpinUpResult {
            mandelbox_ip: mandelbox_ip.to_string(),
            mandelbox_secret: mandelbox_secret.to_string(),
            mandelbox_ports,
        })
    }
}

/// Sends the configuration handshake to a host.
#[async_trait]
pub trait HostConfigurer: Send + Sync {
    /// `Err` only for transport failures.
    async fn configure(
        &self,
        mandelbox_ip: &str,
        request: &HostConfigRequest,
    ) -> Result<HostResponse, ServiceError>;
}

#[derive(Clone, Debug)]
pub struct HostClient {
    http: reqwest::Client,
    scheme: String,
    port: u16,
}

impl HostClient {
    pub fn new(settings: &HostSettings) -> Result<Self, ServiceError> {
        // Hosts serve self-signed certificates.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(settings.request_timeout_ms))
            .danger_accept_invalid_certs(settings.accept_invalid_certs)
            .build()?;
        Ok(Self {
            http,
            scheme: settings.scheme.clone(),
            port: settings.port,
        })
    }

    fn transport_url(&self, mandelbox_ip: &str) -> String {
        format!("{}://{mandelbox_ip}:{}/json_transport", self.scheme, self.port)
    }
}

#[async_trait]
impl HostConfigurer for HostClient {
    #[tracing::instrument(skip_all, fields(mandelbox_id = %request.mandelbox_id))]
    async fn configure(
        &self,
        mandelbox_ip: &str,
        request: &HostConfigRequest,
    ) -> Result<HostResponse, ServiceError> {
        let response = self
            .http
            .put(self.transport_url(mandelbox_ip))
            .json(request)
            .send()
            .await?;
        let status = response.status().as_u16();
        let text = response.text().await?;

        let (result, error) = match serde_json::from_str::<WireBody>(&text) {
            Ok(body) => (
                body.result,
                body.error.map(|e| match e {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                }),
            ),
            Err(err) => {
                warn!(status, error = %err, "host response is not JSON");
                (None, Some(text))
            }
        };
        info!(status, has_result = result.is_some(), "host handshake answered");
        Ok(HostResponse { status, result, error })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request() -> HostConfigRequest {
        HostConfigRequest {
            config_encryption_token: "ct".into(),
            is_new_config_encryption_token: true,
            jwt_access_token: "at".into(),
            mandelbox_id: "m1".into(),
            json_data: "{}".into(),
            imported: ImportedData {
                bookmarks: Some("bm".into()),
                ..ImportedData::default()
            },
        }
    }

    fn full_result() -> HostResult {
        HostResult {
            port_32262: Some(40000),
            port_32263: Some(40001),
            port_32273: Some(40002),
            aes_key: Some("aes".into()),
        }
    }

    /// Client pointed at the mock server's port over plain HTTP.
    fn client_for(server: &MockServer) -> (HostClient, String) {
        let address = server.address();
        let client = HostClient::new(&HostSettings {
            port: address.port(),
            scheme: "http".into(),
            ..HostSettings::default()
        })
        .unwrap();
        (client, address.ip().to_string())
    }

    #[tokio::test]
    async fn configure_puts_flattened_request() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/json_transport"))
            .and(body_json(serde_json::json!({
                "config_encryption_token": "ct",
                "is_new_config_encryption_token": true,
                "jwt_access_token": "at",
                "mandelbox_id": "m1",
                "json_data": "{}",
                "bookmarks": "bm"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": {"port_32262": 40000, "port_32263": 40001, "port_32273": 40002, "aes_key": "aes"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, ip) = client_for(&server);
        let response = client.configure(&ip, &request()).await.unwrap();
        let result = response.spin_up_result(&ip).unwrap();
        assert_eq!(result.mandelbox_secret, "aes");
        assert_eq!(result.mandelbox_ports.port_32273, 40002);
        assert_eq!(result.mandelbox_ip, ip);
    }

    #[tokio::test]
    async fn error_body_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(serde_json::json!({"error": "bad token"})),
            )
            .mount(&server)
            .await;

        let (client, ip) = client_for(&server);
        let response = client.configure(&ip, &request()).await.unwrap();
        assert_eq!(response.status, 400);
        assert_eq!(response.error.as_deref(), Some("bad token"));
        assert!(response.spin_up_result(&ip).is_none());
    }

    #[test]
    fn any_missing_field_fails_even_on_200() {
        let ok = HostResponse {
            status: 200,
            result: Some(full_result()),
            error: None,
        };
        assert!(ok.spin_up_result("1.2.3.4").is_some());

        let without: [fn(&mut HostResult); 4] = [
            |r| r.port_32262 = None,
            |r| r.port_32263 = None,
            |r| r.port_32273 = None,
            |r| r.aes_key = None,
        ];
        for strip in without {
            let mut result = full_result();
            strip(&mut result);
            let response = HostResponse {
                status: 200,
                result: Some(result),
                error: None,
            };
            assert!(response.spin_up_result("1.2.3.4").is_none());
        }
    }

    #[test]
    fn complete_result_wins_regardless_of_status() {
        let response = HostResponse {
            status: 500,
            result: Some(full_result()),
            error: None,
        };
        assert!(response.spin_up_result("1.2.3.4").is_some());
    }

    #[test]
    fn empty_imported_data_is_omitted() {
        let request = HostConfigRequest {
            imported: ImportedData::default(),
            ..request()
        };
        let value = serde_json::to_value(request).unwrap();
        assert!(value.get("cookies").is_none());
        assert!(value.get("bookmarks").is_none());
    }
}
